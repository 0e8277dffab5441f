//! Out-of-process acceleration provider
//!
//! Talks to a spawned engine over line-delimited JSON: one request
//! object per line on its stdin, one response object per line on its
//! stdout, correlated by id. Every request carries a bounded timeout;
//! a slow or wedged sidecar surfaces as an [`Accelerator`] fault and
//! the bridge falls back for the run.

use crate::accel::Accelerator;
use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::debug;

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

#[derive(Debug, Deserialize)]
struct SidecarResponse {
    id: i64,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<SidecarError>,
}

#[derive(Debug, Deserialize)]
struct SidecarError {
    #[allow(dead_code)]
    #[serde(default)]
    code: i32,
    message: String,
}

struct SidecarIo {
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    // Held so the child is reaped with the accelerator
    _child: Child,
}

/// [`Accelerator`] backed by a line-delimited JSON sidecar process
pub struct SidecarAccelerator {
    name: String,
    io: Mutex<SidecarIo>,
    timeout: Duration,
    next_id: AtomicI64,
}

impl SidecarAccelerator {
    /// Spawn `program` with `args` and wire up the protocol streams.
    /// The sidecar's stderr passes through for its own diagnostics.
    pub fn spawn(program: &Path, args: &[String], timeout: Duration) -> CacheResult<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CacheError::accel("sidecar", format!("spawn {} failed: {}", program.display(), e))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CacheError::accel("sidecar", "no stdin pipe"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CacheError::accel("sidecar", "no stdout pipe"))?;

        Ok(Self {
            name: format!("sidecar:{}", program.display()),
            io: Mutex::new(SidecarIo {
                stdin,
                stdout: BufReader::new(stdout).lines(),
                _child: child,
            }),
            timeout,
            next_id: AtomicI64::new(1),
        })
    }

    /// One request/response exchange, bounded by the configured timeout
    async fn request(&self, method: &str, params: Value) -> CacheResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = serde_json::to_string(&json!({
            "id": id,
            "method": method,
            "params": params,
        }))?;
        debug!("Sidecar request {}: {}", id, method);

        let mut io = self.io.lock().await;
        let exchange = async {
            io.stdin.write_all(line.as_bytes()).await?;
            io.stdin.write_all(b"\n").await?;
            io.stdin.flush().await?;

            // Requests are serialized under the lock, so responses
            // arrive in order; skip anything with a stale id.
            loop {
                match io.stdout.next_line().await? {
                    Some(line) if line.trim().is_empty() => continue,
                    Some(line) => {
                        if let Ok(resp) = serde_json::from_str::<SidecarResponse>(&line) {
                            if resp.id == id {
                                return Ok::<_, std::io::Error>(Some(resp));
                            }
                        }
                        debug!("Discarding unmatched sidecar line");
                    }
                    None => return Ok(None),
                }
            }
        };

        let resp = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| CacheError::AccelTimeout {
                name: self.name.clone(),
                timeout_ms: self.timeout.as_millis() as u64,
            })?
            .map_err(|e| CacheError::accel(&self.name, e.to_string()))?
            .ok_or_else(|| CacheError::accel(&self.name, "sidecar closed its stdout"))?;

        if let Some(err) = resp.error {
            return Err(CacheError::accel(&self.name, err.message));
        }
        resp.result
            .ok_or_else(|| CacheError::accel(&self.name, "response carried neither result nor error"))
    }
}

#[async_trait]
impl Accelerator for SidecarAccelerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn normalize(&self, content: &str) -> CacheResult<String> {
        let result = self
            .request(
                "normalize",
                json!({ "content": content, "removeBom": true, "normalizeLf": true }),
            )
            .await?;
        result
            .get("content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CacheError::accel(&self.name, "normalize response missing content"))
    }

    async fn deps_digest(&self, paths: &[PathBuf]) -> CacheResult<String> {
        // Stats are taken here; the sidecar only sorts and hashes the
        // records. Missing files carry the same (0, 0) sentinel the
        // reference collector uses.
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let display = path.to_string_lossy().into_owned();
            let (size, mtime) = match tokio::fs::metadata(path).await {
                Ok(meta) => (meta.len(), crate::deps::mtime_ms(&meta) as u64),
                Err(_) => (0, 0),
            };
            files.push(json!({ "path": display, "size": size, "mtime": mtime }));
        }
        let result = self
            .request("computeDigest", json!({ "files": files }))
            .await?;
        result
            .get("digest")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CacheError::accel(&self.name, "digest response missing digest"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_missing_program_errors() {
        let result = SidecarAccelerator::spawn(
            Path::new("/nonexistent/fastmd-sidecar"),
            &[],
            DEFAULT_TIMEOUT,
        );
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn echoed_request_is_a_protocol_fault() {
        // `cat` echoes our request back: same id, but neither result
        // nor error, which must surface as a fault, never a hang.
        let sidecar = SidecarAccelerator::spawn(
            Path::new("/bin/cat"),
            &[],
            Duration::from_millis(500),
        )
        .unwrap();

        let err = sidecar.normalize("x").await.unwrap_err();
        assert!(matches!(err, CacheError::Accel { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unresponsive_sidecar_times_out() {
        let sidecar = SidecarAccelerator::spawn(
            Path::new("/bin/sleep"),
            &["30".to_string()],
            Duration::from_millis(100),
        )
        .unwrap();

        let err = sidecar.normalize("x").await.unwrap_err();
        assert!(matches!(err, CacheError::AccelTimeout { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn deps_digest_sends_statted_files() {
        // Echo every request to a file, answer with a fixed digest;
        // then check the wire shape: computeDigest with a files array
        // of (path, size, mtime) records, sentinel (0, 0) for missing.
        let dir = tempfile::TempDir::new().unwrap();
        let log = dir.path().join("requests.jsonl");
        let script = format!(
            r#"while read -r line; do printf '%s\n' "$line" >> {}; printf '{{"id":1,"result":{{"digest":"abc123"}}}}\n'; done"#,
            log.display()
        );
        let sidecar = SidecarAccelerator::spawn(
            Path::new("/bin/sh"),
            &["-c".to_string(), script],
            Duration::from_millis(1000),
        )
        .unwrap();

        let dep = dir.path().join("dep.txt");
        std::fs::write(&dep, "12345").unwrap();
        let ghost = dir.path().join("ghost.txt");

        let digest = sidecar.deps_digest(&[dep.clone(), ghost.clone()]).await.unwrap();
        assert_eq!(digest, "abc123");

        let request: serde_json::Value =
            serde_json::from_str(std::fs::read_to_string(&log).unwrap().lines().next().unwrap())
                .unwrap();
        assert_eq!(request["method"], "computeDigest");
        let files = request["params"]["files"].as_array().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0]["path"], dep.to_string_lossy().as_ref());
        assert_eq!(files[0]["size"], 5);
        assert!(files[0]["mtime"].as_u64().unwrap() > 0);
        assert_eq!(files[1]["size"], 0);
        assert_eq!(files[1]["mtime"], 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn well_formed_response_parses() {
        // A sidecar that answers every request with a fixed normalize
        // response; ids start at 1 in a fresh accelerator.
        let script = r#"while read -r line; do printf '{"id":1,"result":{"content":"normalized"}}\n'; done"#;
        let sidecar = SidecarAccelerator::spawn(
            Path::new("/bin/sh"),
            &["-c".to_string(), script.to_string()],
            Duration::from_millis(1000),
        )
        .unwrap();

        let out = sidecar.normalize("anything").await.unwrap();
        assert_eq!(out, "normalized");
    }
}
