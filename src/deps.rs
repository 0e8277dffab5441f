//! Dependency fingerprint collection (strict mode)
//!
//! Hashes the (path, size, mtime) of every declared dependency so a
//! touched include or asset invalidates entries that were built from
//! it. Missing or unreadable files map to a `(0, 0)` sentinel — a
//! vanished dependency is a legitimate state, not an error.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::trace;

/// One observed dependency record
#[derive(Debug, Clone, PartialEq, Eq)]
struct DepStat {
    path: String,
    size: u64,
    mtime_ms: u128,
}

/// Modification time in milliseconds since the epoch, 0 when unknown
pub(crate) fn mtime_ms(meta: &std::fs::Metadata) -> u128 {
    meta.modified()
        .ok()
        .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

async fn stat_one(path: &Path) -> DepStat {
    let display_path = path.to_string_lossy().into_owned();
    match tokio::fs::metadata(path).await {
        Ok(meta) => DepStat {
            path: display_path,
            size: meta.len(),
            mtime_ms: mtime_ms(&meta),
        },
        Err(e) => {
            trace!("Dependency stat failed for {}: {}", display_path, e);
            DepStat {
                path: display_path,
                size: 0,
                mtime_ms: 0,
            }
        }
    }
}

/// Collect a digest over dependency file stats.
///
/// Paths are sorted before hashing so collection order never affects
/// the result. Records are framed as `path|size|mtime\n`.
pub async fn collect(paths: &[PathBuf]) -> String {
    let mut records = Vec::with_capacity(paths.len());
    for path in paths {
        records.push(stat_one(path).await);
    }
    records.sort_by(|a, b| a.path.cmp(&b.path));

    let mut hasher = Sha256::new();
    for rec in records {
        hasher.update(rec.path.as_bytes());
        hasher.update(b"|");
        hasher.update(rec.size.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(rec.mtime_ms.to_string().as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn order_independent() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, "aaa").unwrap();
        std::fs::write(&b, "bbbb").unwrap();

        let forward = collect(&[a.clone(), b.clone()]).await;
        let reverse = collect(&[b, a]).await;
        assert_eq!(forward, reverse);
    }

    #[tokio::test]
    async fn missing_files_use_sentinel() {
        let dir = TempDir::new().unwrap();
        let ghost = dir.path().join("ghost.txt");

        // Never errors; digest is stable for the same missing set
        let d1 = collect(&[ghost.clone()]).await;
        let d2 = collect(&[ghost]).await;
        assert_eq!(d1, d2);
        assert_eq!(d1.len(), 64);
    }

    #[tokio::test]
    async fn sensitive_to_size_change() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("dep.txt");
        std::fs::write(&file, "v1").unwrap();
        let before = collect(std::slice::from_ref(&file)).await;

        std::fs::write(&file, "version two").unwrap();
        let after = collect(std::slice::from_ref(&file)).await;
        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn sensitive_to_mtime_change() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("dep.txt");
        std::fs::write(&file, "same").unwrap();
        let before = collect(std::slice::from_ref(&file)).await;

        let past = std::time::SystemTime::now() - std::time::Duration::from_secs(3600);
        let f = std::fs::File::options().write(true).open(&file).unwrap();
        f.set_modified(past).unwrap();
        drop(f);

        let after = collect(std::slice::from_ref(&file)).await;
        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn empty_set_is_stable() {
        assert_eq!(collect(&[]).await, collect(&[]).await);
    }
}
