//! On-disk content-addressable store
//!
//! Layout: `<root>/<fp[0..2]>/<fp>/` holding `meta.json`, `payload`,
//! and optionally `secondary`. Writes stage into a temp directory
//! under the root and rename into place, so a reader never observes a
//! half-written entry and racing writers resolve to exactly one
//! survivor.
//!
//! Healing policy: `put` is a no-op when a decodable entry already
//! exists, but replaces an entry whose envelope fails to decode — a
//! corrupt entry heals on the next producer instead of requiring a
//! manual clear.

use crate::error::{CacheError, CacheResult};
use crate::store::{is_valid_fingerprint, CacheEntry, CacheStore, EntryMeta, Lookup, PutOutcome};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::{debug, warn};

const META_FILE: &str = "meta.json";
const PAYLOAD_FILE: &str = "payload";
const SECONDARY_FILE: &str = "secondary";
const TMP_DIR: &str = ".tmp";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Filesystem-backed [`CacheStore`]
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Open a store rooted at `root`. The directory is created lazily
    /// on first write; a missing root reads as an empty store.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_dir(&self, fingerprint: &str) -> PathBuf {
        self.root.join(&fingerprint[..2]).join(fingerprint)
    }

    fn tmp_dir(&self) -> PathBuf {
        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(TMP_DIR)
            .join(format!("{}-{}", std::process::id(), n))
    }

    /// Decode the envelope for an entry directory, if the entry is usable
    async fn read_meta(dir: &Path) -> Option<Result<EntryMeta, String>> {
        let raw = match fs::read(dir.join(META_FILE)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => return Some(Err(e.to_string())),
        };
        Some(serde_json::from_slice(&raw).map_err(|e| e.to_string()))
    }

    /// Count entries and sum payload sizes, for reporting
    pub async fn stats(&self) -> CacheResult<(usize, u64)> {
        let mut count = 0usize;
        let mut bytes = 0u64;
        for fp in self.list_fingerprints().await? {
            if let Lookup::Hit(entry) = self.get(&fp).await {
                count += 1;
                bytes += entry.meta.size_bytes;
            }
        }
        Ok((count, bytes))
    }

    /// Fingerprints whose entries fail to decode
    pub async fn find_corrupt(&self) -> CacheResult<Vec<String>> {
        let mut corrupt = Vec::new();
        for fp in self.list_fingerprints().await? {
            if matches!(self.get(&fp).await, Lookup::Corrupted) {
                corrupt.push(fp);
            }
        }
        Ok(corrupt)
    }

    /// All fingerprints present on disk, valid or not yet verified
    pub async fn list_fingerprints(&self) -> CacheResult<Vec<String>> {
        let mut fingerprints = Vec::new();
        let mut top = match fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(fingerprints),
            Err(e) => return Err(CacheError::io("listing store root", e)),
        };
        while let Some(shard) = top
            .next_entry()
            .await
            .map_err(|e| CacheError::io("listing store root", e))?
        {
            let name = shard.file_name();
            let name = name.to_string_lossy();
            if name.len() != 2 {
                continue;
            }
            let mut entries = match fs::read_dir(shard.path()).await {
                Ok(rd) => rd,
                Err(_) => continue,
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| CacheError::io("listing store shard", e))?
            {
                let fp = entry.file_name().to_string_lossy().into_owned();
                if is_valid_fingerprint(&fp) {
                    fingerprints.push(fp);
                }
            }
        }
        fingerprints.sort();
        Ok(fingerprints)
    }

    async fn stage(
        &self,
        fingerprint: &str,
        primary: &[u8],
        secondary: Option<&[u8]>,
        meta: &EntryMeta,
    ) -> CacheResult<PathBuf> {
        let tmp = self.tmp_dir();
        fs::create_dir_all(&tmp)
            .await
            .map_err(|e| CacheError::store_write(fingerprint, e))?;

        let envelope =
            serde_json::to_vec_pretty(meta).map_err(|e| CacheError::Internal(e.to_string()))?;
        fs::write(tmp.join(META_FILE), envelope)
            .await
            .map_err(|e| CacheError::store_write(fingerprint, e))?;
        fs::write(tmp.join(PAYLOAD_FILE), primary)
            .await
            .map_err(|e| CacheError::store_write(fingerprint, e))?;
        if let Some(secondary) = secondary {
            fs::write(tmp.join(SECONDARY_FILE), secondary)
                .await
                .map_err(|e| CacheError::store_write(fingerprint, e))?;
        }
        Ok(tmp)
    }
}

#[async_trait]
impl CacheStore for DiskStore {
    async fn get(&self, fingerprint: &str) -> Lookup {
        if !is_valid_fingerprint(fingerprint) {
            warn!("Refusing lookup for malformed fingerprint");
            return Lookup::Miss;
        }
        let dir = self.entry_dir(fingerprint);

        let meta = match Self::read_meta(&dir).await {
            None => return Lookup::Miss,
            Some(Err(reason)) => {
                debug!("Corrupt envelope for {}: {}", fingerprint, reason);
                return Lookup::Corrupted;
            }
            Some(Ok(meta)) => meta,
        };

        let primary = match fs::read(dir.join(PAYLOAD_FILE)).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("Unreadable payload for {}: {}", fingerprint, e);
                return Lookup::Corrupted;
            }
        };
        if primary.len() as u64 != meta.size_bytes {
            debug!(
                "Payload size mismatch for {}: envelope says {}, found {}",
                fingerprint,
                meta.size_bytes,
                primary.len()
            );
            return Lookup::Corrupted;
        }

        let secondary = match fs::read(dir.join(SECONDARY_FILE)).await {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                debug!("Unreadable secondary for {}: {}", fingerprint, e);
                return Lookup::Corrupted;
            }
        };

        Lookup::Hit(Box::new(CacheEntry {
            fingerprint: fingerprint.to_string(),
            primary,
            secondary,
            meta,
        }))
    }

    async fn put(
        &self,
        fingerprint: &str,
        primary: &[u8],
        secondary: Option<&[u8]>,
        meta: EntryMeta,
    ) -> CacheResult<PutOutcome> {
        if !is_valid_fingerprint(fingerprint) {
            return Err(CacheError::Internal(format!(
                "malformed fingerprint: {:?}",
                fingerprint
            )));
        }
        let dir = self.entry_dir(fingerprint);

        match Self::read_meta(&dir).await {
            Some(Ok(_)) => {
                // First-writer-wins: same fingerprint means equivalent payload
                debug!("Entry already present for {}, skipping write", fingerprint);
                return Ok(PutOutcome::AlreadyPresent);
            }
            Some(Err(reason)) => {
                // Heal: replace the entry no reader can use
                warn!(
                    "Replacing corrupt entry for {} ({})",
                    fingerprint, reason
                );
                fs::remove_dir_all(&dir)
                    .await
                    .map_err(|e| CacheError::store_write(fingerprint, e))?;
            }
            None => {}
        }

        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| CacheError::store_write(fingerprint, e))?;
        }

        let tmp = self.stage(fingerprint, primary, secondary, &meta).await?;
        match fs::rename(&tmp, &dir).await {
            Ok(()) => Ok(PutOutcome::Written),
            Err(e) => {
                // A racing writer got there first; their entry is
                // equivalent by the fingerprint's definition.
                let _ = fs::remove_dir_all(&tmp).await;
                if dir.exists() {
                    debug!("Lost create race for {}, treating as present", fingerprint);
                    Ok(PutOutcome::AlreadyPresent)
                } else {
                    Err(CacheError::store_write(fingerprint, e))
                }
            }
        }
    }

    async fn clear(&self) -> CacheResult<usize> {
        let fingerprints = self.list_fingerprints().await?;
        let removed = fingerprints.len();
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(CacheError::io("clearing store", e)),
        }
        debug!("Cleared {} cache entries", removed);
        Ok(removed)
    }
}
