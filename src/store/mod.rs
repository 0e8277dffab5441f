//! Content-addressable store contract
//!
//! Entries are keyed by fingerprint and immutable once persisted. The
//! only mutation discipline is create-at-new-key: no in-place edits, no
//! deletes except through [`CacheStore::clear`]. That is what makes
//! concurrent and multi-process access safe without locking.

pub mod disk;

pub use disk::DiskStore;

use crate::error::CacheResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current entry envelope version
pub const META_VERSION: u32 = 1;

/// Metadata envelope persisted next to an entry's payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMeta {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub toolchain_digest: String,
    pub feature_digest: String,
    pub size_bytes: u64,
    /// How long the original miss took to produce this output. Entries
    /// written before this field existed read as 0 and simply
    /// contribute nothing to the saved-time metric.
    #[serde(default)]
    pub duration_ms: u64,
}

impl EntryMeta {
    /// Envelope for a fresh write
    pub fn new(
        toolchain_digest: impl Into<String>,
        feature_digest: impl Into<String>,
        size_bytes: u64,
        duration_ms: u64,
    ) -> Self {
        Self {
            version: META_VERSION,
            created_at: Utc::now(),
            toolchain_digest: toolchain_digest.into(),
            feature_digest: feature_digest.into(),
            size_bytes,
            duration_ms,
        }
    }
}

/// A stored entry
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub primary: Vec<u8>,
    pub secondary: Option<Vec<u8>>,
    pub meta: EntryMeta,
}

/// Outcome of a store lookup.
///
/// `Miss` and `Corrupted` are identical in control flow — both degrade
/// to a cache miss. The distinction exists only for logging and for
/// the put-side healing policy.
#[derive(Debug)]
pub enum Lookup {
    Hit(Box<CacheEntry>),
    Miss,
    Corrupted,
}

/// Outcome of a store write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// A new entry was persisted
    Written,
    /// A decodable entry already existed; the write was a no-op
    AlreadyPresent,
}

/// Digest-keyed entry storage.
///
/// `get` is infallible by contract: every read fault folds into `Miss`
/// or `Corrupted`. `put` must be idempotent — two racing writers of
/// the same fingerprint both observe success and exactly one physical
/// entry survives.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, fingerprint: &str) -> Lookup;

    async fn put(
        &self,
        fingerprint: &str,
        primary: &[u8],
        secondary: Option<&[u8]>,
        meta: EntryMeta,
    ) -> CacheResult<PutOutcome>;

    /// Remove all entries, returning how many were deleted
    async fn clear(&self) -> CacheResult<usize>;
}

/// Whether a string is a plausible fingerprint (64 lowercase hex chars).
/// Anything else is refused before it can become a filesystem path.
pub fn is_valid_fingerprint(fp: &str) -> bool {
    fp.len() == 64
        && fp
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}
