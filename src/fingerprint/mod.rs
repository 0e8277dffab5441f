//! Fingerprint derivation
//!
//! A fingerprint is a SHA-256 over every input that can legitimately
//! change a unit's transformed output: normalized content, canonical
//! frontmatter, feature and toolchain digests, normalized unit
//! identity, build mode, salt, and (in strict mode) the dependency
//! digest. Pure — the only I/O is what the caller already did.

pub mod frontmatter;

use crate::config::CacheConfig;
use sha2::{Digest, Sha256};
use std::borrow::Cow;

/// Strip a UTF-8 BOM and canonicalize line endings to `\n`.
///
/// Borrowed when the input is already clean, which is the common case.
pub fn normalize_content(content: &str) -> Cow<'_, str> {
    let stripped = content.strip_prefix('\u{FEFF}').unwrap_or(content);
    if stripped.contains('\r') {
        let lf = stripped.replace("\r\n", "\n").replace('\r', "\n");
        Cow::Owned(lf)
    } else if stripped.len() != content.len() {
        Cow::Owned(stripped.to_string())
    } else {
        Cow::Borrowed(content)
    }
}

/// Normalize a unit identity: case-folded, forward slashes, collapsed
/// separators, query suffix and `./` prefix stripped.
pub fn normalize_identity(id: &str) -> String {
    let id = id.split('?').next().unwrap_or(id);
    let mut normalized = id.replace('\\', "/").to_lowercase();
    while normalized.contains("//") {
        normalized = normalized.replace("//", "/");
    }
    let normalized = normalized.strip_prefix("./").unwrap_or(&normalized);
    let normalized = if normalized.len() > 1 {
        normalized.strip_suffix('/').unwrap_or(normalized)
    } else {
        normalized
    };
    normalized.to_string()
}

/// Derives fingerprints for cache-eligible units
#[derive(Debug, Clone)]
pub struct FingerprintEngine {
    feature_digest: String,
    toolchain_digest: String,
    build_mode: String,
    salt: String,
}

impl FingerprintEngine {
    /// Build an engine from resolved configuration
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            feature_digest: config.feature_digest(),
            toolchain_digest: config.toolchain_digest(),
            build_mode: config.build_mode.clone(),
            salt: config.salt.clone(),
        }
    }

    /// Compute the fingerprint for a unit (64 lowercase hex chars).
    ///
    /// `deps_digest` is `Some` only in strict dependency mode.
    pub fn compute(&self, identity: &str, content: &str, deps_digest: Option<&str>) -> String {
        let normalized = normalize_content(content);
        self.compute_normalized(identity, &normalized, deps_digest)
    }

    /// Like [`compute`](Self::compute) but for content the caller has
    /// already normalized (e.g. via the acceleration bridge). Must
    /// receive byte-identical output to [`normalize_content`].
    pub fn compute_normalized(
        &self,
        identity: &str,
        normalized: &str,
        deps_digest: Option<&str>,
    ) -> String {
        let (meta, body) = frontmatter::extract(normalized);
        let canonical_meta = frontmatter::canonical(&meta);

        let mut hasher = Sha256::new();
        update_framed(&mut hasher, body.as_bytes());
        update_framed(&mut hasher, canonical_meta.as_bytes());
        update_framed(&mut hasher, self.feature_digest.as_bytes());
        update_framed(&mut hasher, self.toolchain_digest.as_bytes());
        update_framed(&mut hasher, normalize_identity(identity).as_bytes());
        update_framed(&mut hasher, self.build_mode.as_bytes());
        update_framed(&mut hasher, self.salt.as_bytes());
        if let Some(deps) = deps_digest {
            update_framed(&mut hasher, deps.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// Length-prefix each field so no concatenation of adjacent fields can
/// collide with a different split of the same bytes.
fn update_framed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}
