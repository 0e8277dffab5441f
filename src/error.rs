//! Error types for fastmd-cache
//!
//! All modules use `CacheResult<T>` as their return type. Only
//! `ContentRead` is allowed to fail a build: store and acceleration
//! faults are absorbed at the coordinator/bridge boundary and degrade
//! to a cache miss.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// All errors that can occur in fastmd-cache
#[derive(Error, Debug)]
pub enum CacheError {
    // Content errors — the only fatal class
    #[error("Failed to read content for {path}: {source}")]
    ContentRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Invalid {name} value: {value}")]
    ConfigValue { name: String, value: String },

    // Store errors — absorbed by the coordinator. Read faults never
    // become errors at all: the store folds them into a miss.
    #[error("Cache store write failed for {fingerprint}: {source}")]
    StoreWrite {
        fingerprint: String,
        #[source]
        source: std::io::Error,
    },

    // Acceleration errors — absorbed by the bridge
    #[error("Accelerator {name} failed: {reason}")]
    Accel { name: String, reason: String },

    #[error("Accelerator {name} timed out after {timeout_ms}ms")]
    AccelTimeout { name: String, timeout_ms: u64 },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a content read error
    pub fn content_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ContentRead {
            path: path.into(),
            source,
        }
    }

    /// Create a store write error
    pub fn store_write(fingerprint: impl Into<String>, source: std::io::Error) -> Self {
        Self::StoreWrite {
            fingerprint: fingerprint.into(),
            source,
        }
    }

    /// Create an acceleration error
    pub fn accel(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Accel {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error may fail the build.
    ///
    /// Everything except a content read failure degrades to "cache did
    /// not help this time".
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ContentRead { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CacheError::ConfigValue {
            name: "FASTMD_CACHE_DEPS".to_string(),
            value: "bogus".to_string(),
        };
        assert!(err.to_string().contains("FASTMD_CACHE_DEPS"));
    }

    #[test]
    fn content_read_is_fatal() {
        let err = CacheError::content_read(
            "/docs/a.md",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.is_fatal());
    }

    #[test]
    fn store_write_is_not_fatal() {
        let err = CacheError::store_write(
            "abc123",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "ro"),
        );
        assert!(!err.is_fatal());
    }
}
