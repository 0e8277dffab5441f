//! Acceleration bridge
//!
//! Optional fast-path for the pure functions the fingerprint pipeline
//! leans on: content normalization and dependency digesting. Providers
//! are injected by the caller and probed in order; the first one whose
//! probe output is byte-identical to the reference implementation
//! wins. The bridge is never active without explicit opt-in, and any
//! fault after selection poisons it for the rest of the run — no
//! retries, no partial trust.

pub mod sidecar;

pub use sidecar::SidecarAccelerator;

use crate::config::CacheConfig;
use crate::deps;
use crate::error::CacheResult;
use crate::fingerprint::normalize_content;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Probe input exercising BOM stripping and CRLF normalization
const PROBE_CONTENT: &str = "\u{FEFF}---\ntitle: probe\n---\r\n# Probe\r\n";

/// A provider of accelerated pure functions.
///
/// Hard invariant: for all valid inputs the output must be
/// byte-identical to the reference implementation. A provider that
/// drifts is dropped for the run, never consulted again.
#[async_trait]
pub trait Accelerator: Send + Sync {
    fn name(&self) -> &str;

    /// BOM-stripped, LF-normalized content
    async fn normalize(&self, content: &str) -> CacheResult<String>;

    /// Digest over sorted (path, size, mtime) dependency stats
    async fn deps_digest(&self, paths: &[PathBuf]) -> CacheResult<String>;
}

/// In-process reference implementation
#[derive(Debug, Default)]
pub struct ReferenceAccelerator;

#[async_trait]
impl Accelerator for ReferenceAccelerator {
    fn name(&self) -> &str {
        "reference"
    }

    async fn normalize(&self, content: &str) -> CacheResult<String> {
        Ok(normalize_content(content).into_owned())
    }

    async fn deps_digest(&self, paths: &[PathBuf]) -> CacheResult<String> {
        Ok(deps::collect(paths).await)
    }
}

/// Selects and supervises an accelerated provider, falling back to the
/// reference implementation permanently on any fault.
pub struct AccelBridge {
    active: Option<Box<dyn Accelerator>>,
    poisoned: AtomicBool,
}

impl AccelBridge {
    /// A bridge that only ever uses the reference implementation
    pub fn reference() -> Self {
        Self {
            active: None,
            poisoned: AtomicBool::new(false),
        }
    }

    /// Load under the resolved configuration: `providers` are probed
    /// only when the config opted in (`FASTMD_ACCEL`, caller options,
    /// or the config file).
    pub async fn from_config(config: &CacheConfig, providers: Vec<Box<dyn Accelerator>>) -> Self {
        Self::load(providers, config.accel).await
    }

    /// Probe `providers` in order and select the first whose probe
    /// output matches the reference byte-for-byte. With `opt_in` false
    /// no provider is even probed.
    pub async fn load(providers: Vec<Box<dyn Accelerator>>, opt_in: bool) -> Self {
        if !opt_in {
            debug!("Acceleration not opted in, using reference implementation");
            return Self::reference();
        }

        let expected = normalize_content(PROBE_CONTENT).into_owned();
        for provider in providers {
            match provider.normalize(PROBE_CONTENT).await {
                Ok(out) if out == expected => {
                    info!("Accelerator selected: {}", provider.name());
                    return Self {
                        active: Some(provider),
                        poisoned: AtomicBool::new(false),
                    };
                }
                Ok(_) => {
                    warn!(
                        "Accelerator {} failed equivalence probe, skipping",
                        provider.name()
                    );
                }
                Err(e) => {
                    warn!("Accelerator {} probe failed: {}", provider.name(), e);
                }
            }
        }
        Self::reference()
    }

    /// Whether calls currently go through an accelerated provider
    pub fn is_accelerated(&self) -> bool {
        self.active.is_some() && !self.poisoned.load(Ordering::Relaxed)
    }

    fn poison(&self, name: &str, reason: &str) {
        warn!(
            "Accelerator {} misbehaved ({}), falling back to reference for the rest of the run",
            name, reason
        );
        self.poisoned.store(true, Ordering::Relaxed);
    }

    /// Normalize content through the active provider, or the reference
    pub async fn normalize(&self, content: &str) -> String {
        if self.is_accelerated() {
            let provider = self.active.as_ref().unwrap();
            match provider.normalize(content).await {
                Ok(out) => return out,
                Err(e) => self.poison(provider.name(), &e.to_string()),
            }
        }
        normalize_content(content).into_owned()
    }

    /// Dependency digest through the active provider, or the reference
    pub async fn deps_digest(&self, paths: &[PathBuf]) -> String {
        if self.is_accelerated() {
            let provider = self.active.as_ref().unwrap();
            match provider.deps_digest(paths).await {
                Ok(out) => return out,
                Err(e) => self.poison(provider.name(), &e.to_string()),
            }
        }
        deps::collect(paths).await
    }
}
