//! Two-phase cache coordinator
//!
//! The host pipeline calls [`CacheCoordinator::pre`] before it
//! transforms a unit and [`CacheCoordinator::post`] after. Between the
//! two, a pending record correlates the unit with the fingerprint
//! computed at pre-time. Per (pass, unit) the lifecycle is:
//!
//! NotTracked → Served (pre hit, pipeline short-circuits)
//! NotTracked → Pending → Written (pre miss, post persists)
//! NotTracked → Pending → Abandoned (pass ends, record dropped)
//!
//! The host guarantees `pre` precedes `post` for the same unit within a
//! pass. Units are disjoint keys, so there is no cross-unit
//! synchronization — the pending table is behind a mutex only because
//! the host may drive many units concurrently.

use crate::accel::AccelBridge;
use crate::config::{CacheConfig, DepsMode};
use crate::error::{CacheError, CacheResult};
use crate::events::{Emitter, PassSummary};
use crate::fingerprint::{normalize_identity, FingerprintEngine};
use crate::store::{CacheStore, EntryMeta, Lookup, PutOutcome};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

/// Eligibility predicate over normalized unit identities. Glob
/// compilation is the host's concern; the coordinator only consults
/// the verdict.
pub type EligibilityFn = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// One content unit as supplied by the host at pre-time
#[derive(Debug, Clone)]
pub struct Unit {
    /// Unit identity (relative path, possibly with query suffix)
    pub id: String,
    /// Raw content, exactly as the host read it
    pub content: String,
    /// Declared dependency files (strict mode only)
    pub dependencies: Vec<PathBuf>,
}

impl Unit {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<PathBuf>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Read a unit's content from disk. This is the one fatal read in
    /// the system: without content there is no caching decision and no
    /// transformation either.
    pub async fn read(id: impl Into<String>, path: &Path) -> CacheResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CacheError::content_read(path, e))?;
        Ok(Self::new(id, content))
    }
}

/// Transformed output, as produced by the pipeline or served from the
/// store: the generated module plus an optional source map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutput {
    pub primary: Vec<u8>,
    pub secondary: Option<Vec<u8>>,
}

impl TransformOutput {
    pub fn new(primary: impl Into<Vec<u8>>) -> Self {
        Self {
            primary: primary.into(),
            secondary: None,
        }
    }

    pub fn with_secondary(mut self, secondary: impl Into<Vec<u8>>) -> Self {
        self.secondary = Some(secondary.into());
        self
    }
}

/// Precomputed triple for out-of-band store population
#[derive(Debug, Clone)]
pub struct WarmEntry {
    pub id: String,
    pub content: String,
    pub output: TransformOutput,
}

#[derive(Debug)]
struct PendingWrite {
    fingerprint: String,
    started_at: Instant,
}

/// Orchestrates fingerprinting, store access, and event emission
/// across the pre/post interception points of one pipeline pass.
pub struct CacheCoordinator<S: CacheStore> {
    engine: FingerprintEngine,
    store: S,
    bridge: AccelBridge,
    emitter: Emitter,
    deps_mode: DepsMode,
    toolchain_digest: String,
    feature_digest: String,
    eligibility: EligibilityFn,
    pending: Mutex<HashMap<String, PendingWrite>>,
}

impl<S: CacheStore> CacheCoordinator<S> {
    /// Coordinator with the reference bridge and an emitter built from
    /// the config's verbosity
    pub fn new(config: &CacheConfig, store: S) -> Self {
        Self {
            engine: FingerprintEngine::new(config),
            store,
            bridge: AccelBridge::reference(),
            emitter: Emitter::new(config.verbosity),
            deps_mode: config.deps_mode,
            toolchain_digest: config.toolchain_digest(),
            feature_digest: config.feature_digest(),
            eligibility: Box::new(|_: &str| true),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the emitter (e.g. to capture events)
    pub fn with_emitter(mut self, emitter: Emitter) -> Self {
        self.emitter = emitter;
        self
    }

    /// Install a loaded acceleration bridge
    pub fn with_bridge(mut self, bridge: AccelBridge) -> Self {
        self.bridge = bridge;
        self
    }

    /// Install the host's eligibility predicate
    pub fn with_eligibility(mut self, eligibility: EligibilityFn) -> Self {
        self.eligibility = eligibility;
        self
    }

    /// Borrow the underlying store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The fingerprint this coordinator derives for a unit
    pub async fn fingerprint_for(&self, unit: &Unit) -> String {
        let rel = normalize_identity(&unit.id);
        let deps_digest = match self.deps_mode {
            DepsMode::Strict => Some(self.bridge.deps_digest(&unit.dependencies).await),
            DepsMode::Loose => None,
        };
        let normalized = self.bridge.normalize(&unit.content).await;
        self.engine
            .compute_normalized(&rel, &normalized, deps_digest.as_deref())
    }

    /// Pre-transformation interception point.
    ///
    /// Returns the stored output on a hit, short-circuiting the
    /// pipeline's own transformation. On a miss (including a corrupted
    /// entry) a pending record is created and `None` returned so the
    /// pipeline proceeds. Ineligible units bypass with no side effects.
    pub async fn pre(&self, unit: &Unit) -> CacheResult<Option<TransformOutput>> {
        let rel = normalize_identity(&unit.id);
        if !(self.eligibility)(&rel) {
            trace!("Bypassing ineligible unit {}", rel);
            return Ok(None);
        }

        let fingerprint = self.fingerprint_for(unit).await;
        let lookup_start = Instant::now();

        match self.store.get(&fingerprint).await {
            Lookup::Hit(entry) => {
                let duration_ms = lookup_start.elapsed().as_millis() as u64;
                debug!("Cache hit for {} ({})", rel, fingerprint);
                self.emitter.hit(
                    &rel,
                    duration_ms,
                    Some(entry.meta.size_bytes),
                    entry.meta.duration_ms,
                );
                Ok(Some(TransformOutput {
                    primary: entry.primary,
                    secondary: entry.secondary,
                }))
            }
            lookup @ (Lookup::Miss | Lookup::Corrupted) => {
                if matches!(lookup, Lookup::Corrupted) {
                    debug!("Corrupt entry for {} degrades to a miss", rel);
                }
                self.pending.lock().await.insert(
                    rel.clone(),
                    PendingWrite {
                        fingerprint,
                        started_at: Instant::now(),
                    },
                );
                self.emitter.miss(&rel);
                Ok(None)
            }
        }
    }

    /// Post-transformation interception point.
    ///
    /// No-op unless a pending record exists for the unit (ineligible,
    /// already served, or untracked units all fall through silently).
    /// Store write faults are absorbed: the pipeline already has its
    /// output, the cache just didn't help this time.
    pub async fn post(&self, unit_id: &str, output: &TransformOutput) {
        let rel = normalize_identity(unit_id);
        let Some(pending) = self.pending.lock().await.remove(&rel) else {
            trace!("No pending record for {}, ignoring post", rel);
            return;
        };

        let duration_ms = pending.started_at.elapsed().as_millis() as u64;
        let size_bytes = output.primary.len() as u64;
        let meta = EntryMeta::new(
            self.toolchain_digest.clone(),
            self.feature_digest.clone(),
            size_bytes,
            duration_ms,
        );

        match self
            .store
            .put(
                &pending.fingerprint,
                &output.primary,
                output.secondary.as_deref(),
                meta,
            )
            .await
        {
            Ok(outcome) => {
                if outcome == PutOutcome::AlreadyPresent {
                    trace!("Entry for {} already present (racing writer)", rel);
                }
                // A lost race still counts: an equivalent entry exists
                self.emitter.write(&rel, duration_ms, size_bytes);
            }
            Err(e) => {
                warn!("Cache write failed for {}: {}", rel, e);
            }
        }
    }

    /// Pre-populate the store out of band from precomputed triples,
    /// deriving the identical fingerprints `pre` would derive.
    /// Returns how many entries were freshly written.
    pub async fn warm(&self, entries: &[WarmEntry]) -> CacheResult<usize> {
        let mut written = 0;
        for entry in entries {
            let unit = Unit::new(&entry.id, &entry.content);
            let fingerprint = self.fingerprint_for(&unit).await;
            let meta = EntryMeta::new(
                self.toolchain_digest.clone(),
                self.feature_digest.clone(),
                entry.output.primary.len() as u64,
                0,
            );
            let outcome = self
                .store
                .put(
                    &fingerprint,
                    &entry.output.primary,
                    entry.output.secondary.as_deref(),
                    meta,
                )
                .await?;
            if outcome == PutOutcome::Written {
                written += 1;
            }
        }
        debug!("Warmed {} of {} entries", written, entries.len());
        Ok(written)
    }

    /// End the pass: abandoned pending records are dropped with no
    /// corrective action (no partial writes exist to roll back), and
    /// the emitter produces the aggregate.
    pub async fn finish(&self) -> PassSummary {
        let abandoned = {
            let mut pending = self.pending.lock().await;
            let n = pending.len();
            pending.clear();
            n
        };
        if abandoned > 0 {
            debug!("Abandoning {} pending cache records", abandoned);
        }
        self.emitter.finish()
    }
}
