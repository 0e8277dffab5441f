//! Observability events and aggregation
//!
//! Every coordinator transition produces a [`CacheEvent`]. The emitter
//! renders them per the configured verbosity: nothing, a single
//! aggregate line, one human line per unit, or machine-parsable JSON
//! lines. The structured schema is stable and additive-only.
//!
//! Emission must never fail the pipeline — sinks are fire-and-forget.

use crate::config::Verbosity;
use chrono::Utc;
use serde::Serialize;
use std::sync::Mutex;
use tracing::warn;

/// Structured event record, one JSON object per line when rendered
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "evt", rename_all = "snake_case")]
pub enum CacheEvent {
    CacheMiss {
        ts: i64,
        rel: String,
    },
    CacheWrite {
        ts: i64,
        rel: String,
        #[serde(rename = "durationMs")]
        duration_ms: u64,
        #[serde(rename = "sizeBytes")]
        size_bytes: u64,
    },
    CacheHit {
        ts: i64,
        rel: String,
        #[serde(rename = "durationMs")]
        duration_ms: u64,
        #[serde(rename = "sizeBytes", skip_serializing_if = "Option::is_none")]
        size_bytes: Option<u64>,
    },
    Summary {
        ts: i64,
        total: usize,
        hits: usize,
        misses: usize,
        #[serde(rename = "hitRate")]
        hit_rate: f64,
        p50: u64,
        p95: u64,
        #[serde(rename = "savedMs")]
        saved_ms: u64,
    },
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Where rendered lines go. Implementations must not block for long
/// and must not panic; the default writes to stderr.
pub trait EventSink: Send + Sync {
    fn line(&self, line: &str);
}

/// Default sink: one line per event on stderr
#[derive(Debug, Default)]
pub struct StderrSink;

impl EventSink for StderrSink {
    fn line(&self, line: &str) {
        eprintln!("{}", line);
    }
}

/// Sink that captures lines in memory, for tests and embedding
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn take(&self) -> Vec<String> {
        self.lines.lock().map(|mut l| std::mem::take(&mut *l)).unwrap_or_default()
    }
}

impl EventSink for MemorySink {
    fn line(&self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
    }
}

/// Aggregate counters for one pipeline pass
#[derive(Debug, Default, Clone)]
struct PassStats {
    hits: usize,
    misses: usize,
    durations_ms: Vec<u64>,
    saved_ms: u64,
}

/// Final aggregate for a pass
#[derive(Debug, Clone, PartialEq)]
pub struct PassSummary {
    pub total: usize,
    pub hits: usize,
    pub misses: usize,
    pub hit_rate: f64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub saved_ms: u64,
}

/// Index into sorted durations at `floor(len * p)`, clamped
fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((sorted.len() as f64 * p).floor() as usize).min(sorted.len() - 1);
    sorted[idx]
}

/// Format bytes as human-readable size (e.g., "1.5 MB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Renders coordinator events and accumulates pass statistics
pub struct Emitter {
    verbosity: Verbosity,
    sink: Box<dyn EventSink>,
    stats: Mutex<PassStats>,
}

impl Emitter {
    /// Emitter with the default stderr sink
    pub fn new(verbosity: Verbosity) -> Self {
        Self::with_sink(verbosity, Box::new(StderrSink))
    }

    /// Emitter with a caller-supplied sink
    pub fn with_sink(verbosity: Verbosity, sink: Box<dyn EventSink>) -> Self {
        Self {
            verbosity,
            sink,
            stats: Mutex::new(PassStats::default()),
        }
    }

    /// Record a cache miss for `rel`
    pub fn miss(&self, rel: &str) {
        self.with_stats(|s| s.misses += 1);
        let event = CacheEvent::CacheMiss {
            ts: now_ms(),
            rel: rel.to_string(),
        };
        self.render(&event, || format!("MISS  {}", rel));
    }

    /// Record a post-phase write: `duration_ms` is the miss-to-write
    /// span, `size_bytes` the persisted payload size
    pub fn write(&self, rel: &str, duration_ms: u64, size_bytes: u64) {
        self.with_stats(|s| s.durations_ms.push(duration_ms));
        let event = CacheEvent::CacheWrite {
            ts: now_ms(),
            rel: rel.to_string(),
            duration_ms,
            size_bytes,
        };
        self.render(&event, || {
            format!(
                "WRITE {} ({}ms, {})",
                rel,
                duration_ms,
                format_bytes(size_bytes)
            )
        });
    }

    /// Record a hit: `duration_ms` is the lookup time, `saved_ms` the
    /// original miss duration persisted in the entry's metadata (0 when
    /// the entry predates the metric)
    pub fn hit(&self, rel: &str, duration_ms: u64, size_bytes: Option<u64>, saved_ms: u64) {
        self.with_stats(|s| {
            s.hits += 1;
            s.durations_ms.push(duration_ms);
            s.saved_ms += saved_ms;
        });
        let event = CacheEvent::CacheHit {
            ts: now_ms(),
            rel: rel.to_string(),
            duration_ms,
            size_bytes,
        };
        self.render(&event, || match size_bytes {
            Some(size) => format!("HIT   {} ({}ms, {})", rel, duration_ms, format_bytes(size)),
            None => format!("HIT   {} ({}ms)", rel, duration_ms),
        });
    }

    /// Close the pass: compute the aggregate, emit it per verbosity,
    /// and reset the counters for the next pass.
    pub fn finish(&self) -> PassSummary {
        let stats = self
            .stats
            .lock()
            .map(|mut s| std::mem::take(&mut *s))
            .unwrap_or_default();

        let total = stats.hits + stats.misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            stats.hits as f64 / total as f64
        };
        let mut durations = stats.durations_ms;
        durations.sort_unstable();

        let summary = PassSummary {
            total,
            hits: stats.hits,
            misses: stats.misses,
            hit_rate,
            p50_ms: percentile(&durations, 0.5),
            p95_ms: percentile(&durations, 0.95),
            saved_ms: stats.saved_ms,
        };

        match self.verbosity {
            Verbosity::Silent => {}
            Verbosity::Structured => {
                let event = CacheEvent::Summary {
                    ts: now_ms(),
                    total: summary.total,
                    hits: summary.hits,
                    misses: summary.misses,
                    hit_rate: summary.hit_rate,
                    p50: summary.p50_ms,
                    p95: summary.p95_ms,
                    saved_ms: summary.saved_ms,
                };
                self.emit_json(&event);
            }
            Verbosity::Summary | Verbosity::Verbose => {
                self.sink.line(&format!(
                    "cache: {} units, {} hits ({:.1}%), p50 {}ms, p95 {}ms, saved {}ms",
                    summary.total,
                    summary.hits,
                    summary.hit_rate * 100.0,
                    summary.p50_ms,
                    summary.p95_ms,
                    summary.saved_ms
                ));
            }
        }

        summary
    }

    fn with_stats(&self, f: impl FnOnce(&mut PassStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }

    fn render(&self, event: &CacheEvent, human: impl FnOnce() -> String) {
        match self.verbosity {
            Verbosity::Silent | Verbosity::Summary => {}
            Verbosity::Verbose => self.sink.line(&human()),
            Verbosity::Structured => self.emit_json(event),
        }
    }

    fn emit_json(&self, event: &CacheEvent) {
        match serde_json::to_string(event) {
            Ok(line) => self.sink.line(&line),
            Err(e) => warn!("Failed to serialize cache event: {}", e),
        }
    }
}
