//! Configuration for fastmd-cache
//!
//! Everything is resolved once, up front, into a [`CacheConfig`] that the
//! rest of the crate receives by reference — no module reads the
//! environment ambiently. Precedence: environment > caller options >
//! config file > defaults.

use crate::error::{CacheError, CacheResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable names recognized during resolution
pub mod env_keys {
    /// Overrides the cache storage directory
    pub const CACHE_DIR: &str = "FASTMD_CACHE_DIR";
    /// Overrides the fingerprint salt
    pub const SALT: &str = "FASTMD_CACHE_SALT";
    /// Overrides the emitter verbosity (silent|summary|verbose|structured)
    pub const LOG: &str = "FASTMD_CACHE_LOG";
    /// Overrides dependency tracking mode (strict|loose)
    pub const DEPS: &str = "FASTMD_CACHE_DEPS";
    /// Opts in to the acceleration bridge ("1" or "true")
    pub const ACCEL: &str = "FASTMD_ACCEL";
}

/// Emitter verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    /// No output at all
    Silent,
    /// One aggregate line per pass
    #[default]
    Summary,
    /// One human line per unit
    Verbose,
    /// One JSON object per event, plus a final aggregate record
    Structured,
}

impl FromStr for Verbosity {
    type Err = CacheError;

    fn from_str(s: &str) -> CacheResult<Self> {
        match s {
            "silent" => Ok(Self::Silent),
            "summary" => Ok(Self::Summary),
            "verbose" => Ok(Self::Verbose),
            "structured" | "json" => Ok(Self::Structured),
            other => Err(CacheError::ConfigValue {
                name: env_keys::LOG.to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Dependency tracking mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DepsMode {
    /// Dependency file stats contribute to the fingerprint
    Strict,
    /// Dependency term omitted entirely — cheaper, less precise
    #[default]
    Loose,
}

impl FromStr for DepsMode {
    type Err = CacheError;

    fn from_str(s: &str) -> CacheResult<Self> {
        match s {
            "strict" => Ok(Self::Strict),
            "loose" => Ok(Self::Loose),
            other => Err(CacheError::ConfigValue {
                name: env_keys::DEPS.to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Caller-supplied options, all optional. Anything left `None` falls
/// through to the config file and then the defaults.
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    pub cache_dir: Option<PathBuf>,
    pub salt: Option<String>,
    pub verbosity: Option<Verbosity>,
    pub deps_mode: Option<DepsMode>,
    pub accel: Option<bool>,
    pub build_mode: Option<String>,
    /// Feature flags that contribute to the feature digest
    pub features: BTreeMap<String, String>,
    /// Resolved versions of everything that can change output
    pub toolchain: BTreeMap<String, String>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

/// On-disk config file schema (TOML)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub cache_dir: Option<PathBuf>,
    pub salt: Option<String>,
    pub verbosity: Option<Verbosity>,
    pub deps_mode: Option<DepsMode>,
    pub accel: Option<bool>,
    pub build_mode: Option<String>,
    pub features: BTreeMap<String, String>,
    pub toolchain: BTreeMap<String, String>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl ConfigFile {
    /// Load a config file, tolerating absence
    pub fn load(path: &Path) -> CacheResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| CacheError::io(format!("reading config from {}", path.display()), e))?;
        toml::from_str(&content).map_err(|e| CacheError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// Fully resolved configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Root directory of the content-addressable store
    pub cache_dir: PathBuf,
    /// Caller salt mixed into every fingerprint
    pub salt: String,
    /// Emitter verbosity
    pub verbosity: Verbosity,
    /// Whether dependency stats contribute to fingerprints
    pub deps_mode: DepsMode,
    /// Whether the acceleration bridge may load at all
    pub accel: bool,
    /// Build mode token (e.g. "development", "production")
    pub build_mode: String,
    /// Feature flags contributing to the feature digest
    pub features: BTreeMap<String, String>,
    /// Toolchain descriptor contributing to the toolchain digest
    pub toolchain: BTreeMap<String, String>,
    /// Eligibility include patterns, compiled by the host
    pub include: Vec<String>,
    /// Eligibility exclude patterns, compiled by the host
    pub exclude: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::resolve(CacheOptions::default(), ConfigFile::default())
    }
}

impl CacheConfig {
    /// Default store location: `<platform cache dir>/fastmd`
    pub fn default_cache_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from(".cache"))
            .join("fastmd")
    }

    /// Resolve configuration with documented precedence:
    /// environment > caller options > config file > defaults.
    ///
    /// Malformed environment values are ignored (with a warning) rather
    /// than failing resolution — the environment is the least trusted
    /// layer.
    pub fn resolve(opts: CacheOptions, file: ConfigFile) -> Self {
        let env_dir = std::env::var(env_keys::CACHE_DIR).ok().map(PathBuf::from);
        let env_salt = std::env::var(env_keys::SALT).ok();
        let env_verbosity = Self::env_parse::<Verbosity>(env_keys::LOG);
        let env_deps = Self::env_parse::<DepsMode>(env_keys::DEPS);
        let env_accel = std::env::var(env_keys::ACCEL)
            .ok()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"));

        Self {
            cache_dir: env_dir
                .or(opts.cache_dir)
                .or(file.cache_dir)
                .unwrap_or_else(Self::default_cache_dir),
            salt: env_salt.or(opts.salt).or(file.salt).unwrap_or_default(),
            verbosity: env_verbosity
                .or(opts.verbosity)
                .or(file.verbosity)
                .unwrap_or_default(),
            deps_mode: env_deps
                .or(opts.deps_mode)
                .or(file.deps_mode)
                .unwrap_or_default(),
            accel: env_accel.or(opts.accel).or(file.accel).unwrap_or(false),
            build_mode: opts
                .build_mode
                .or(file.build_mode)
                .unwrap_or_else(|| "production".to_string()),
            features: if opts.features.is_empty() {
                file.features
            } else {
                opts.features
            },
            toolchain: if opts.toolchain.is_empty() {
                file.toolchain
            } else {
                opts.toolchain
            },
            include: if opts.include.is_empty() {
                file.include
            } else {
                opts.include
            },
            exclude: if opts.exclude.is_empty() {
                file.exclude
            } else {
                opts.exclude
            },
        }
    }

    fn env_parse<T: FromStr<Err = CacheError>>(key: &str) -> Option<T> {
        let raw = std::env::var(key).ok()?;
        match raw.parse() {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("Ignoring {}: {}", key, e);
                None
            }
        }
    }

    /// Digest of the feature-flag map (sorted key=value lines)
    pub fn feature_digest(&self) -> String {
        digest_map(&self.features)
    }

    /// Digest of the toolchain descriptor (sorted key=value lines)
    pub fn toolchain_digest(&self) -> String {
        digest_map(&self.toolchain)
    }
}

/// Hash a sorted map as `key=value\n` lines. BTreeMap iteration order
/// makes this canonical regardless of insertion order.
fn digest_map(map: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (k, v) in map {
        hasher.update(k.as_bytes());
        hasher.update(b"=");
        hasher.update(v.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}
