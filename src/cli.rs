//! Command-line interface
//!
//! Maintenance commands over the store: inspect, clear, warm, verify.
//! The two-phase protocol itself is driven by a host pipeline through
//! the library API, not from here.

use crate::config::{CacheConfig, CacheOptions, ConfigFile};
use crate::coordinator::{CacheCoordinator, TransformOutput, WarmEntry};
use crate::error::{CacheError, CacheResult};
use crate::events::format_bytes;
use crate::store::{CacheStore, DiskStore};
use clap::{Args, Parser, Subcommand};
use console::style;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "fastmd-cache")]
#[command(about = "Content-addressed build cache for markdown pipelines")]
#[command(version)]
pub struct Cli {
    /// Cache directory (overrides config file)
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show entry count and total payload size
    Stats,
    /// Remove all cache entries
    Clear,
    /// Scan for entries that fail to decode
    Verify,
    /// Pre-populate the store from a JSON manifest
    Warm(WarmArgs),
}

#[derive(Args, Debug)]
pub struct WarmArgs {
    /// Manifest file: a JSON array of {id, content, output, map?}
    #[arg(long)]
    pub manifest: PathBuf,
}

/// Manifest row for `warm`
#[derive(Debug, Deserialize)]
struct ManifestEntry {
    id: String,
    content: String,
    output: String,
    #[serde(default)]
    map: Option<String>,
}

/// Default config file location: `<platform config dir>/fastmd/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fastmd")
        .join("config.toml")
}

/// Resolve configuration from CLI flags, file, and environment
pub fn resolve_config(cli: &Cli) -> CacheResult<CacheConfig> {
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let file = ConfigFile::load(&config_path)?;
    let opts = CacheOptions {
        cache_dir: cli.cache_dir.clone(),
        ..Default::default()
    };
    Ok(CacheConfig::resolve(opts, file))
}

pub async fn stats(config: &CacheConfig) -> CacheResult<()> {
    let store = DiskStore::new(&config.cache_dir);
    let (count, bytes) = store.stats().await?;
    println!(
        "{} entries, {} ({})",
        count,
        format_bytes(bytes),
        config.cache_dir.display()
    );
    Ok(())
}

pub async fn clear(config: &CacheConfig) -> CacheResult<()> {
    let store = DiskStore::new(&config.cache_dir);
    let removed = store.clear().await?;
    info!("Cleared {} entries from {}", removed, config.cache_dir.display());
    println!("Removed {} entries", removed);
    Ok(())
}

pub async fn verify(config: &CacheConfig) -> CacheResult<()> {
    let store = DiskStore::new(&config.cache_dir);
    let corrupt = store.find_corrupt().await?;
    if corrupt.is_empty() {
        println!("{} all entries decode cleanly", style("ok:").green());
    } else {
        println!(
            "{} {} corrupt entries (next write heals, or run clear)",
            style("warning:").yellow(),
            corrupt.len()
        );
        for fp in corrupt {
            println!("  {}", fp);
        }
    }
    Ok(())
}

pub async fn warm(config: &CacheConfig, args: &WarmArgs) -> CacheResult<()> {
    let raw = tokio::fs::read_to_string(&args.manifest)
        .await
        .map_err(|e| {
            CacheError::io(format!("reading manifest {}", args.manifest.display()), e)
        })?;
    let rows: Vec<ManifestEntry> = serde_json::from_str(&raw)?;

    let entries: Vec<WarmEntry> = rows
        .into_iter()
        .map(|row| {
            let mut output = TransformOutput::new(row.output);
            if let Some(map) = row.map {
                output = output.with_secondary(map);
            }
            WarmEntry {
                id: row.id,
                content: row.content,
                output,
            }
        })
        .collect();

    let store = DiskStore::new(&config.cache_dir);
    let coordinator = CacheCoordinator::new(config, store);
    let written = coordinator.warm(&entries).await?;
    println!("Warmed {} of {} entries", written, entries.len());
    Ok(())
}
