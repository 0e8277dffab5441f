//! fastmd-cache - store maintenance CLI
//!
//! Entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use fastmd_cache::cli::{self, Cli, Commands};
use fastmd_cache::error::CacheResult;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> CacheResult<()> {
    let cli = Cli::parse();

    // Logging: 0 = warn, 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("fastmd_cache=warn"),
        1 => EnvFilter::new("fastmd_cache=info"),
        _ => EnvFilter::new("fastmd_cache=debug"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let config = cli::resolve_config(&cli)?;

    match &cli.command {
        Commands::Stats => cli::stats(&config).await,
        Commands::Clear => cli::clear(&config).await,
        Commands::Verify => cli::verify(&config).await,
        Commands::Warm(args) => cli::warm(&config, args).await,
    }
}
