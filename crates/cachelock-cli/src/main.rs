#![allow(clippy::doc_markdown)]
//! `cachelock` CLI - drive lock contention scenarios against the cache
//!
//! Usage:
//!   `cachelock simulate --threads 8 --keys 16 --overlap 3 --rounds 500`
//!   `cachelock clone --depth 5 --cycle`
//!   `cachelock config --config ./cachelock.toml`

mod model;
mod simulate;

use cachelock_core::{CacheRegistry, CachelockConfig, CloneOutcome, WriteLockManager};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Table};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "cachelock")]
#[command(
    author,
    version,
    about = "cachelock CLI - per-identity cache locks with deadlock avoidance"
)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (defaults to ./cachelock.toml when present)
    #[arg(short, long, global = true, env = "CACHELOCK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Report output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run concurrent merges over overlapping change sets
    Simulate {
        /// Number of merging threads
        #[arg(short, long, default_value = "4")]
        threads: usize,

        /// Size of the key space
        #[arg(short, long, default_value = "16")]
        keys: usize,

        /// Keys shared between consecutive threads' change sets
        #[arg(short, long, default_value = "2")]
        overlap: usize,

        /// Merges per thread
        #[arg(short, long, default_value = "100")]
        rounds: usize,

        /// Report format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Lock a chain of cached records for a clone and list the locked keys
    Clone {
        /// Number of records in the chain
        #[arg(short, long, default_value = "3")]
        depth: usize,

        /// Link the last record back to the first
        #[arg(long)]
        cycle: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<CachelockConfig> {
    let config = match path {
        Some(path) => {
            anyhow::ensure!(path.exists(), "config file not found: {}", path.display());
            CachelockConfig::load_from_path(path)?
        }
        None => CachelockConfig::load()?,
    };
    config.validate()?;
    Ok(config)
}

fn init_logging(config: &CachelockConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    init_logging(&config);

    match cli.command {
        Commands::Simulate {
            threads,
            keys,
            overlap,
            rounds,
            format,
        } => {
            let shape = simulate::SimulationConfig {
                threads,
                keys,
                overlap,
                rounds,
            };
            shape.validate()?;
            tracing::info!(threads, keys, overlap, rounds, "starting simulation");

            let report = simulate::run(shape, config.policy());
            print_report(&report, format)?;

            anyhow::ensure!(
                report.failures() == 0,
                "{} simulation thread(s) failed",
                report.failures()
            );
            anyhow::ensure!(
                report.held_after == 0,
                "{} lock(s) still held after the simulation",
                report.held_after
            );
        }
        Commands::Clone { depth, cycle } => {
            let registry = Arc::new(CacheRegistry::new(config.policy()));
            let manager = WriteLockManager::new(Arc::clone(&registry));
            let session = model::session();
            let Some(root) = model::cached_chain(&registry, depth, cycle)? else {
                anyhow::bail!("--depth must be at least 1");
            };

            match manager.acquire_locks_for_clone(&root, &session)? {
                CloneOutcome::Locked(mut locks) => {
                    println!("Locked {} entries:", locks.len());
                    for key in locks.locks().keys() {
                        println!("  {key}");
                    }
                    let report = locks.release_all();
                    println!("Released {} entries", report.released);
                }
                CloneOutcome::Refresh(key) => {
                    println!("{key} must be refreshed before cloning");
                }
            }
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

fn print_report(report: &simulate::SimulationReport, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec!["Thread", "Merges", "Elapsed (ms)", "Error"]);
            for t in &report.threads {
                table.add_row(vec![
                    t.thread.to_string(),
                    t.merges.to_string(),
                    t.elapsed_ms.to_string(),
                    t.error.clone().unwrap_or_default(),
                ]);
            }
            println!("{table}");
            println!("Total elapsed:  {} ms", report.elapsed_ms);
            println!("Held after:     {}", report.held_after);
            println!("Queued after:   {}", report.queued_after);
        }
    }
    Ok(())
}
