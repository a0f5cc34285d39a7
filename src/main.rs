mod batch;
mod config;
mod ept;
mod error;
mod hierarchy;
mod inspect;
mod merge;
mod quadtree;
mod spatial_extent;
#[cfg(test)]
mod testing;
mod tiles;

use crate::batch::{audit_outputs, TileBatch};
use crate::config::Config;
use crate::ept::{EptSource, HttpTransport};
use crate::inspect::ClassificationReport;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Downloads ground-classified tiles from an Entwine Point Tile archive.
#[derive(Parser, Debug)]
#[command(name = "ept_ground_tiles", version, about)]
struct Args {
    /// Batch configuration file.
    #[arg(long, short, default_value = "ept_ground_tiles.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch every tile of the study area that has no output yet (default).
    Run {
        #[arg(long)]
        output_dir: Option<PathBuf>,

        #[arg(long)]
        fetch_workers: Option<usize>,
    },
    /// Check that the archive metadata is reachable.
    Ping,
    /// Report tile files below a size threshold, optionally deleting them.
    Audit {
        /// Defaults to `min_existing_bytes` from the configuration.
        #[arg(long)]
        min_bytes: Option<u64>,

        #[arg(long, default_value_t = false)]
        delete: bool,
    },
    /// Print the classification breakdown of a LAS/LAZ file.
    Inspect { path: PathBuf },
}

fn source(config: &Config) -> Result<EptSource> {
    let transport = HttpTransport::new(config.max_retries).context("Failed to create HTTP client")?;

    Ok(EptSource::new(&config.ept_url, Arc::new(transport), config.timeouts()))
}

fn run(mut config: Config, output_dir: Option<PathBuf>, fetch_workers: Option<usize>) -> Result<()> {
    if let Some(output_dir) = output_dir {
        config.output_dir = output_dir;
    }

    if let Some(fetch_workers) = fetch_workers {
        config.fetch_workers = fetch_workers;
    }

    config.validate()?;

    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("Failed to create {}", config.output_dir.display()))?;

    let source = source(&config)?;

    let batch = TileBatch::new(config, source).context("Failed to build fetch pool")?;

    info!("{} tiles in study area", batch.tiles().len());

    let summary = batch.run().context("Could not reach EPT endpoint")?;

    for (name, reason) in &summary.failures {
        warn!("{}: {}", name, reason);
    }

    if summary.failed > 0 {
        bail!("{} of {} tiles failed", summary.failed, summary.total());
    }

    Ok(())
}

fn ping(config: &Config) -> Result<()> {
    let source = source(config)?;

    let metadata = source
        .metadata()
        .with_context(|| format!("Could not reach {}", source.metadata_url()))?;

    println!("Endpoint OK: {}", source.metadata_url());
    println!("Bounds: {:?}", metadata.bounds);
    println!("Points: {}", metadata.points);

    Ok(())
}

fn audit(config: &Config, min_bytes: Option<u64>, delete: bool) -> Result<()> {
    let min_bytes = min_bytes.unwrap_or(config.min_existing_bytes);

    let report = audit_outputs(&config.output_dir, &config.file_prefix, min_bytes)
        .with_context(|| format!("Failed to scan {}", config.output_dir.display()))?;

    println!("Valid tiles:      {}", report.valid.len());
    println!("Undersized tiles: {}", report.undersized.len());

    for path in &report.undersized {
        println!("  {}", path.display());

        if delete {
            fs::remove_file(path).with_context(|| format!("Failed to delete {}", path.display()))?;
        }
    }

    if delete && !report.undersized.is_empty() {
        println!("Deleted {} files; the next run fetches them again.", report.undersized.len());
    }

    Ok(())
}

fn inspect(path: &Path) -> Result<()> {
    let report = ClassificationReport::from_path(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    println!("{}", report);

    Ok(())
}

/// Only the subcommands that talk to the archive or its outputs read the configuration.
fn execute(args: Args) -> Result<()> {
    let command = args.command.unwrap_or(Command::Run {
        output_dir: None,
        fetch_workers: None,
    });

    match command {
        Command::Run {
            output_dir,
            fetch_workers,
        } => run(Config::load(&args.config)?, output_dir, fetch_workers),
        Command::Ping => ping(&Config::load(&args.config)?),
        Command::Audit { min_bytes, delete } => audit(&Config::load(&args.config)?, min_bytes, delete),
        Command::Inspect { path } => inspect(&path),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    execute(Args::parse())
}
