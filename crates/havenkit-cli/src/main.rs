//! `havenkit`: build and inspect offline cache snapshots.
//!
//! ## Usage
//!
//! ```bash
//! # Precache a live site into a snapshot, sweeping older generations
//! havenkit precache --config site.json --out cache.json --from cache.json
//!
//! # List stores and entries in a snapshot
//! havenkit inspect cache.json
//!
//! # Print the next generation id for a release
//! havenkit bump house-v58
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use havenkit_cache::{MemoryCacheStorage, StorageSnapshot};
use havenkit_common::{init_logging, HavenError, LogConfig, LogFormat};
use havenkit_net::{HttpFetcher, LoaderConfig};
use havenkit_worker::{
    CacheGeneration, ControllerEvent, OfflineCacheController, WorkerConfig, WorkerError,
};
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "havenkit", version)]
#[command(about = "Offline cache tooling: precache, inspect, bump")]
struct Cli {
    /// Log output format (pretty, compact, json)
    #[arg(long, global = true, default_value = "compact", value_parser = parse_log_format)]
    log_format: LogFormat,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install and activate a generation against the live origin
    Precache {
        /// Worker config (JSON)
        #[arg(short, long)]
        config: PathBuf,
        /// Snapshot output path
        #[arg(short, long)]
        out: PathBuf,
        /// Existing snapshot to upgrade
        #[arg(long)]
        from: Option<PathBuf>,
        /// Per-request timeout in seconds
        #[arg(long, default_value = "30")]
        timeout_secs: u64,
    },

    /// List the stores and entries of a snapshot
    Inspect {
        /// Snapshot path
        snapshot: PathBuf,
    },

    /// Print the generation id that follows the given one
    Bump {
        /// Current generation id
        generation: String,
    },
}

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    s.parse().map_err(|e: havenkit_common::HavenError| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(LogConfig::from_verbosity(cli.verbose).with_format(cli.log_format))?;

    match cli.command {
        Commands::Precache {
            config,
            out,
            from,
            timeout_secs,
        } => {
            precache(&config, &out, from.as_deref(), Duration::from_secs(timeout_secs)).await?;
        }

        Commands::Inspect { snapshot } => {
            let storage = MemoryCacheStorage::load_from(&snapshot)
                .await
                .with_context(|| format!("reading {}", snapshot.display()))?;
            for line in describe(&storage.snapshot().await) {
                println!("{line}");
            }
        }

        Commands::Bump { generation } => {
            println!("{}", CacheGeneration::from(generation.as_str()).next());
        }
    }

    Ok(())
}

async fn precache(
    config_path: &Path,
    out: &Path,
    from: Option<&Path>,
    timeout: Duration,
) -> anyhow::Result<()> {
    let config = WorkerConfig::from_file(config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;

    let storage = match from {
        Some(path) if path.exists() => Arc::new(
            MemoryCacheStorage::load_from(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?,
        ),
        _ => Arc::new(MemoryCacheStorage::new()),
    };

    let fetcher = HttpFetcher::new(LoaderConfig {
        default_timeout: timeout,
        ..Default::default()
    })?;

    let (controller, mut events) =
        OfflineCacheController::new(config, storage.clone(), Arc::new(fetcher))?;

    let logger = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ControllerEvent::CacheDeleteFailed { name } => {
                    warn!(cache = %name, "Stale generation kept")
                }
                ControllerEvent::CacheWriteFailed { url, reason } => {
                    warn!(%url, %reason, "Cache write failed")
                }
                other => debug!(event = ?other, "Controller event"),
            }
        }
    });

    let result = controller.start().await;
    drop(controller);
    let _ = logger.await;
    let report = result.map_err(precache_failure)?;

    storage
        .save_to(out)
        .await
        .with_context(|| format!("writing {}", out.display()))?;

    info!(
        deleted = report.deleted.len(),
        failed = report.failed.len(),
        out = %out.display(),
        "Snapshot written"
    );
    for name in &report.deleted {
        println!("deleted {name}");
    }
    for name in &report.failed {
        println!("kept    {name} (delete failed)");
    }
    Ok(())
}

/// Tell transient failures apart from ones a rerun will not fix.
fn precache_failure(err: WorkerError) -> anyhow::Error {
    let err = HavenError::from(err);
    let retryable = err.is_retryable();
    warn!(category = err.category(), retryable, error = %err, "Precache failed");
    let hint = if retryable {
        "origin unreachable, try again later"
    } else {
        "check the config and manifest"
    };
    anyhow::Error::new(err).context(format!("precache failed ({hint})"))
}

/// One line per store, then one indented line per entry.
fn describe(snapshot: &StorageSnapshot) -> Vec<String> {
    let mut lines = Vec::new();
    for cache in &snapshot.caches {
        lines.push(format!("{} ({} entries)", cache.name, cache.entries.len()));
        for entry in &cache.entries {
            lines.push(format!(
                "  {} {} ({} bytes)",
                entry.status,
                entry.url,
                entry.body.len()
            ));
        }
    }
    lines
}
