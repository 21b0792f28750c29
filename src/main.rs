//! Command-line interface for memc-load
//!
//! # Usage Examples
//!
//! ## Load
//! ```bash
//! # Load every unprocessed log into the default local shards
//! memc-load load --pattern "/data/appsinstalled/*.tsv.gz"
//!
//! # Remote shards, 8 concurrent files, log to a file
//! memc-load load \
//!   --idfa 10.0.0.1:11211 --gaid 10.0.0.2:11211 \
//!   --adid 10.0.0.3:11211 --dvid 10.0.0.4:11211 \
//!   --workers 8 --log /var/log/memc-load.log
//! ```
//!
//! ## Self-test
//! ```bash
//! memc-load check
//! ```
//!
//! Loaded files are renamed with a leading dot and skipped on the next run.

use anyhow::Context;
use clap::{Parser, Subcommand};
use memc_load::{check::check, FileConfig, LoadOpts, LogOpts};
use std::fs::OpenOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "memc-load")]
#[command(about = "Load installed-apps logs into sharded memcached")]
#[command(long_about = None)]
struct Cli {
    #[command(flatten)]
    log_opts: LogOpts,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load log files into memcached and mark them processed
    Load {
        #[command(flatten)]
        opts: LoadOpts,
    },

    /// Verify record parsing and encoding on built-in sample lines
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Load { opts } => {
            let file_config = match &opts.config {
                Some(path) => FileConfig::from_file(path)?,
                None => FileConfig::default(),
            };
            init_logging(&cli.log_opts.merge(&file_config))?;

            let config = opts.resolve(&file_config)?;
            let shutdown = setup_shutdown_handler();
            memc_load_source::sync(config, shutdown).await?;
        }
        Commands::Check => {
            init_logging(&cli.log_opts)?;
            check()?;
        }
    }

    Ok(())
}

fn init_logging(opts: &LogOpts) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(opts.default_directive()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match &opts.log {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

/// Cancel the returned token on Ctrl-C. Files already loading finish; no new
/// ones start.
fn setup_shutdown_handler() -> CancellationToken {
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received interrupt signal (Ctrl+C), finishing files in progress");
                token.cancel();
            }
            Err(e) => error!("Failed to install Ctrl+C signal handler: {e}"),
        }
    });

    shutdown
}
