//! Run coordination: discover files, load them through the pool, rename and
//! report each one.

use crate::loader::FileStats;
use crate::pool::{FileOutcome, FilePool};
use crate::router::{EndpointRegistry, ShardRouter};
use crate::writer::{RetryPolicy, ShardStats, WriterOptions};
use anyhow::{bail, Result};
use memc_load_file::{FileSource, ResolvedSource};
use memcache_sink::{MemcacheClient, MemcacheSink, DEFAULT_TIMEOUT};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// A file loads acceptably while its error rate stays below this.
pub const NORMAL_ERR_RATE: f64 = 0.01;

/// What to do when a file cannot be opened or decompressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnreadablePolicy {
    /// Stop starting new files and fail the run.
    #[default]
    Abort,
    /// Report the file as failed, leave it in place, keep going.
    Skip,
}

/// Configuration for a load run
#[derive(Clone, Debug)]
pub struct Config {
    /// Where to find input files (glob pattern, directory or single file)
    pub sources: Vec<FileSource>,

    /// Device type -> memcached address
    pub shards: EndpointRegistry,

    /// Number of files loaded concurrently
    pub workers: usize,

    /// Capacity of each shard's write queue
    pub buffer_size: usize,

    /// Per-attempt memcached timeout
    pub timeout: Duration,

    /// Retry schedule for failed writes
    pub retry: RetryPolicy,

    /// Whether to perform a dry run without writing data
    pub dry_run: bool,

    pub on_unreadable: UnreadablePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sources: vec![FileSource::parse("/data/appsinstalled/*.tsv.gz")],
            shards: EndpointRegistry::default(),
            workers: default_workers(),
            buffer_size: 1000,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            dry_run: false,
            on_unreadable: UnreadablePolicy::Abort,
        }
    }
}

/// Available hardware parallelism, or 1 if unknown.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Advisory judgement on a loaded file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadVerdict {
    Acceptable(f64),
    HighErrorRate(f64),
    /// Nothing was processed, so there is no rate to judge.
    Empty,
}

impl LoadVerdict {
    pub fn of(stats: &FileStats) -> Self {
        match stats.error_rate() {
            None => LoadVerdict::Empty,
            Some(rate) if rate < NORMAL_ERR_RATE => LoadVerdict::Acceptable(rate),
            Some(rate) => LoadVerdict::HighErrorRate(rate),
        }
    }
}

/// Totals for a whole run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Files read to the end and renamed.
    pub files_loaded: usize,
    /// Loaded files whose error rate was too high.
    pub files_high_error: usize,
    /// Files that could not be read.
    pub files_unreadable: usize,
    /// Loaded files whose rename failed.
    pub files_not_renamed: usize,
    pub processed: u64,
    pub errors: u64,
    /// Per-shard counters over the whole run, sorted by device type.
    pub shards: Vec<(String, ShardStats)>,
}

/// Load every matching file into memcached.
pub async fn sync(config: Config, shutdown: CancellationToken) -> Result<RunSummary> {
    let timeout = config.timeout;
    sync_with(config, |addr| MemcacheClient::new(addr, timeout), shutdown).await
}

/// Load every matching file, building each shard's sink with `connect`.
pub async fn sync_with<S, F>(
    config: Config,
    connect: F,
    shutdown: CancellationToken,
) -> Result<RunSummary>
where
    S: MemcacheSink + 'static,
    F: FnMut(&str) -> S,
{
    if config.shards.is_empty() {
        bail!("No memcached shards configured");
    }

    info!("Starting memc load");
    if config.dry_run {
        warn!("Running in dry-run mode - no data will be written");
    }

    let mut files = Vec::new();
    for source in &config.sources {
        let resolved = source.resolve().await?;
        if resolved.is_empty() {
            info!("No files found for {}", source.display_name());
        }
        files.extend(resolved);
    }
    files.sort_by(|a, b| a.path().cmp(b.path()));
    files.dedup();

    if files.is_empty() {
        info!("Nothing to load");
        return Ok(RunSummary::default());
    }
    info!(
        "Loading {} files with {} workers into {} shards",
        files.len(),
        config.workers,
        config.shards.len()
    );

    let options = WriterOptions {
        buffer_size: config.buffer_size,
        retry: config.retry,
        dry_run: config.dry_run,
    };
    // Aborting cancels this run only, not the caller's token.
    let shutdown = shutdown.child_token();
    let (router, shard_workers) = ShardRouter::spawn(&config.shards, connect, options);
    let router = Arc::new(router);

    let mut pool = FilePool::spawn(files, config.workers, router.clone(), shutdown.clone());
    let mut summary = RunSummary::default();
    let mut fatal = None;

    while let Some(outcome) = pool.next().await {
        if let Err(e) = handle_outcome(outcome, config.on_unreadable, &mut summary).await {
            if fatal.is_none() {
                error!("Aborting run: {e:#}");
                shutdown.cancel();
                fatal = Some(e);
            } else {
                error!("{e:#}");
            }
        }
    }
    pool.join().await?;

    // Last router reference: dropping it lets the shard writers finish.
    drop(router);
    summary.shards = shard_workers.join().await?;

    log_summary(&summary);

    match fatal {
        Some(e) => Err(e),
        None => Ok(summary),
    }
}

/// Rename and report one finished file. Returns an error only for an
/// unreadable file under [`UnreadablePolicy::Abort`].
async fn handle_outcome(
    outcome: FileOutcome,
    policy: UnreadablePolicy,
    summary: &mut RunSummary,
) -> Result<()> {
    let FileOutcome { source, result, .. } = outcome;

    let stats = match result {
        Ok(stats) => stats,
        Err(e) => {
            summary.files_unreadable += 1;
            return match policy {
                UnreadablePolicy::Abort => Err(e),
                UnreadablePolicy::Skip => {
                    error!("Skipping unreadable file: {e:#}");
                    Ok(())
                }
            };
        }
    };

    summary.files_loaded += 1;
    summary.processed += stats.processed;
    summary.errors += stats.errors;

    rename_loaded(&source, summary).await;
    if let LoadVerdict::HighErrorRate(_) = report(&stats) {
        summary.files_high_error += 1;
    }
    Ok(())
}

async fn rename_loaded(source: &ResolvedSource, summary: &mut RunSummary) {
    if let Err(e) = source.mark_processed().await {
        error!("{e:#}");
        summary.files_not_renamed += 1;
    }
}

/// Log the advisory verdict for a loaded file.
pub fn report(stats: &FileStats) -> LoadVerdict {
    let verdict = LoadVerdict::of(stats);
    match verdict {
        LoadVerdict::Acceptable(rate) => info!(
            "Acceptable error rate ({:.4}). Successful load {}",
            rate,
            stats.path.display()
        ),
        LoadVerdict::HighErrorRate(rate) => error!(
            "High error rate ({:.4} > {}). Failed load {}",
            rate,
            NORMAL_ERR_RATE,
            stats.path.display()
        ),
        LoadVerdict::Empty => info!(
            "No records processed from {} ({} errors)",
            stats.path.display(),
            stats.errors
        ),
    }
    verdict
}

fn log_summary(summary: &RunSummary) {
    info!(
        "memc load completed: {} files loaded ({} with high error rate), {} unreadable, processed={} errors={}",
        summary.files_loaded,
        summary.files_high_error,
        summary.files_unreadable,
        summary.processed,
        summary.errors
    );
    if summary.files_not_renamed > 0 {
        warn!(
            "{} loaded files could not be renamed and will be loaded again next run",
            summary.files_not_renamed
        );
    }
    for (dev_type, stats) in &summary.shards {
        info!(
            "[{}] processed={} errors={}",
            dev_type, stats.processed, stats.errors
        );
    }
}
