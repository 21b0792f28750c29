//! Single-file loading: read, parse, route, enqueue, then collect counters.

use crate::router::ShardRouter;
use crate::writer::{LoadTicket, ShardStats, WriteRequest};
use anyhow::{Context, Result};
use appsinstalled_types::{encode_user_apps, parse_line};
use futures::future::try_join_all;
use memc_load_file::{ResolvedSource, DEFAULT_BUFFER_SIZE};
use std::collections::HashMap;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome counters of one loaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStats {
    pub path: PathBuf,
    /// Records written to memcached.
    pub processed: u64,
    /// Bad lines, unknown device types, encoding and write failures.
    pub errors: u64,
}

impl FileStats {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            processed: 0,
            errors: 0,
        }
    }

    /// `errors / processed`, or `None` when nothing was processed.
    pub fn error_rate(&self) -> Option<f64> {
        if self.processed == 0 {
            None
        } else {
            Some(self.errors as f64 / self.processed as f64)
        }
    }

    fn add_shard(&mut self, stats: ShardStats) {
        self.processed += stats.processed;
        self.errors += stats.errors;
    }
}

/// What the reading half of a load produced.
struct ReadOutcome {
    /// Lines dropped before reaching a shard.
    errors: u64,
    /// Items queued per device type.
    enqueued: HashMap<String, u64>,
    /// Set when the file could not be read to the end.
    failure: Option<anyhow::Error>,
}

/// Load one file into the shard writers.
///
/// Reading, decompression and parsing run on a blocking thread; enqueueing
/// parks that thread while a shard queue is full. Once the file is exhausted
/// every shard is drained for this `ticket` and the counters summed. Writers
/// are left running.
///
/// Returns an error if the file cannot be opened or decompressed. Items
/// already queued from it are still drained first so no shard keeps counters
/// for an abandoned ticket.
pub async fn load_file(
    source: &ResolvedSource,
    ticket: LoadTicket,
    router: &Arc<ShardRouter>,
) -> Result<FileStats> {
    info!("Processing {}", source.display_name());

    let reader_source = source.clone();
    let reader_router = Arc::clone(router);
    let outcome = tokio::task::spawn_blocking(move || {
        read_into_shards(&reader_source, ticket, &reader_router)
    })
    .await
    .with_context(|| format!("Reader task for {} panicked", source.display_name()))?;

    let drains = router.writers().map(|writer| {
        let enqueued = outcome
            .enqueued
            .get(writer.dev_type())
            .copied()
            .unwrap_or(0);
        writer.drain(ticket, enqueued)
    });
    let shard_stats = try_join_all(drains).await?;

    if let Some(failure) = outcome.failure {
        return Err(failure);
    }

    let mut stats = FileStats::new(source.path().to_path_buf());
    stats.errors = outcome.errors;
    for shard in shard_stats {
        stats.add_shard(shard);
    }

    debug!(
        "Loaded {}: processed={} errors={}",
        source.display_name(),
        stats.processed,
        stats.errors
    );
    Ok(stats)
}

fn read_into_shards(source: &ResolvedSource, ticket: LoadTicket, router: &ShardRouter) -> ReadOutcome {
    let mut outcome = ReadOutcome {
        errors: 0,
        enqueued: HashMap::new(),
        failure: None,
    };

    let mut reader = match source.open(DEFAULT_BUFFER_SIZE) {
        Ok(reader) => reader,
        Err(e) => {
            outcome.failure = Some(e);
            return outcome;
        }
    };

    let mut buf = Vec::new();
    let mut line_number = 0u64;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => line_number += 1,
            Err(e) => {
                outcome.failure = Some(anyhow::Error::new(e).context(format!(
                    "Failed to read {} after line {}",
                    source.display_name(),
                    line_number
                )));
                break;
            }
        }

        let Ok(line) = std::str::from_utf8(&buf) else {
            debug!("{}:{}: line is not valid UTF-8", source.display_name(), line_number);
            outcome.errors += 1;
            continue;
        };
        if line.trim().is_empty() {
            continue;
        }

        let record = match parse_line(line) {
            Ok(record) => record,
            Err(e) => {
                debug!("{}:{}: {}", source.display_name(), line_number, e);
                outcome.errors += 1;
                continue;
            }
        };

        let Some(writer) = router.route(&record) else {
            debug!(
                "{}:{}: unknown device type '{}'",
                source.display_name(),
                line_number,
                record.dev_type
            );
            outcome.errors += 1;
            continue;
        };

        let value = match encode_user_apps(&record.user_apps()) {
            Ok(value) => value,
            Err(e) => {
                debug!("{}:{}: {}", source.display_name(), line_number, e);
                outcome.errors += 1;
                continue;
            }
        };

        let request = WriteRequest {
            ticket,
            key: record.key(),
            value,
        };
        if let Err(e) = writer.blocking_enqueue(request) {
            outcome.failure = Some(e);
            break;
        }
        match outcome.enqueued.get_mut(writer.dev_type()) {
            Some(count) => *count += 1,
            None => {
                outcome.enqueued.insert(writer.dev_type().to_string(), 1);
            }
        }
    }

    outcome
}
