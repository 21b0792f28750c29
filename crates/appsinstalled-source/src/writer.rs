//! Per-shard upload worker.
//!
//! One [`ShardWriter`] runs for every configured memcached endpoint and lives
//! for the whole run. File loaders push [`WriteRequest`]s into its bounded
//! queue (blocking when it is full) and, once a file is exhausted, ask it for
//! that file's counters with [`ShardWriter::drain`].

use memcache_sink::MemcacheSink;
use std::collections::HashMap;
use std::ops::AddAssign;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Dry-run mode logs throughput every this many items per shard.
pub const DRY_RUN_REPORT_EVERY: u64 = 100_000;

/// Capacity of the drain control channel.
const CONTROL_CHANNEL_SIZE: usize = 64;

/// Identifies the file a write request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadTicket(pub u64);

/// One pending memcached write.
#[derive(Debug)]
pub struct WriteRequest {
    pub ticket: LoadTicket,
    pub key: String,
    pub value: Vec<u8>,
}

/// Write counters of one shard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardStats {
    pub processed: u64,
    pub errors: u64,
}

impl ShardStats {
    /// Items handled either way.
    pub fn total(&self) -> u64 {
        self.processed + self.errors
    }

    fn record(&mut self, ok: bool) {
        if ok {
            self.processed += 1;
        } else {
            self.errors += 1;
        }
    }
}

impl AddAssign for ShardStats {
    fn add_assign(&mut self, other: Self) {
        self.processed += other.processed;
        self.errors += other.errors;
    }
}

/// Retry schedule for failed writes.
///
/// The first attempt is immediate. After failed attempt `k` (1-based, at most
/// `retries` of them) the writer waits `base_delay * 2^(k-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows failed attempt `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries + 1
    }
}

/// Settings shared by every shard writer.
#[derive(Debug, Clone, Copy)]
pub struct WriterOptions {
    /// Capacity of each shard's queue.
    pub buffer_size: usize,
    pub retry: RetryPolicy,
    /// Count every item as written without calling the sink.
    pub dry_run: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            retry: RetryPolicy::default(),
            dry_run: false,
        }
    }
}

/// Request for one file's counters.
///
/// Answered once the writer has handled `enqueued` items of `ticket`.
struct DrainRequest {
    ticket: LoadTicket,
    enqueued: u64,
    reply: oneshot::Sender<ShardStats>,
}

/// Handle to a running shard writer.
///
/// Cloning the handle shares the same worker. The worker exits once every
/// handle is dropped and its queue is empty.
#[derive(Clone)]
pub struct ShardWriter {
    dev_type: String,
    endpoint: String,
    items: mpsc::Sender<WriteRequest>,
    control: mpsc::Sender<DrainRequest>,
}

impl ShardWriter {
    /// Spawn the worker task for one shard.
    ///
    /// The task resolves to the shard's counters over the whole run.
    pub fn spawn<S>(
        dev_type: impl Into<String>,
        sink: S,
        options: WriterOptions,
    ) -> (Self, JoinHandle<ShardStats>)
    where
        S: MemcacheSink + 'static,
    {
        let dev_type = dev_type.into();
        let endpoint = sink.endpoint().to_string();
        let (items_tx, items_rx) = mpsc::channel(options.buffer_size.max(1));
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_SIZE);

        let worker = Worker {
            dev_type: dev_type.clone(),
            sink,
            options,
            ledger: HashMap::new(),
            pending: Vec::new(),
            totals: ShardStats::default(),
            dry_run_started: Instant::now(),
        };
        let handle = tokio::spawn(worker.run(items_rx, control_rx));

        let writer = Self {
            dev_type,
            endpoint,
            items: items_tx,
            control: control_tx,
        };
        (writer, handle)
    }

    pub fn dev_type(&self) -> &str {
        &self.dev_type
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Queue a write, waiting while the queue is full.
    pub async fn enqueue(&self, request: WriteRequest) -> anyhow::Result<()> {
        self.items
            .send(request)
            .await
            .map_err(|_| anyhow::anyhow!("Shard writer for '{}' has stopped", self.dev_type))
    }

    /// Queue a write from a blocking thread, parking it while the queue is full.
    ///
    /// Must not be called from async code.
    pub fn blocking_enqueue(&self, request: WriteRequest) -> anyhow::Result<()> {
        self.items
            .blocking_send(request)
            .map_err(|_| anyhow::anyhow!("Shard writer for '{}' has stopped", self.dev_type))
    }

    /// Wait until the `enqueued` items of `ticket` have been handled and
    /// return their counters. The worker keeps running.
    pub async fn drain(&self, ticket: LoadTicket, enqueued: u64) -> anyhow::Result<ShardStats> {
        let (reply, response) = oneshot::channel();
        self.control
            .send(DrainRequest {
                ticket,
                enqueued,
                reply,
            })
            .await
            .map_err(|_| anyhow::anyhow!("Shard writer for '{}' has stopped", self.dev_type))?;
        response.await.map_err(|_| {
            anyhow::anyhow!(
                "Shard writer for '{}' stopped before reporting",
                self.dev_type
            )
        })
    }
}

/// State owned by the worker task; nothing here is shared.
struct Worker<S> {
    dev_type: String,
    sink: S,
    options: WriterOptions,
    /// Counters per file still loading.
    ledger: HashMap<LoadTicket, ShardStats>,
    /// Drains waiting for their file's items.
    pending: Vec<DrainRequest>,
    totals: ShardStats,
    dry_run_started: Instant,
}

impl<S: MemcacheSink> Worker<S> {
    async fn run(
        mut self,
        mut items: mpsc::Receiver<WriteRequest>,
        mut control: mpsc::Receiver<DrainRequest>,
    ) -> ShardStats {
        let mut items_open = true;
        let mut control_open = true;

        debug!(
            "[{}] Shard writer started for {}",
            self.dev_type,
            self.sink.endpoint()
        );

        while items_open || control_open {
            tokio::select! {
                item = items.recv(), if items_open => match item {
                    Some(request) => {
                        let ticket = request.ticket;
                        let ok = self.write(request).await;
                        self.ledger.entry(ticket).or_default().record(ok);
                        self.totals.record(ok);
                        self.answer_ready_drains();
                    }
                    None => items_open = false,
                },
                drain = control.recv(), if control_open => match drain {
                    Some(request) => {
                        self.pending.push(request);
                        self.answer_ready_drains();
                    }
                    None => control_open = false,
                },
            }
        }

        if !self.pending.is_empty() {
            warn!(
                "[{}] Shard writer stopped with {} unanswered drain requests",
                self.dev_type,
                self.pending.len()
            );
        }

        debug!(
            "[{}] Shard writer finished: processed={} errors={}",
            self.dev_type, self.totals.processed, self.totals.errors
        );
        self.totals
    }

    /// Write one item, retrying per policy. Returns whether it was stored.
    async fn write(&mut self, request: WriteRequest) -> bool {
        if self.options.dry_run {
            debug!("[{}] {} ({} bytes)", self.dev_type, request.key, request.value.len());
            self.report_dry_run_progress();
            return true;
        }

        let policy = self.options.retry;
        let mut attempt = 1;
        loop {
            match self.sink.set(&request.key, &request.value).await {
                Ok(()) => return true,
                Err(e) if attempt <= policy.retries => {
                    let delay = policy.delay(attempt);
                    debug!(
                        "[{}] Write of {} to {} failed (attempt {}/{}): {:#}. Retrying in {:?}",
                        self.dev_type,
                        request.key,
                        self.sink.endpoint(),
                        attempt,
                        policy.max_attempts(),
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(
                        "[{}] Cannot write {} to {} after {} attempts: {:#}",
                        self.dev_type,
                        request.key,
                        self.sink.endpoint(),
                        attempt,
                        e
                    );
                    return false;
                }
            }
        }
    }

    fn report_dry_run_progress(&self) {
        // Counted before this item is recorded.
        let written = self.totals.total() + 1;
        if written % DRY_RUN_REPORT_EVERY == 0 {
            let elapsed = self.dry_run_started.elapsed().as_secs_f64();
            let rate = if elapsed > 0.0 {
                written as f64 / elapsed
            } else {
                0.0
            };
            info!(
                "[{}] Dry run: {} items, {:.0} items/sec",
                self.dev_type, written, rate
            );
        }
    }

    fn answer_ready_drains(&mut self) {
        let mut i = 0;
        while i < self.pending.len() {
            let request = &self.pending[i];
            let handled = self
                .ledger
                .get(&request.ticket)
                .map_or(0, ShardStats::total);
            if handled < request.enqueued {
                i += 1;
                continue;
            }

            let request = self.pending.swap_remove(i);
            let stats = self.ledger.remove(&request.ticket).unwrap_or_default();
            if self.options.dry_run && stats.total() > 0 {
                info!(
                    "[{}] Dry run: file drained with {} items",
                    self.dev_type,
                    stats.total()
                );
            }
            // The loader may have given up waiting; nothing to do then.
            let _ = request.reply.send(stats);
        }
    }
}
