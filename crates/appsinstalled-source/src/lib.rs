//! Installed-apps log loading into sharded memcached.
//!
//! Files are loaded concurrently by a fixed pool of loaders. Each parsed
//! record is routed by device type to a long-lived shard writer that owns a
//! bounded queue and one memcached endpoint.
//!
//! ```text
//! files -> FilePool -> load_file -> parse_line -> ShardRouter
//!       -> ShardWriter queue -> memcached
//! ```
//!
//! Counters flow back the other way: each writer reports per-file
//! [`ShardStats`] on drain, the loader sums them into [`FileStats`], and the
//! coordinator ([`sync`]) renames the file and judges its error rate.

mod loader;
mod pool;
mod router;
mod sync;
mod writer;

pub use loader::{load_file, FileStats};
pub use pool::{FileOutcome, FilePool};
pub use router::{EndpointRegistry, ShardRouter, ShardWorkers, DEFAULT_ENDPOINTS};
pub use sync::{
    default_workers, report, sync, sync_with, Config, LoadVerdict, RunSummary, UnreadablePolicy,
    NORMAL_ERR_RATE,
};
pub use writer::{
    LoadTicket, RetryPolicy, ShardStats, ShardWriter, WriteRequest, WriterOptions,
    DRY_RUN_REPORT_EVERY,
};

// Re-export file source types for convenience
pub use memc_load_file::{FileSource, ResolvedSource};
