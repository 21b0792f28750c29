//! memc-load library
//!
//! Loads gzip-compressed installed-apps logs into memcached, sharded by device
//! type. The pipeline itself lives in `memc_load_source`; this crate holds the
//! command-line options, config-file merging and the `check` self-test.
//!
//! # CLI Usage
//!
//! ```bash
//! # Load everything matching the default pattern into local memcached
//! memc-load load
//!
//! # Load with a config file, overriding one shard
//! memc-load load --config memc.toml --gaid 10.0.0.7:11211
//!
//! # Parse and count without writing anything
//! memc-load load --pattern "/data/appsinstalled/*.tsv.gz" --dry-run
//! ```

use anyhow::Context;
use clap::{Args, Parser, ValueEnum};
use memc_load_file::FileSource;
use memc_load_source::{
    default_workers, Config, EndpointRegistry, RetryPolicy, UnreadablePolicy, DEFAULT_ENDPOINTS,
};
use serde::Deserialize;
use std::path::PathBuf;

pub mod check;
pub mod config;

pub use config::{parse_duration, FileConfig};

pub const DEFAULT_PATTERN: &str = "/data/appsinstalled/*.tsv.gz";
pub const DEFAULT_BUFFER_SIZE: usize = 1000;
pub const DEFAULT_TIMEOUT: &str = "500ms";
pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: &str = "500ms";

/// What to do with a file that cannot be opened or decompressed
#[derive(ValueEnum, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OnUnreadable {
    /// Stop the run with an error
    #[default]
    Abort,
    /// Report the file, leave it in place and continue
    Skip,
}

impl From<OnUnreadable> for UnreadablePolicy {
    fn from(value: OnUnreadable) -> Self {
        match value {
            OnUnreadable::Abort => UnreadablePolicy::Abort,
            OnUnreadable::Skip => UnreadablePolicy::Skip,
        }
    }
}

/// Options for the `load` command.
///
/// Values left unset fall back to the config file, then to built-in
/// defaults, so every field is optional here.
#[derive(Parser, Clone, Debug, Default)]
pub struct LoadOpts {
    /// TOML config file with any of these settings plus a [shards] table
    #[arg(long, value_name = "PATH", env = "MEMC_LOAD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Input files: glob pattern, directory (trailing /) or single file
    /// [default: /data/appsinstalled/*.tsv.gz]
    #[arg(long, env = "MEMC_LOAD_PATTERN")]
    pub pattern: Option<String>,

    /// Memcached address for idfa records [default: 127.0.0.1:33013]
    #[arg(long, env = "MEMC_LOAD_IDFA")]
    pub idfa: Option<String>,

    /// Memcached address for gaid records [default: 127.0.0.1:33014]
    #[arg(long, env = "MEMC_LOAD_GAID")]
    pub gaid: Option<String>,

    /// Memcached address for adid records [default: 127.0.0.1:33015]
    #[arg(long, env = "MEMC_LOAD_ADID")]
    pub adid: Option<String>,

    /// Memcached address for dvid records [default: 127.0.0.1:33016]
    #[arg(long, env = "MEMC_LOAD_DVID")]
    pub dvid: Option<String>,

    /// Number of files loaded concurrently [default: available CPUs]
    #[arg(long, env = "MEMC_LOAD_WORKERS")]
    pub workers: Option<usize>,

    /// Capacity of each shard's write queue [default: 1000]
    #[arg(long, env = "MEMC_LOAD_BUFFER_SIZE")]
    pub buffer_size: Option<usize>,

    /// Per-attempt memcached timeout, e.g. "500ms", "2s" [default: 500ms]
    #[arg(long, env = "MEMC_LOAD_TIMEOUT")]
    pub timeout: Option<String>,

    /// Retries after a failed write [default: 3]
    #[arg(long, env = "MEMC_LOAD_RETRIES")]
    pub retries: Option<u32>,

    /// Delay before the first retry, doubled for each further one [default: 500ms]
    #[arg(long, env = "MEMC_LOAD_RETRY_DELAY")]
    pub retry_delay: Option<String>,

    /// Dry run mode - parse and count but don't write to memcached
    #[arg(long)]
    pub dry_run: bool,

    /// What to do with unreadable files [default: abort]
    #[arg(long, value_enum, env = "MEMC_LOAD_ON_UNREADABLE")]
    pub on_unreadable: Option<OnUnreadable>,
}

impl LoadOpts {
    /// Build the run configuration: command line first, then `file`, then
    /// built-in defaults.
    pub fn resolve(&self, file: &FileConfig) -> anyhow::Result<Config> {
        let pattern = self
            .pattern
            .clone()
            .or_else(|| file.pattern.clone())
            .unwrap_or_else(|| DEFAULT_PATTERN.to_string());

        let mut shards: EndpointRegistry = match &file.shards {
            Some(table) => table
                .iter()
                .map(|(dev_type, addr)| (dev_type.clone(), addr.clone()))
                .collect(),
            None => EndpointRegistry::default(),
        };
        for (dev_type, addr) in self.shard_overrides() {
            shards.insert(dev_type, addr);
        }
        if shards.is_empty() {
            anyhow::bail!("No memcached shards configured");
        }

        let workers = self.workers.or(file.workers).unwrap_or_else(default_workers);
        if workers == 0 {
            anyhow::bail!("--workers must be at least 1");
        }
        let buffer_size = self
            .buffer_size
            .or(file.buffer_size)
            .unwrap_or(DEFAULT_BUFFER_SIZE);
        if buffer_size == 0 {
            anyhow::bail!("--buffer-size must be at least 1");
        }

        let timeout = pick(&self.timeout, &file.timeout, DEFAULT_TIMEOUT);
        let timeout = parse_duration(timeout).context("Invalid timeout")?;
        let retry_delay = pick(&self.retry_delay, &file.retry_delay, DEFAULT_RETRY_DELAY);
        let retry_delay = parse_duration(retry_delay).context("Invalid retry delay")?;

        Ok(Config {
            sources: vec![FileSource::parse(&pattern)],
            shards,
            workers,
            buffer_size,
            timeout,
            retry: RetryPolicy {
                retries: self.retries.or(file.retries).unwrap_or(DEFAULT_RETRIES),
                base_delay: retry_delay,
            },
            dry_run: self.dry_run || file.dry_run.unwrap_or(false),
            on_unreadable: self
                .on_unreadable
                .or(file.on_unreadable)
                .unwrap_or_default()
                .into(),
        })
    }

    /// Shard addresses given explicitly on the command line.
    fn shard_overrides(&self) -> impl Iterator<Item = (&'static str, String)> + '_ {
        let flags = [&self.idfa, &self.gaid, &self.adid, &self.dvid];
        DEFAULT_ENDPOINTS
            .iter()
            .zip(flags)
            .filter_map(|((dev_type, _), addr)| addr.clone().map(|addr| (*dev_type, addr)))
    }
}

fn pick<'a>(cli: &'a Option<String>, file: &'a Option<String>, default: &'a str) -> &'a str {
    cli.as_deref().or(file.as_deref()).unwrap_or(default)
}

/// Logging options shared by every command
#[derive(Args, Clone, Debug, Default)]
pub struct LogOpts {
    /// Append log output to this file instead of stderr
    #[arg(long, global = true, value_name = "PATH", env = "MEMC_LOAD_LOG")]
    pub log: Option<PathBuf>,

    /// Log at debug level
    #[arg(long, short, global = true)]
    pub verbose: bool,
}

impl LogOpts {
    /// Fill unset options from the config file.
    pub fn merge(&self, file: &FileConfig) -> LogOpts {
        LogOpts {
            log: self.log.clone().or_else(|| file.log.clone()),
            verbose: self.verbose || file.verbose.unwrap_or(false),
        }
    }

    /// Directive used when `RUST_LOG` is not set.
    pub fn default_directive(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}
