//! Optional TOML configuration file for `memc-load load`.
//!
//! ```toml
//! pattern = "/data/appsinstalled/*.tsv.gz"
//! workers = 8
//! timeout = "500ms"
//! retries = 3
//! retry_delay = "500ms"
//!
//! [shards]
//! idfa = "10.0.0.1:11211"
//! gaid = "10.0.0.2:11211"
//! ```
//!
//! A `[shards]` table replaces the built-in device types entirely.

mod duration;

pub use duration::parse_duration;

use crate::OnUnreadable;
use anyhow::Context;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Settings read from a config file. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub pattern: Option<String>,
    pub shards: Option<BTreeMap<String, String>>,
    pub workers: Option<usize>,
    pub buffer_size: Option<usize>,
    pub timeout: Option<String>,
    pub retries: Option<u32>,
    pub retry_delay: Option<String>,
    pub dry_run: Option<bool>,
    pub on_unreadable: Option<OnUnreadable>,
    pub log: Option<PathBuf>,
    pub verbose: Option<bool>,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
