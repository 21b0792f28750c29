//! Device-type to shard routing.

use crate::writer::{ShardStats, ShardWriter, WriterOptions};
use appsinstalled_types::AppsInstalled;
use memcache_sink::MemcacheSink;
use std::collections::{BTreeMap, HashMap};
use tokio::task::JoinHandle;

/// Built-in device types and their default memcached addresses.
pub const DEFAULT_ENDPOINTS: [(&str, &str); 4] = [
    ("idfa", "127.0.0.1:33013"),
    ("gaid", "127.0.0.1:33014"),
    ("adid", "127.0.0.1:33015"),
    ("dvid", "127.0.0.1:33016"),
];

/// Device type -> memcached address, fixed for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointRegistry {
    endpoints: BTreeMap<String, String>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self {
            endpoints: BTreeMap::new(),
        }
    }

    /// Set the address of a device type, returning the previous one.
    pub fn insert(&mut self, dev_type: impl Into<String>, addr: impl Into<String>) -> Option<String> {
        self.endpoints.insert(dev_type.into(), addr.into())
    }

    pub fn get(&self, dev_type: &str) -> Option<&str> {
        self.endpoints.get(dev_type).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.endpoints
            .iter()
            .map(|(dev_type, addr)| (dev_type.as_str(), addr.as_str()))
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        DEFAULT_ENDPOINTS.into_iter().collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EndpointRegistry {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            endpoints: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Routes records to the shard writer of their device type.
///
/// Read-only once built; loaders share it behind an `Arc`.
pub struct ShardRouter {
    writers: HashMap<String, ShardWriter>,
}

impl ShardRouter {
    /// Spawn one writer per registry entry, using `connect` to build each sink
    /// from its address.
    pub fn spawn<S, F>(
        registry: &EndpointRegistry,
        mut connect: F,
        options: WriterOptions,
    ) -> (Self, ShardWorkers)
    where
        S: MemcacheSink + 'static,
        F: FnMut(&str) -> S,
    {
        let mut writers = HashMap::with_capacity(registry.len());
        let mut handles = Vec::with_capacity(registry.len());

        for (dev_type, addr) in registry.iter() {
            let (writer, handle) = ShardWriter::spawn(dev_type, connect(addr), options);
            tracing::debug!("Spawned shard writer for {} -> {}", dev_type, addr);
            writers.insert(dev_type.to_string(), writer);
            handles.push((dev_type.to_string(), handle));
        }

        (Self { writers }, ShardWorkers { handles })
    }

    /// Writer for the record's device type, or `None` for an unknown type.
    pub fn route(&self, record: &AppsInstalled) -> Option<&ShardWriter> {
        self.writers.get(&record.dev_type)
    }

    pub fn writers(&self) -> impl Iterator<Item = &ShardWriter> {
        self.writers.values()
    }

    pub fn len(&self) -> usize {
        self.writers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writers.is_empty()
    }
}

/// Join handles of the shard writer tasks.
pub struct ShardWorkers {
    handles: Vec<(String, JoinHandle<ShardStats>)>,
}

impl ShardWorkers {
    /// Wait for every writer to finish and return its run totals, sorted by
    /// device type.
    ///
    /// Writers only finish once the router and all writer handles are dropped.
    pub async fn join(self) -> anyhow::Result<Vec<(String, ShardStats)>> {
        let mut totals = Vec::with_capacity(self.handles.len());
        for (dev_type, handle) in self.handles {
            let stats = handle
                .await
                .map_err(|e| anyhow::anyhow!("Shard writer for '{dev_type}' panicked: {e}"))?;
            totals.push((dev_type, stats));
        }
        totals.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(totals)
    }
}
