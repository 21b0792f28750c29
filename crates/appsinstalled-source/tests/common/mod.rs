//! Shared fixtures for pipeline tests.

#![allow(dead_code)]

use flate2::write::GzEncoder;
use memcache_sink::MemcacheSink;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

/// Write `lines` gzip-compressed to `dir/name`, one per line.
pub fn write_gz(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
    let path = dir.join(name);
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    for line in lines {
        encoder.write_all(line.as_bytes()).unwrap();
        encoder.write_all(b"\n").unwrap();
    }
    std::fs::write(&path, encoder.finish().unwrap()).unwrap();
    path
}

/// In-memory memcached servers keyed by address.
#[derive(Clone, Default)]
pub struct FakeCluster {
    stores: Arc<Mutex<HashMap<String, HashMap<String, Vec<u8>>>>>,
    calls: Arc<AtomicU32>,
}

impl FakeCluster {
    pub fn sink(&self, addr: &str) -> FakeSink {
        FakeSink {
            addr: addr.to_string(),
            cluster: self.clone(),
            failures_left: 0,
        }
    }

    /// A sink whose first `failures` calls fail.
    pub fn flaky_sink(&self, addr: &str, failures: u32) -> FakeSink {
        FakeSink {
            failures_left: failures,
            ..self.sink(addr)
        }
    }

    pub fn get(&self, addr: &str, key: &str) -> Option<Vec<u8>> {
        self.stores
            .lock()
            .unwrap()
            .get(addr)
            .and_then(|store| store.get(key).cloned())
    }

    pub fn len(&self, addr: &str) -> usize {
        self.stores
            .lock()
            .unwrap()
            .get(addr)
            .map_or(0, HashMap::len)
    }

    pub fn total_len(&self) -> usize {
        self.stores.lock().unwrap().values().map(HashMap::len).sum()
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

pub struct FakeSink {
    addr: String,
    cluster: FakeCluster,
    failures_left: u32,
}

#[async_trait::async_trait]
impl MemcacheSink for FakeSink {
    async fn set(&mut self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.cluster.calls.fetch_add(1, Ordering::SeqCst);
        if self.failures_left > 0 {
            self.failures_left -= 1;
            anyhow::bail!("connection refused");
        }
        self.cluster
            .stores
            .lock()
            .unwrap()
            .entry(self.addr.clone())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn endpoint(&self) -> &str {
        &self.addr
    }
}

/// A sink that stores nothing until permits are added to its gate.
pub struct GatedSink {
    pub gate: Arc<Semaphore>,
    pub written: Arc<Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl MemcacheSink for GatedSink {
    async fn set(&mut self, key: &str, _value: &[u8]) -> anyhow::Result<()> {
        self.gate.acquire().await?.forget();
        self.written.lock().unwrap().push(key.to_string());
        Ok(())
    }

    fn endpoint(&self) -> &str {
        "gated:0"
    }
}
