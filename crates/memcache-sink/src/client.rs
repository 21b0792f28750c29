//! Memcached text-protocol client.

use crate::error::MemcacheError;
use crate::traits::MemcacheSink;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;

/// Default per-attempt timeout (connect, write and reply together).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// Longest key memcached accepts.
pub const MAX_KEY_LENGTH: usize = 250;

/// Client for one memcached server.
///
/// The connection is opened on first use and kept for later calls. Any
/// failed attempt discards it, so the next call starts from a fresh
/// connection rather than a stream left mid-reply.
pub struct MemcacheClient {
    addr: String,
    timeout: Duration,
    conn: Option<BufStream<TcpStream>>,
}

impl MemcacheClient {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
            conn: None,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Store `value` under `key` with no flags and no expiry.
    pub async fn set_bytes(&mut self, key: &str, value: &[u8]) -> Result<(), MemcacheError> {
        validate_key(key)?;

        let result = match tokio::time::timeout(self.timeout, self.try_set(key, value)).await {
            Ok(result) => result,
            Err(_) => Err(MemcacheError::Timeout(self.timeout)),
        };

        if result.is_err() {
            self.conn = None;
        }
        result
    }

    async fn try_set(&mut self, key: &str, value: &[u8]) -> Result<(), MemcacheError> {
        let stream = self.connection().await?;

        let header = format!("set {key} 0 0 {}\r\n", value.len());
        stream.write_all(header.as_bytes()).await?;
        stream.write_all(value).await?;
        stream.write_all(b"\r\n").await?;
        stream.flush().await?;

        let mut reply = String::new();
        if stream.read_line(&mut reply).await? == 0 {
            return Err(MemcacheError::Protocol(
                "connection closed by server".to_string(),
            ));
        }

        match reply.trim_end() {
            "STORED" => Ok(()),
            "NOT_STORED" => Err(MemcacheError::NotStored),
            other => Err(MemcacheError::Protocol(other.to_string())),
        }
    }

    async fn connection(&mut self) -> Result<&mut BufStream<TcpStream>, MemcacheError> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => {
                tracing::debug!("Connecting to memcached at {}", self.addr);
                let stream = TcpStream::connect(&self.addr).await?;
                stream.set_nodelay(true)?;
                BufStream::new(stream)
            }
        };
        Ok(self.conn.insert(conn))
    }
}

#[async_trait::async_trait]
impl MemcacheSink for MemcacheClient {
    async fn set(&mut self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.set_bytes(key, value).await?;
        Ok(())
    }

    fn endpoint(&self) -> &str {
        &self.addr
    }
}

fn validate_key(key: &str) -> Result<(), MemcacheError> {
    if key.is_empty()
        || key.len() > MAX_KEY_LENGTH
        || key.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control())
    {
        return Err(MemcacheError::InvalidKey(key.to_string()));
    }
    Ok(())
}
