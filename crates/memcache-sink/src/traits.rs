//! MemcacheSink trait definition.

use anyhow::Result;

/// Trait for writing key/value pairs to one memcached endpoint.
///
/// Each shard writer owns its sink exclusively, hence `&mut self`.
/// Pipeline code is generic over the sink so tests can substitute
/// in-memory implementations:
///
/// ```ignore
/// pub fn spawn<S: MemcacheSink + 'static>(sink: S, ...) -> ShardWriter {
///     // every write goes through sink.set(&key, &value)
/// }
/// ```
#[async_trait::async_trait]
pub trait MemcacheSink: Send {
    /// Store `value` under `key`, replacing any existing entry.
    ///
    /// A single call is a single attempt; retrying is the caller's concern.
    async fn set(&mut self, key: &str, value: &[u8]) -> Result<()>;

    /// Address this sink writes to, for logging.
    fn endpoint(&self) -> &str;
}
