//! Memcached sink abstraction.
//!
//! This crate defines the `MemcacheSink` trait the load pipeline writes
//! through, and `MemcacheClient`, an implementation speaking the memcached
//! text protocol over a single lazily-opened TCP connection.

mod client;
mod error;
mod traits;

pub use client::{MemcacheClient, DEFAULT_TIMEOUT, MAX_KEY_LENGTH};
pub use error::MemcacheError;
pub use traits::MemcacheSink;
