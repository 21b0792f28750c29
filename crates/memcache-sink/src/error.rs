use std::time::Duration;
use thiserror::Error;

/// Errors from a single memcached `set` attempt.
#[derive(Error, Debug)]
pub enum MemcacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid key '{0}'")]
    InvalidKey(String),

    #[error("item not stored")]
    NotStored,

    #[error("unexpected reply: {0}")]
    Protocol(String),
}
