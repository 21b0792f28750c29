//! Log file sources for memc-load.
//!
//! This crate turns a user-supplied location into concrete files, opens each
//! one as a line-oriented reader (decompressing gzip on the fly), and marks a
//! file as consumed once it has been loaded.
//!
//! # Source Types
//!
//! - **File**: a single path, e.g. `/data/appsinstalled/20170929000000.tsv.gz`
//! - **Directory**: a path ending with `/`, every file directly inside it
//! - **Pattern**: a glob, e.g. `/data/appsinstalled/*.tsv.gz`
//!
//! Directory listings and pattern matches skip files whose name starts with
//! `.`; that prefix is how [`ResolvedSource::mark_processed`] flags a file as
//! already loaded.
//!
//! # Example
//!
//! ```ignore
//! use memc_load_file::{FileSource, DEFAULT_BUFFER_SIZE};
//!
//! let source = FileSource::parse("/data/appsinstalled/*.tsv.gz");
//! for file in source.resolve().await? {
//!     let reader = file.open(DEFAULT_BUFFER_SIZE)?;
//!     // Process lines...
//!     file.mark_processed().await?;
//! }
//! ```

mod local;

use anyhow::{Context, Result};
use std::io::BufRead;
use std::path::{Path, PathBuf};

pub use local::{list_directory, list_pattern, Compression};

/// Default buffer size for reading operations (1MB)
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Prefix given to a file's name once it has been loaded.
pub const PROCESSED_PREFIX: &str = ".";

/// A user-supplied input location
#[derive(Debug, Clone, PartialEq)]
pub enum FileSource {
    /// A single file
    File(PathBuf),
    /// Every file directly inside a directory (path ends with /)
    Directory(PathBuf),
    /// Glob pattern over file paths
    Pattern(String),
}

impl FileSource {
    /// Parse a string into a FileSource, auto-detecting the source type
    ///
    /// - contains `*`, `?` or `[` -> Pattern
    /// - ends with `/` -> Directory
    /// - everything else -> File
    pub fn parse(uri: &str) -> Self {
        if uri.contains(['*', '?', '[']) {
            FileSource::Pattern(uri.to_string())
        } else if uri.ends_with('/') || uri.ends_with(std::path::MAIN_SEPARATOR) {
            FileSource::Directory(PathBuf::from(uri))
        } else {
            FileSource::File(PathBuf::from(uri))
        }
    }

    /// Resolve this source into concrete, not yet processed files, sorted by path.
    ///
    /// An empty result is not an error.
    pub async fn resolve(&self) -> Result<Vec<ResolvedSource>> {
        match self {
            FileSource::File(path) => Ok(vec![ResolvedSource::new(path.clone())]),
            FileSource::Directory(path) => list_directory(path).await,
            FileSource::Pattern(pattern) => list_pattern(pattern),
        }
    }

    /// Get a display name for logging
    pub fn display_name(&self) -> String {
        match self {
            FileSource::File(path) | FileSource::Directory(path) => path.display().to_string(),
            FileSource::Pattern(pattern) => pattern.clone(),
        }
    }
}

/// A single file ready for reading
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedSource {
    path: PathBuf,
}

impl ResolvedSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get a display name for logging
    pub fn display_name(&self) -> String {
        self.path.display().to_string()
    }

    /// Get the file extension (without the dot)
    pub fn extension(&self) -> Option<&str> {
        self.path.extension().and_then(|e| e.to_str())
    }

    pub fn compression(&self) -> Compression {
        Compression::from_path(&self.path)
    }

    /// Open this file and return a buffered line reader over its decompressed content.
    ///
    /// This performs blocking IO and is meant to be called from a blocking
    /// context (e.g. `tokio::task::spawn_blocking`).
    pub fn open(&self, buffer_size: usize) -> Result<Box<dyn BufRead + Send>> {
        local::open_file(&self.path, self.compression(), buffer_size)
    }

    /// Path this file is renamed to by [`mark_processed`](Self::mark_processed).
    pub fn processed_path(&self) -> Result<PathBuf> {
        let name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Invalid file name: {}", self.path.display()))?;
        Ok(self.path.with_file_name(format!("{PROCESSED_PREFIX}{name}")))
    }

    /// Rename the file in place so later discovery skips it.
    pub async fn mark_processed(&self) -> Result<PathBuf> {
        let target = self.processed_path()?;
        tokio::fs::rename(&self.path, &target)
            .await
            .with_context(|| {
                format!(
                    "Failed to rename {} to {}",
                    self.path.display(),
                    target.display()
                )
            })?;
        tracing::debug!("Renamed {} to {}", self.path.display(), target.display());
        Ok(target)
    }
}
