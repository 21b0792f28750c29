//! Local filesystem discovery and readers

use crate::ResolvedSource;
use anyhow::{bail, Context, Result};
use flate2::bufread::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Compression applied to a log file, detected from its extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    None,
}

impl Compression {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("gz") => Compression::Gzip,
            _ => Compression::None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Compression::Gzip => "gzip",
            Compression::None => "none",
        }
    }
}

/// Open a local file as a buffered line reader.
///
/// Gzip files must start with the gzip magic bytes; anything else is
/// reported here rather than on the first read. Concatenated gzip members
/// are read as one stream.
pub fn open_file(
    path: &Path,
    compression: Compression,
    buffer_size: usize,
) -> Result<Box<dyn BufRead + Send>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;
    let mut raw = BufReader::with_capacity(buffer_size, file);

    match compression {
        Compression::Gzip => {
            let head = raw
                .fill_buf()
                .with_context(|| format!("Failed to read file: {}", path.display()))?;
            if !head.starts_with(&GZIP_MAGIC) {
                bail!("Not a gzip file: {}", path.display());
            }
            Ok(Box::new(BufReader::with_capacity(
                buffer_size,
                MultiGzDecoder::new(raw),
            )))
        }
        Compression::None => Ok(Box::new(raw)),
    }
}

/// List all files in a directory (non-recursive, immediate children only)
///
/// Returns only files, not subdirectories, and skips already processed files.
pub async fn list_directory(path: &Path) -> Result<Vec<ResolvedSource>> {
    let mut results = Vec::new();

    let mut entries = tokio::fs::read_dir(path)
        .await
        .with_context(|| format!("Failed to read directory: {}", path.display()))?;

    while let Some(entry) = entries.next_entry().await? {
        let entry_path = entry.path();
        let metadata = entry
            .metadata()
            .await
            .with_context(|| format!("Failed to get metadata for: {}", entry_path.display()))?;

        if metadata.is_file() && !is_processed(&entry_path) {
            results.push(ResolvedSource::new(entry_path));
        }
    }

    // Sort for consistent ordering
    results.sort_by(|a, b| a.path().cmp(b.path()));

    tracing::debug!(
        "Listed {} files in directory: {}",
        results.len(),
        path.display()
    );

    Ok(results)
}

/// List all files matching a glob pattern, skipping already processed files.
pub fn list_pattern(pattern: &str) -> Result<Vec<ResolvedSource>> {
    let paths =
        glob::glob(pattern).with_context(|| format!("Invalid file pattern: {pattern}"))?;

    let mut results = Vec::new();
    for entry in paths {
        let path = entry.with_context(|| format!("Failed to read match for: {pattern}"))?;
        if path.is_file() && !is_processed(&path) {
            results.push(ResolvedSource::new(path));
        }
    }

    results.sort_by(|a, b| a.path().cmp(b.path()));

    tracing::debug!("Matched {} files for pattern: {}", results.len(), pattern);

    Ok(results)
}

fn is_processed(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(crate::PROCESSED_PREFIX))
}
