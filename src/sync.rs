//! Incremental synchronization of a project folder into its vector index.
//!
//! Every supported, non-hidden file directly under the project root is
//! checked against the registry in two tiers:
//!
//! 1. **mtime**: within [`MTIME_TOLERANCE_SECS`] of the stored value → unchanged.
//! 2. **content hash**: SHA-256 equal to the stored hash → touched only;
//!    the stored mtime is refreshed and nothing is embedded.
//!
//! Anything else is ingested, chunked, embedded, appended to the index
//! (which persists), and only then recorded in the registry. Files are
//! committed one at a time, so an aborted run keeps what it finished.
//!
//! Chunks from an earlier version of a changed file stay in the index.
//! [`reindex`] rebuilds from scratch.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::chunk::chunk_records;
use crate::error::{EngineError, Result};
use crate::index::VectorIndex;
use crate::ingest;
use crate::registry::Registry;

/// Stored and current mtimes closer than this are treated as equal.
pub const MTIME_TOLERANCE_SECS: f64 = 1.0;

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub max_chars: usize,
    pub max_file_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    pub filename: String,
    pub reason: String,
}

/// Outcome of one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub scanned: usize,
    pub unchanged: usize,
    pub touched: usize,
    pub indexed_files: usize,
    /// Ingested records across all indexed files.
    pub documents: usize,
    pub chunks_added: usize,
    pub failed: Vec<SyncFailure>,
}

impl SyncReport {
    /// True when no file was (re)indexed. Touched files only had their
    /// mtime refreshed and do not count.
    pub fn is_up_to_date(&self) -> bool {
        self.indexed_files == 0
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_up_to_date() {
            write!(f, "Project up to date.")?;
        } else {
            write!(f, "Indexed {} new documents.", self.documents)?;
        }
        if !self.failed.is_empty() {
            let names: Vec<&str> = self.failed.iter().map(|s| s.filename.as_str()).collect();
            write!(f, " {} file(s) failed: {}", self.failed.len(), names.join(", "))?;
        }
        Ok(())
    }
}

/// Supported source files directly under `root`, sorted by filename.
/// Hidden entries (including the dependency directory) are skipped.
pub fn scan_sources(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();
    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() || is_hidden(entry.file_name()) {
            continue;
        }
        if ingest::is_supported(entry.path()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

/// Streaming SHA-256 of a file's bytes, hex encoded.
pub fn file_hash(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Modification time in fractional epoch seconds.
pub fn mtime_secs(path: &Path) -> std::io::Result<f64> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64())
}

pub fn sync_project(
    root: &Path,
    registry: &Registry,
    index: &mut VectorIndex,
    options: SyncOptions,
) -> Result<SyncReport> {
    let mut report = SyncReport::default();

    for path in scan_sources(root)? {
        report.scanned += 1;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let mtime = match mtime_secs(&path) {
            Ok(m) => m,
            Err(e) => {
                record_failure(&mut report, &filename, e);
                continue;
            }
        };

        let stored = registry.get_file_state(&filename)?;
        if let Some(prev) = stored.as_ref().and_then(|s| s.last_modified) {
            if (prev - mtime).abs() < MTIME_TOLERANCE_SECS {
                tracing::debug!(file = %filename, "unchanged");
                report.unchanged += 1;
                continue;
            }
        }

        let hash = match file_hash(&path) {
            Ok(h) => h,
            Err(e) => {
                record_failure(&mut report, &filename, e);
                continue;
            }
        };

        if let Some(state) = &stored {
            if state.content_hash == hash {
                tracing::debug!(file = %filename, "touched, refreshing mtime");
                registry.update_mtime(&filename, mtime)?;
                report.touched += 1;
                continue;
            }
            tracing::warn!(
                file = %filename,
                "content changed; chunks from the previous version remain until reindex"
            );
        }

        let records = match ingest::ingest(&path, options.max_file_bytes) {
            Ok(records) => records,
            Err(e @ EngineError::Ingestion { .. }) => {
                record_failure(&mut report, &filename, e);
                continue;
            }
            Err(e) => return Err(e),
        };

        tracing::info!(file = %filename, "indexing");
        let chunks = chunk_records(&records, options.max_chars);
        let added = index.add_documents(&chunks)?;
        registry.upsert_file_state(&filename, &hash, mtime)?;

        report.indexed_files += 1;
        report.documents += records.len();
        report.chunks_added += added;
    }

    tracing::info!(
        scanned = report.scanned,
        unchanged = report.unchanged,
        touched = report.touched,
        indexed = report.indexed_files,
        chunks = report.chunks_added,
        failed = report.failed.len(),
        "sync finished"
    );
    Ok(report)
}

/// Clears the index and the file registry, then syncs everything.
pub fn reindex(
    root: &Path,
    registry: &Registry,
    index: &mut VectorIndex,
    options: SyncOptions,
) -> Result<SyncReport> {
    index.clear()?;
    let forgotten = registry.clear_file_states()?;
    tracing::info!(files = forgotten, "index cleared for rebuild");
    sync_project(root, registry, index, options)
}

fn record_failure(report: &mut SyncReport, filename: &str, reason: impl fmt::Display) {
    tracing::warn!(file = %filename, error = %reason, "skipping file");
    report.failed.push(SyncFailure {
        filename: filename.to_string(),
        reason: reason.to_string(),
    });
}
