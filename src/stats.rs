//! Project statistics and health overview.
//!
//! Summarizes what a project has indexed: tracked files, vector counts,
//! per-file chunk coverage and conversation length. Used by `openbook stats`
//! to give confidence that syncs are working as expected.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::notebook::{Notebook, DEPENDENCY_DIR, INDEX_DIR, REGISTRY_FILE};

/// Per-file breakdown of indexed chunks.
#[derive(Debug, Clone, PartialEq)]
pub struct FileStats {
    pub filename: String,
    pub chunks: usize,
    pub indexed_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectStats {
    pub project: PathBuf,
    pub model: String,
    pub dims: usize,
    pub vectors: usize,
    pub messages: i64,
    pub registry_bytes: u64,
    pub index_bytes: u64,
    pub files: Vec<FileStats>,
}

pub fn collect(notebook: &mut Notebook) -> Result<ProjectStats> {
    let root = notebook.root().to_path_buf();
    let states = notebook.file_states()?;
    let messages = notebook.registry().message_count()?;

    let index = notebook.index_mut();
    let model = index.embedder().model_name().to_string();
    let dims = index.dims();
    let vectors = index.count()?;

    let mut chunk_counts: HashMap<&str, usize> = HashMap::new();
    for record in index.metadata()? {
        *chunk_counts.entry(record.source.as_str()).or_default() += 1;
    }

    let files = states
        .into_iter()
        .map(|s| FileStats {
            chunks: chunk_counts.get(s.filename.as_str()).copied().unwrap_or(0),
            filename: s.filename,
            indexed_at: s.indexed_at,
        })
        .collect();

    let dep_dir = root.join(DEPENDENCY_DIR);
    Ok(ProjectStats {
        registry_bytes: file_size(&dep_dir.join(REGISTRY_FILE)),
        index_bytes: dir_size(&dep_dir.join(INDEX_DIR)),
        project: root,
        model,
        dims,
        vectors,
        messages,
        files,
    })
}

/// Print a stats summary to stdout.
pub fn print_stats(stats: &ProjectStats) {
    println!("Openbook — Project Stats");
    println!("========================");
    println!();
    println!("  Project:     {}", stats.project.display());
    println!("  Registry:    {}", format_bytes(stats.registry_bytes));
    println!("  Index:       {}", format_bytes(stats.index_bytes));
    println!();
    println!("  Model:       {} ({} dims)", stats.model, stats.dims);
    println!("  Files:       {}", stats.files.len());
    println!("  Vectors:     {}", stats.vectors);
    println!("  Messages:    {}", stats.messages);

    if !stats.files.is_empty() {
        println!();
        println!("  By file:");
        println!("  {:<36} {:>8}   {}", "FILE", "CHUNKS", "LAST INDEXED");
        println!("  {}", "-".repeat(66));

        for f in &stats.files {
            let indexed = match f.indexed_at {
                Some(ts) => format_ts_relative(ts),
                None => "never".to_string(),
            };
            println!("  {:<36} {:>8}   {}", f.filename, f.chunks, indexed);
        }
    }

    println!();
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn dir_size(path: &Path) -> u64 {
    std::fs::read_dir(path)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.metadata().ok())
                .filter(|m| m.is_file())
                .map(|m| m.len())
                .sum()
        })
        .unwrap_or(0)
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
