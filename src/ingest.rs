//! Format-specific ingestion of project source files.
//!
//! [`SourceFormat`] is the closed allow-list of extensions the engine reads.
//! [`ingest`] turns one file into an ordered list of [`IngestedText`]
//! records tagged with the file's name. Binary formats go through
//! [`crate::extract`]; everything else is decoded here.

use std::path::Path;

use crate::error::{EngineError, Result};
use crate::extract;
use crate::models::IngestedText;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Pdf,
    Text,
    Markdown,
    Csv,
    Docx,
    Xlsx,
    Json,
}

impl SourceFormat {
    pub const ALL: [SourceFormat; 7] = [
        SourceFormat::Pdf,
        SourceFormat::Text,
        SourceFormat::Markdown,
        SourceFormat::Csv,
        SourceFormat::Docx,
        SourceFormat::Xlsx,
        SourceFormat::Json,
    ];

    /// Looks up the format by extension, ignoring case.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(SourceFormat::Pdf),
            "txt" => Some(SourceFormat::Text),
            "md" => Some(SourceFormat::Markdown),
            "csv" => Some(SourceFormat::Csv),
            "docx" => Some(SourceFormat::Docx),
            "xlsx" => Some(SourceFormat::Xlsx),
            "json" => Some(SourceFormat::Json),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            SourceFormat::Pdf => "pdf",
            SourceFormat::Text => "txt",
            SourceFormat::Markdown => "md",
            SourceFormat::Csv => "csv",
            SourceFormat::Docx => "docx",
            SourceFormat::Xlsx => "xlsx",
            SourceFormat::Json => "json",
        }
    }
}

pub fn is_supported(path: &Path) -> bool {
    SourceFormat::from_path(path).is_some()
}

/// Reads `path` and returns its text records.
///
/// Fails with [`EngineError::Ingestion`] when the extension is not
/// supported, the file exceeds `max_file_bytes`, or parsing fails.
/// Records whose text is blank are dropped.
pub fn ingest(path: &Path, max_file_bytes: u64) -> Result<Vec<IngestedText>> {
    let format = SourceFormat::from_path(path)
        .ok_or_else(|| EngineError::ingestion(path, "unsupported file extension"))?;

    let size = std::fs::metadata(path)
        .map_err(|e| EngineError::ingestion(path, e))?
        .len();
    if size > max_file_bytes {
        return Err(EngineError::ingestion(
            path,
            format!("file is {} bytes, limit is {}", size, max_file_bytes),
        ));
    }

    let bytes = std::fs::read(path).map_err(|e| EngineError::ingestion(path, e))?;
    let source = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let texts = match format {
        SourceFormat::Text | SourceFormat::Markdown => {
            vec![String::from_utf8_lossy(&bytes).into_owned()]
        }
        SourceFormat::Csv => csv_rows(&bytes).map_err(|e| EngineError::ingestion(path, e))?,
        SourceFormat::Json => {
            let value: serde_json::Value =
                serde_json::from_slice(&bytes).map_err(|e| EngineError::ingestion(path, e))?;
            let pretty =
                serde_json::to_string_pretty(&value).map_err(|e| EngineError::ingestion(path, e))?;
            vec![pretty]
        }
        SourceFormat::Pdf => {
            vec![extract::extract_pdf(&bytes).map_err(|e| EngineError::ingestion(path, e))?]
        }
        SourceFormat::Docx => {
            vec![extract::extract_docx(&bytes).map_err(|e| EngineError::ingestion(path, e))?]
        }
        SourceFormat::Xlsx => {
            vec![extract::extract_xlsx(&bytes).map_err(|e| EngineError::ingestion(path, e))?]
        }
    };

    let records: Vec<IngestedText> = texts
        .into_iter()
        .filter(|t| !t.trim().is_empty())
        .map(|text| IngestedText {
            text,
            source: source.clone(),
        })
        .collect();

    tracing::debug!(file = %source, records = records.len(), "ingested");
    Ok(records)
}

/// One `header: value` block per data row.
fn csv_rows(bytes: &[u8]) -> std::result::Result<Vec<String>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);
    let headers = reader.headers()?.clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let lines: Vec<String> = record
            .iter()
            .enumerate()
            .map(|(i, value)| match headers.get(i) {
                Some(h) if !h.is_empty() => format!("{}: {}", h, value),
                _ => value.to_string(),
            })
            .collect();
        rows.push(lines.join("\n"));
    }
    Ok(rows)
}
