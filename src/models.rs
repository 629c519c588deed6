//! Core data models used throughout Openbook.
//!
//! These types represent the registry rows, chunks, index metadata, and chat
//! turns that flow through the indexing and retrieval pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registry row for one source file of a project.
#[derive(Debug, Clone, PartialEq)]
pub struct FileState {
    pub filename: String,
    pub content_hash: String,
    /// Modification time in epoch seconds, as last observed by sync.
    pub last_modified: Option<f64>,
    /// When the file's chunks were last added to the index (epoch seconds).
    pub indexed_at: Option<i64>,
}

/// One text record produced by an ingestor, before chunking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestedText {
    pub text: String,
    /// Filename (not path) of the file the text came from.
    pub source: String,
}

/// A bounded fragment of source text; the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub source: String,
    /// Position of the chunk within its source file, starting at 0.
    pub position: usize,
}

/// Metadata stored alongside each vector row of the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub text: String,
    pub source: String,
}

impl From<&Chunk> for MetadataRecord {
    fn from(chunk: &Chunk) -> Self {
        Self {
            text: chunk.text.clone(),
            source: chunk.source.clone(),
        }
    }
}

/// A single nearest-neighbour hit.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub metadata: MetadataRecord,
    /// Squared Euclidean distance to the query vector.
    pub distance: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown chat role: '{}'", other)),
        }
    }
}

/// A persisted turn of the project's conversation log.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: i64,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// A message sent to the chat model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}
