//! Error taxonomy for the indexing and retrieval engine.
//!
//! | Variant | Raised when | Propagation |
//! |---------|-------------|-------------|
//! | [`Configuration`](EngineError::Configuration) | no storage root / bad settings | always escapes |
//! | [`Ingestion`](EngineError::Ingestion) | one file cannot be parsed | caught by sync, logged, skipped |
//! | [`DimensionMismatch`](EngineError::DimensionMismatch) | vector size ≠ index dims | fatal to the add call |
//! | [`Transport`](EngineError::Transport) | embedding / chat collaborator failure | aborts sync; becomes answer text in chat |
//! | [`Persistence`](EngineError::Persistence) | index or metadata artifact write/read fails | always escapes |
//! | [`Corrupt`](EngineError::Corrupt) | persisted artifacts disagree | always escapes |
//! | [`Registry`](EngineError::Registry) | SQLite failure | always escapes |

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to ingest {}: {reason}", .path.display())]
    Ingestion { path: PathBuf, reason: String },

    #[error("embedding dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("{service} error: {message}")]
    Transport {
        service: &'static str,
        message: String,
    },

    #[error("failed to persist {}: {reason}", .path.display())]
    Persistence { path: PathBuf, reason: String },

    #[error("vector index is corrupt: {0}")]
    Corrupt(String),

    #[error("registry error: {0}")]
    Registry(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub(crate) fn ingestion(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        EngineError::Ingestion {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        EngineError::Persistence {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn transport(service: &'static str, message: impl ToString) -> Self {
        EngineError::Transport {
            service,
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
