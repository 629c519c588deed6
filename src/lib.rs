//! # Openbook
//!
//! A local-first, per-project document knowledge base.
//!
//! Each project is a folder of documents. Openbook keeps an embedding index
//! of the folder synchronized incrementally (mtime first, then content hash,
//! so unchanged files are never re-embedded) and answers questions by
//! retrieving the closest fragments and handing them, with the question, to
//! a local language model.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────────┐   ┌───────────────┐
//! │  Project   │──▶│  Sync            │──▶│  VectorIndex  │
//! │  folder    │   │  Ingest+Chunk    │   │  flat L2      │
//! └────────────┘   └────────┬─────────┘   └───────┬───────┘
//!                           │                     │
//!                           ▼                     ▼
//!                    ┌────────────┐        ┌────────────┐
//!                    │  Registry  │◀───────│  Answer    │──▶ chat model
//!                    │  SQLite    │        │  synthesis │
//!                    └────────────┘        └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! openbook setup ~/Documents          # storage root
//! openbook create biology
//! openbook add biology notes.pdf
//! openbook sync biology
//! openbook ask biology "What is photosynthesis?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Engine error taxonomy |
//! | [`registry`] | File registry and conversation log |
//! | [`extract`] | PDF / DOCX / XLSX text extraction |
//! | [`ingest`] | Per-format ingestion |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Persisted flat vector index |
//! | [`sync`] | Incremental sync coordinator |
//! | [`llm`] | Chat model abstraction |
//! | [`answer`] | Retrieval-augmented answers |
//! | [`notebook`] | One open project |
//! | [`project`] | Workspace and project management |
//! | [`stats`] | Project statistics |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod answer;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod notebook;
pub mod project;
pub mod registry;
pub mod stats;
pub mod sync;

pub use error::{EngineError, Result};
pub use notebook::{Notebook, NotebookSettings};
pub use project::{Project, Workspace};
