//! One open project and its engine.
//!
//! A [`Notebook`] owns the project's [`Registry`], its [`VectorIndex`] and
//! the chat model, and exposes the engine operations: sync, query, answer
//! and history. Everything is synchronous; mutating operations take
//! `&mut self`, so a notebook serves one caller at a time. Callers that need
//! concurrency move the notebook onto a worker thread (see the CLI's chat
//! loop).
//!
//! On-disk layout under the project root:
//!
//! ```text
//! <project>/
//!   notes.txt, report.pdf, ...        source files
//!   .openbook/
//!     registry.sqlite
//!     vector_index/
//!       index.bin
//!       metadata.json
//! ```
//!
//! A project created by the earlier desktop app also has
//! `project_dependency/project_data.db`; its conversation log is copied into
//! the new registry the first time the project is opened here.

use std::path::{Path, PathBuf};

use crate::answer::{self, AnswerContext};
use crate::config::Config;
use crate::embedding::{self, Embedder};
use crate::error::{EngineError, Result};
use crate::index::VectorIndex;
use crate::llm::{ChatModel, OllamaChat};
use crate::models::{ChatMessage, FileState, QueryResult};
use crate::registry::Registry;
use crate::stats::{self, ProjectStats};
use crate::sync::{self, SyncOptions, SyncReport};

/// Hidden per-project directory holding the registry and the index.
pub const DEPENDENCY_DIR: &str = ".openbook";
pub const REGISTRY_FILE: &str = "registry.sqlite";
pub const INDEX_DIR: &str = "vector_index";

/// Where the earlier desktop app kept a project's database. Its
/// conversation log is imported when a project is first opened.
pub const LEGACY_DEPENDENCY_DIR: &str = "project_dependency";
pub const LEGACY_DB_FILE: &str = "project_data.db";

/// The knobs a notebook reads from [`Config`].
#[derive(Debug, Clone)]
pub struct NotebookSettings {
    pub max_chars: usize,
    pub max_file_bytes: u64,
    pub top_k: usize,
    pub system_prompt: String,
}

impl From<&Config> for NotebookSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_chars: config.chunking.max_chars,
            max_file_bytes: config.ingest.max_file_bytes,
            top_k: config.retrieval.top_k,
            system_prompt: config.llm.system_prompt.clone(),
        }
    }
}

impl Default for NotebookSettings {
    fn default() -> Self {
        NotebookSettings::from(&Config::default())
    }
}

pub struct Notebook {
    root: PathBuf,
    registry: Registry,
    index: VectorIndex,
    chat: Box<dyn ChatModel>,
    settings: NotebookSettings,
}

impl Notebook {
    /// Opens the project at `root` with the configured Ollama (or local)
    /// collaborators.
    pub fn open(root: &Path, config: &Config) -> Result<Self> {
        let embedder = embedding::create_embedder(&config.embedding)?;
        let chat = OllamaChat::new(&config.llm)?;
        Self::with_components(root, NotebookSettings::from(config), embedder, Box::new(chat))
    }

    /// Opens the project at `root` with caller-supplied collaborators.
    /// The index is not read until first use.
    pub fn with_components(
        root: &Path,
        settings: NotebookSettings,
        embedder: Box<dyn Embedder>,
        chat: Box<dyn ChatModel>,
    ) -> Result<Self> {
        if !root.is_dir() {
            return Err(EngineError::Configuration(format!(
                "project folder does not exist: {}",
                root.display()
            )));
        }

        let dep_dir = root.join(DEPENDENCY_DIR);
        std::fs::create_dir_all(&dep_dir)?;

        let registry_path = dep_dir.join(REGISTRY_FILE);
        let fresh = !registry_path.exists();
        let registry = Registry::open(&registry_path)?;
        if fresh {
            import_legacy_history(root, &registry);
        }
        let index = VectorIndex::new(dep_dir.join(INDEX_DIR), embedder);

        tracing::debug!(project = %root.display(), "notebook opened");

        Ok(Self {
            root: root.to_path_buf(),
            registry,
            index,
            chat,
            settings,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn name(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    pub fn settings(&self) -> &NotebookSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn index_mut(&mut self) -> &mut VectorIndex {
        &mut self.index
    }

    fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            max_chars: self.settings.max_chars,
            max_file_bytes: self.settings.max_file_bytes,
        }
    }

    /// Brings the index up to date with the project folder.
    pub fn sync(&mut self) -> Result<SyncReport> {
        let options = self.sync_options();
        sync::sync_project(&self.root, &self.registry, &mut self.index, options)
    }

    /// Rebuilds the index from every source file.
    pub fn reindex(&mut self) -> Result<SyncReport> {
        let options = self.sync_options();
        sync::reindex(&self.root, &self.registry, &mut self.index, options)
    }

    pub fn query(&mut self, text: &str, k: usize) -> Result<Vec<QueryResult>> {
        self.index.query(text, k)
    }

    /// Runs one conversation turn and returns the answer text.
    pub fn answer_query(&mut self, query: &str) -> Result<String> {
        let ctx = AnswerContext {
            registry: &self.registry,
            index: &mut self.index,
            chat: self.chat.as_ref(),
            system_prompt: &self.settings.system_prompt,
            top_k: self.settings.top_k,
        };
        answer::answer_query(ctx, query)
    }

    pub fn history(&self) -> Result<Vec<ChatMessage>> {
        self.registry.read_history()
    }

    pub fn file_states(&self) -> Result<Vec<FileState>> {
        self.registry.list_file_states()
    }

    pub fn stats(&mut self) -> Result<ProjectStats> {
        stats::collect(self)
    }
}

fn import_legacy_history(root: &Path, registry: &Registry) {
    let legacy = root.join(LEGACY_DEPENDENCY_DIR).join(LEGACY_DB_FILE);
    if !legacy.is_file() {
        return;
    }
    match registry.import_history(&legacy) {
        Ok(n) => tracing::info!(messages = n, "imported conversation log from {}", legacy.display()),
        Err(e) => tracing::warn!(error = %e, "could not import {}", legacy.display()),
    }
}
