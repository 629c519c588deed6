//! In-process embeddings via fastembed.
//!
//! Models are downloaded from Hugging Face on first use and cached. After
//! that no network calls are made. ORT is bundled, so there are no system
//! dependencies.

use std::sync::Mutex;

use super::{Embedder, SERVICE};
use crate::config::EmbeddingConfig;
use crate::error::{EngineError, Result};

pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    batch_size: usize,
    // `TextEmbedding::embed` needs `&mut self`
    model: Mutex<fastembed::TextEmbedding>,
}

impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        let (fastembed_model, default_dims) = resolve_model(&model_name)?;

        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
        )
        .map_err(|e| {
            EngineError::transport(
                SERVICE,
                format!("Failed to initialize local embedding model: {}", e),
            )
        })?;

        tracing::info!(model = %model_name, "local embedding model ready");

        Ok(Self {
            model_name,
            dims: config.dims.unwrap_or(default_dims),
            batch_size: config.batch_size.max(1),
            model: Mutex::new(model),
        })
    }
}

impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut model = self
            .model
            .lock()
            .map_err(|_| EngineError::transport(SERVICE, "local embedding model lock poisoned"))?;
        model
            .embed(texts.to_vec(), Some(self.batch_size))
            .map_err(|e| EngineError::transport(SERVICE, format!("Local embedding failed: {}", e)))
    }
}

fn resolve_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
    use fastembed::EmbeddingModel;
    match name {
        "all-minilm" | "all-minilm-l6-v2" => Ok((EmbeddingModel::AllMiniLML6V2, 384)),
        "bge-small-en-v1.5" => Ok((EmbeddingModel::BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Ok((EmbeddingModel::BGEBaseENV15, 768)),
        "bge-large-en-v1.5" => Ok((EmbeddingModel::BGELargeENV15, 1024)),
        "nomic-embed-text-v1" => Ok((EmbeddingModel::NomicEmbedTextV1, 768)),
        "nomic-embed-text-v1.5" => Ok((EmbeddingModel::NomicEmbedTextV15, 768)),
        "multilingual-e5-small" => Ok((EmbeddingModel::MultilingualE5Small, 384)),
        "multilingual-e5-base" => Ok((EmbeddingModel::MultilingualE5Base, 768)),
        "multilingual-e5-large" => Ok((EmbeddingModel::MultilingualE5Large, 1024)),
        other => Err(EngineError::Configuration(format!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ))),
    }
}
