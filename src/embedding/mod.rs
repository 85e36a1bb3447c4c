//! Text-to-vector embedding capability.
//!
//! Indexing and search only see the [`EmbeddingProvider`] trait. The binary
//! hands them a [`LazyEmbedder`], which defers loading the ONNX model until
//! the first text actually needs a vector.

pub mod local;

use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::config::EmbeddingConfig;

/// Number of dimensions in the embedding vectors (all-MiniLM-L6-v2).
pub const EMBEDDING_DIM: usize = 384;

/// Trait for embedding text into vectors.
///
/// Implementations produce L2-normalized vectors of exactly [`EMBEDDING_DIM`]
/// dimensions. All methods are synchronous; async callers go through
/// `tokio::task::spawn_blocking`.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Implementations may override for batched inference.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Identifies the embedding space. Vectors from different ids are not
    /// comparable.
    fn model_id(&self) -> &str;
}

/// Create an embedding provider from config, loading the model now.
///
/// Currently only `"local"` is supported (ONNX Runtime + all-MiniLM-L6-v2).
/// Fails if model files are missing; run `echoes model download` first.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "local" => {
            let provider = local::LocalEmbeddingProvider::new(config)?;
            Ok(Box::new(provider))
        }
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: local"),
    }
}

type Factory = dyn Fn() -> Result<Box<dyn EmbeddingProvider>> + Send + Sync;

/// Shared handle that loads its provider on first use.
///
/// A failed load is not cached: the next call tries again, so a model
/// downloaded while the process runs is picked up without a restart.
pub struct LazyEmbedder {
    model_id: String,
    factory: Box<Factory>,
    loaded: Mutex<Option<Arc<dyn EmbeddingProvider>>>,
}

impl LazyEmbedder {
    pub fn from_config(config: &EmbeddingConfig) -> Arc<Self> {
        let config = config.clone();
        Arc::new(Self::with_factory(config.model.clone(), move || {
            create_provider(&config)
        }))
    }

    pub fn with_factory(
        model_id: impl Into<String>,
        factory: impl Fn() -> Result<Box<dyn EmbeddingProvider>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            factory: Box::new(factory),
            loaded: Mutex::new(None),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.lock().map(|g| g.is_some()).unwrap_or(false)
    }

    fn provider(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        let mut slot = self
            .loaded
            .lock()
            .map_err(|e| anyhow::anyhow!("embedder lock poisoned: {e}"))?;
        if let Some(provider) = slot.as_ref() {
            return Ok(Arc::clone(provider));
        }

        let provider: Arc<dyn EmbeddingProvider> = Arc::from((self.factory)()?);
        anyhow::ensure!(
            provider.model_id() == self.model_id,
            "embedding provider reports model {}, expected {}",
            provider.model_id(),
            self.model_id
        );
        tracing::info!(model = %self.model_id, "embedding provider loaded");
        *slot = Some(Arc::clone(&provider));
        Ok(provider)
    }
}

impl EmbeddingProvider for LazyEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.provider()?.embed(text)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.provider()?.embed_batch(texts)
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
