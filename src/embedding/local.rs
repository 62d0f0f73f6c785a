/// Local embedding provider using fastembed
///
/// Provides offline embedding generation. The default is the multilingual
/// paraphrase MiniLM (384 dimensions) so Korean and English mail share a space.
/// No API key required; model weights are downloaded and cached locally.
/// Weights load only in `warm_up`; embedding before that is an error.
/// All CPU-bound fastembed calls are wrapped in spawn_blocking to avoid blocking async runtime.

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::task;

use super::{EmbeddingError, Embedder};

/// Local embedding provider backed by fastembed.
///
/// `TextEmbedding` sits behind a Mutex: ONNX sessions need exclusive access.
pub struct LocalEmbedder {
    cache_dir: PathBuf,
    name: String,
    model: EmbeddingModel,
    dim: usize,
    loaded: OnceLock<Arc<Mutex<TextEmbedding>>>,
}

/// Map a configured model name to the fastembed model and its output dimension.
fn resolve_model(name: &str) -> Option<(EmbeddingModel, usize)> {
    match name {
        "paraphrase-multilingual-MiniLM-L12-v2" => Some((EmbeddingModel::ParaphraseMLMiniLML12V2, 384)),
        "all-MiniLM-L6-v2" => Some((EmbeddingModel::AllMiniLML6V2, 384)),
        "multilingual-e5-small" => Some((EmbeddingModel::MultilingualE5Small, 384)),
        "bge-small-en-v1.5" => Some((EmbeddingModel::BGESmallENV15, 384)),
        _ => None,
    }
}

impl LocalEmbedder {
    /// Create a LocalEmbedder without loading weights.
    ///
    /// # Arguments
    /// * `model_name` - one of the supported fastembed model names
    /// * `cache_dir` - Directory to cache model weights (fastembed downloads on warm-up)
    pub fn new(model_name: &str, cache_dir: &str) -> Result<Self, EmbeddingError> {
        let (model, dim) = resolve_model(model_name).ok_or_else(|| {
            EmbeddingError::NotConfigured(format!("Unsupported local embedding model: {}", model_name))
        })?;

        Ok(LocalEmbedder {
            cache_dir: PathBuf::from(cache_dir),
            name: model_name.to_string(),
            model,
            dim,
            loaded: OnceLock::new(),
        })
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.get().is_some()
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let model = self.loaded.get().cloned().ok_or_else(|| {
            EmbeddingError::ModelInit(format!("Model '{}' is not loaded; call warm_up first", self.name))
        })?;
        let text = text.to_string();

        let mut vectors = task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| EmbeddingError::Generation("embedding model lock poisoned".to_string()))?;
            model
                .embed(vec![text.as_str()], None)
                .map_err(|e| EmbeddingError::Generation(e.to_string()))
        })
        .await
        .map_err(|e| EmbeddingError::Generation(e.to_string()))??;

        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Generation("fastembed returned no vectors".to_string()))
    }

    async fn warm_up(&self) -> Result<(), EmbeddingError> {
        if self.is_loaded() {
            return Ok(());
        }

        let cache_dir = self.cache_dir.clone();
        let model = self.model.clone();
        let name = self.name.clone();

        let embedding = task::spawn_blocking(move || {
            std::fs::create_dir_all(&cache_dir)
                .map_err(|e| EmbeddingError::ModelInit(format!("Failed to create cache dir: {}", e)))?;
            tracing::info!(model = %name, cache_dir = %cache_dir.display(), "Loading embedding model");
            TextEmbedding::try_new(
                InitOptions::new(model)
                    .with_cache_dir(cache_dir)
                    .with_show_download_progress(false),
            )
            .map_err(|e| EmbeddingError::ModelInit(e.to_string()))
        })
        .await
        .map_err(|e| EmbeddingError::ModelInit(e.to_string()))??;

        // A concurrent warm-up may have won the race; either instance is equivalent.
        let _ = self.loaded.set(Arc::new(Mutex::new(embedding)));
        Ok(())
    }

    fn model_name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_model_is_rejected() {
        let result = LocalEmbedder::new("not-a-model", "/tmp/mailrank-test-cache");
        assert!(matches!(result, Err(EmbeddingError::NotConfigured(_))));
    }

    #[tokio::test]
    async fn test_embed_before_warm_up_fails() {
        let embedder = LocalEmbedder::new("paraphrase-multilingual-MiniLM-L12-v2", "/tmp/mailrank-test-cache")
            .expect("known model");
        assert!(!embedder.is_loaded());
        assert_eq!(embedder.dimension(), 384);
        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::ModelInit(_)));
    }
}
