/// Embedder trait and supporting types
///
/// Provides a pluggable interface for text embedding generation.
/// Supports local fastembed models (default, no API key) and OpenAI-compatible APIs.
/// The embedder is an external collaborator of the retrieval core: the core only
/// ever calls `embed` for the query text and `warm_up` during start-up.

pub mod local;
pub mod openai;

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// fastembed model initialization failure
    #[error("Model initialization error: {0}")]
    ModelInit(String),

    /// Embedding generation failure (inference error)
    #[error("Embedding generation error: {0}")]
    Generation(String),

    /// API provider returned an HTTP error
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Provider not configured (e.g., missing API key)
    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

/// Core trait for embedding text into fixed-dimension float vectors.
///
/// Implementations must be Send + Sync to support use in async contexts
/// and across thread boundaries (e.g., Arc<dyn Embedder>).
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding vector for the given text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Load model weights or open connections ahead of the first query.
    ///
    /// Remote providers have nothing to load.
    async fn warm_up(&self) -> Result<(), EmbeddingError> {
        Ok(())
    }

    /// Return the model name identifier (e.g., "paraphrase-multilingual-MiniLM-L12-v2").
    fn model_name(&self) -> &str;

    /// Return the dimension of the embedding vectors produced by this model.
    fn dimension(&self) -> usize;
}
