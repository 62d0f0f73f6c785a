/// Domain-specific error types for mailrank
///
/// Mandatory-dependency failures (vector backend, embedder) surface as `SearchError`.
/// Optional-stage failures (pairwise scorer) are `RerankerUnavailable` and never
/// leave the reranking stage: the orchestrator logs them and skips the stage.

use thiserror::Error;

/// Errors raised while building a lexical index snapshot.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IndexBuildError {
    #[error("Document id '{id}' appears more than once in the corpus")]
    DuplicateId { id: String },

    #[error("Document at position {position} has an empty id")]
    EmptyId { position: usize },
}

/// Errors returned by `SearchEngine::search` and friends.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Vector backend unavailable for collection '{collection}': {reason}")]
    VectorBackendUnavailable { collection: String, reason: String },

    #[error("Vector backend timed out after {timeout_ms}ms for collection '{collection}'")]
    VectorBackendTimeout { collection: String, timeout_ms: u64 },

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Invalid pipeline configuration ({field}): {message}")]
    InvalidConfig { field: String, message: String },

    #[error("Search cancelled before stage '{stage}'")]
    Cancelled { stage: &'static str },

    #[error("Lexical index build failed: {0}")]
    IndexBuild(#[from] IndexBuildError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SearchError {
    /// Helper to create configuration validation errors with field names
    ///
    /// Example:
    /// ```
    /// use mailrank::errors::SearchError;
    /// let err = SearchError::invalid_config("final_top_k", "must be at least 1");
    /// assert!(err.to_string().contains("final_top_k"));
    /// ```
    pub fn invalid_config(field: &str, message: &str) -> Self {
        SearchError::InvalidConfig {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    /// True for both flavors of vector backend failure (unreachable or timed out).
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(
            self,
            SearchError::VectorBackendUnavailable { .. } | SearchError::VectorBackendTimeout { .. }
        )
    }
}

impl From<crate::embedding::EmbeddingError> for SearchError {
    fn from(e: crate::embedding::EmbeddingError) -> Self {
        SearchError::Embedding(e.to_string())
    }
}

/// Reasons the pairwise scorer could not produce scores.
///
/// Recovered locally by the reranking stage.
#[derive(Debug, Error)]
pub enum RerankerUnavailable {
    #[error("No pairwise scorer registered under '{0}'")]
    NotConfigured(String),

    #[error("Pairwise scorer timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Reranker API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Pairwise scoring failed: {0}")]
    Failed(String),

    #[error("Pairwise scorer returned {got} scores for {expected} pairs")]
    LengthMismatch { expected: usize, got: usize },
}

/// Errors from the explicit warm-up step that loads model backends.
#[derive(Debug, Error)]
pub enum WarmupError {
    #[error("Embedder '{model}' failed to warm up: {reason}")]
    Embedder { model: String, reason: String },

    #[error("Pairwise scorer '{name}' failed to warm up: {reason}")]
    Scorer { name: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_unavailable_covers_timeout() {
        let timeout = SearchError::VectorBackendTimeout {
            collection: "email_classification".into(),
            timeout_ms: 500,
        };
        let down = SearchError::VectorBackendUnavailable {
            collection: "email_classification".into(),
            reason: "connection refused".into(),
        };
        assert!(timeout.is_backend_unavailable());
        assert!(down.is_backend_unavailable());
        assert!(!SearchError::Cancelled { stage: "rerank" }.is_backend_unavailable());
    }

    #[test]
    fn test_index_build_error_converts() {
        let err: SearchError = IndexBuildError::DuplicateId { id: "a".into() }.into();
        assert!(matches!(err, SearchError::IndexBuild(_)));
    }
}
