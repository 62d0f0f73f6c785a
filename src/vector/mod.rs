/// Vector index abstraction
///
/// The vector index is an external collaborator: it stores embeddings and answers
/// k-nearest-neighbor queries by distance. The retrieval core only consumes the
/// query side of it, plus a corpus scan used to build lexical snapshots and a
/// collection listing used for readiness checks.

pub mod chroma;

use async_trait::async_trait;
use thiserror::Error;

use crate::search::{CorpusItem, Metadata, MetadataFilter};

/// Errors reported by a vector index backend.
#[derive(Debug, Error)]
pub enum VectorIndexError {
    /// Network failure or connection refused
    #[error("Vector index unreachable: {0}")]
    Unreachable(String),

    /// Backend returned an HTTP error
    #[error("Vector index API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The named collection does not exist
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    /// Response could not be decoded
    #[error("Failed to decode vector index response: {0}")]
    Decode(String),
}

/// One nearest-neighbor result.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: String,
    /// Raw distance reported by the index (lower = more similar)
    pub distance: f64,
    pub document: Option<String>,
    pub metadata: Metadata,
    /// Stored embedding, when the backend returns it (needed by MMR)
    pub embedding: Option<Vec<f32>>,
}

/// Query interface of the external vector index.
///
/// Implementations must be Send + Sync so one instance can serve concurrent searches.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Return up to `n` nearest neighbors of `query_embedding`, closest first.
    async fn knn_query(
        &self,
        collection: &str,
        query_embedding: &[f32],
        n: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<VectorHit>, VectorIndexError>;

    /// Return every document in the collection (used to build lexical snapshots).
    async fn fetch_corpus(&self, collection: &str) -> Result<Vec<CorpusItem>, VectorIndexError>;

    /// Names of all collections the backend holds.
    async fn list_collections(&self) -> Result<Vec<String>, VectorIndexError>;
}
