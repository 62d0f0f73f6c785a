/// Pairwise relevance scoring (cross-encoder reranking)
///
/// A `PairwiseScorer` scores (query, candidate text) pairs jointly. It is an
/// optional collaborator: the reranking stage in `stage` recovers every failure
/// locally and passes the pre-rerank order through.
///
/// Providers: a local fastembed cross-encoder and a Jina/Cohere-style HTTP endpoint.

pub mod http;
pub mod local;
pub mod stage;

pub use stage::cross_score;

use async_trait::async_trait;

use crate::errors::RerankerUnavailable;

/// Scores (query, text) pairs. Output has the same length and order as the input.
#[async_trait]
pub trait PairwiseScorer: Send + Sync {
    async fn score_pairs(&self, pairs: &[(String, String)]) -> Result<Vec<f32>, RerankerUnavailable>;

    /// Load model weights ahead of the first query. Remote scorers have nothing to load.
    async fn warm_up(&self) -> Result<(), RerankerUnavailable> {
        Ok(())
    }

    fn model_name(&self) -> &str;
}
