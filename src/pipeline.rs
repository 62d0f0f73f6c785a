/// Retrieval pipeline orchestrator
///
/// `SearchEngine` owns the external collaborators (embedder, vector index, named
/// pairwise scorers) and the lexical snapshot cache. One `search` call runs the
/// stages strictly in order:
///
///   retrieve (vector, plus lexical when hybrid is on)
///   -> combine (hybrid fusion, or vector-only ranking)
///   -> relevance filter
///   -> rerank
///   -> diversity selection (MMR)
///   -> truncate to `final_top_k`
///
/// Each stage after retrieval is a configuration-driven branch. The vector leg is
/// mandatory and its failures abort the call; the lexical leg and the reranker
/// degrade to the smaller pipeline with a WARN log. The engine is shared across
/// concurrent searches behind an `Arc`; the only shared mutable state is the
/// lexical cache, which swaps whole snapshots.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

pub use crate::config::PipelineConfig;
use crate::embedding::Embedder;
use crate::errors::{IndexBuildError, RerankerUnavailable, SearchError, WarmupError};
use crate::lexical::{LexicalCache, LexicalIndex};
use crate::rerank::{cross_score, PairwiseScorer};
use crate::search::{combine, filter_by_distance, select_diverse, Candidate, CorpusItem, MetadataFilter, SearchHit};
use crate::vector::{VectorHit, VectorIndex, VectorIndexError};

/// Deadline for corpus fetches outside a search call (CLI stats, admin rebuilds).
const CORPUS_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Cooperative cancellation checked at every stage boundary.
///
/// Clones share the flag, so the caller keeps one clone and hands another to the search.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-call options that are not part of the stage configuration.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Exact-match metadata constraints, honored by both retrieval legs
    pub metadata_filter: MetadataFilter,
    pub cancel: CancelFlag,
}

impl SearchOptions {
    pub fn with_filter(metadata_filter: MetadataFilter) -> Self {
        SearchOptions {
            metadata_filter,
            cancel: CancelFlag::default(),
        }
    }

    fn checkpoint(&self, stage: &'static str) -> Result<(), SearchError> {
        if self.cancel.is_cancelled() {
            tracing::debug!(stage, "Search cancelled");
            return Err(SearchError::Cancelled { stage });
        }
        Ok(())
    }
}

/// Summary of one cached lexical snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LexicalStats {
    pub collection: String,
    pub documents: usize,
    pub terms: usize,
    pub average_doc_length: f64,
}

impl LexicalStats {
    fn of(index: &LexicalIndex) -> Self {
        LexicalStats {
            collection: index.collection().to_string(),
            documents: index.len(),
            terms: index.term_count(),
            average_doc_length: index.average_doc_length(),
        }
    }
}

/// Readiness report: which required collections the vector index holds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub ready: bool,
    pub collections: Vec<String>,
    pub missing: Vec<String>,
    pub lexical_cached: Vec<String>,
    pub embedding_model: String,
    pub scorers: Vec<String>,
}

pub struct SearchEngine {
    embedder: Arc<dyn Embedder>,
    vector: Arc<dyn VectorIndex>,
    scorers: HashMap<String, Arc<dyn PairwiseScorer>>,
    lexical: LexicalCache,
    required_collections: Vec<String>,
}

impl SearchEngine {
    pub fn new(embedder: Arc<dyn Embedder>, vector: Arc<dyn VectorIndex>) -> Self {
        SearchEngine {
            embedder,
            vector,
            scorers: HashMap::new(),
            lexical: LexicalCache::new(),
            required_collections: Vec::new(),
        }
    }

    /// Register a pairwise scorer under the name `RerankConfig.scorer` refers to.
    pub fn with_scorer(mut self, name: impl Into<String>, scorer: Arc<dyn PairwiseScorer>) -> Self {
        self.scorers.insert(name.into(), scorer);
        self
    }

    pub fn with_required_collections(mut self, collections: Vec<String>) -> Self {
        self.required_collections = collections;
        self
    }

    fn scorer_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.scorers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Load the embedder and every registered scorer ahead of the first query.
    pub async fn warm_up(&self) -> Result<(), WarmupError> {
        let started = Instant::now();
        self.embedder.warm_up().await.map_err(|e| WarmupError::Embedder {
            model: self.embedder.model_name().to_string(),
            reason: e.to_string(),
        })?;

        for name in self.scorer_names() {
            let scorer = &self.scorers[&name];
            scorer.warm_up().await.map_err(|e| WarmupError::Scorer {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        }

        tracing::info!(
            embedding_model = self.embedder.model_name(),
            scorers = self.scorers.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Warm-up complete"
        );
        Ok(())
    }

    /// Load only what `config` will use: the embedder, plus the configured scorer
    /// when reranking is on.
    ///
    /// A scorer that fails to load is logged and left in place; the rerank stage
    /// then passes candidates through as it does for any scorer failure.
    pub async fn warm_up_for(&self, config: &PipelineConfig) -> Result<(), WarmupError> {
        let started = Instant::now();
        self.embedder.warm_up().await.map_err(|e| WarmupError::Embedder {
            model: self.embedder.model_name().to_string(),
            reason: e.to_string(),
        })?;

        if config.rerank.enabled {
            if let Some(scorer) = self.scorers.get(&config.rerank.scorer) {
                if let Err(e) = scorer.warm_up().await {
                    tracing::warn!(
                        scorer = %config.rerank.scorer,
                        error = %e,
                        "Scorer failed to load; rerank stage will be skipped"
                    );
                }
            }
        }

        tracing::info!(
            embedding_model = self.embedder.model_name(),
            rerank = config.rerank.enabled,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Warm-up complete"
        );
        Ok(())
    }

    /// Build a snapshot from `items` and publish it for `collection`.
    ///
    /// In-flight searches keep the snapshot they started with.
    pub fn rebuild_lexical(
        &self,
        collection: &str,
        items: Vec<CorpusItem>,
    ) -> Result<LexicalStats, IndexBuildError> {
        let index = LexicalIndex::build(collection, items)?;
        let snapshot = self.lexical.publish(index);
        let stats = LexicalStats::of(&snapshot);
        tracing::info!(
            collection,
            documents = stats.documents,
            terms = stats.terms,
            "Published lexical snapshot"
        );
        Ok(stats)
    }

    /// Drop the cached snapshot; the next hybrid search rebuilds it from the vector index.
    pub fn invalidate(&self, collection: &str) -> bool {
        let removed = self.lexical.invalidate(collection);
        tracing::debug!(collection, removed, "Invalidated lexical snapshot");
        removed
    }

    /// Stats for the collection's snapshot, building it from the vector index if needed.
    pub async fn lexical_stats(&self, collection: &str) -> Result<LexicalStats, SearchError> {
        let snapshot = match self.lexical.get(collection) {
            Some(snapshot) => snapshot,
            None => self.load_lexical(collection, CORPUS_FETCH_TIMEOUT).await?,
        };
        Ok(LexicalStats::of(&snapshot))
    }

    pub async fn status(&self) -> Result<EngineStatus, SearchError> {
        let mut collections = self
            .vector
            .list_collections()
            .await
            .map_err(|e| SearchError::VectorBackendUnavailable {
                collection: "*".to_string(),
                reason: e.to_string(),
            })?;
        collections.sort();

        let missing: Vec<String> = self
            .required_collections
            .iter()
            .filter(|name| !collections.contains(name))
            .cloned()
            .collect();

        Ok(EngineStatus {
            ready: missing.is_empty(),
            collections,
            missing,
            lexical_cached: self.lexical.collections(),
            embedding_model: self.embedder.model_name().to_string(),
            scorers: self.scorer_names(),
        })
    }

    /// True when the vector index is reachable and holds every required collection.
    pub async fn is_ready(&self) -> bool {
        match self.status().await {
            Ok(status) => {
                if !status.ready {
                    tracing::warn!(missing = ?status.missing, "Required collections missing");
                }
                status.ready
            }
            Err(e) => {
                tracing::warn!(error = %e, "Vector index not reachable");
                false
            }
        }
    }

    pub async fn search(
        &self,
        query: &str,
        collection: &str,
        config: &PipelineConfig,
    ) -> Result<Vec<SearchHit>, SearchError> {
        self.search_with_options(query, collection, config, &SearchOptions::default())
            .await
    }

    #[tracing::instrument(skip(self, query, config, options))]
    pub async fn search_with_options(
        &self,
        query: &str,
        collection: &str,
        config: &PipelineConfig,
        options: &SearchOptions,
    ) -> Result<Vec<SearchHit>, SearchError> {
        config.validate()?;
        let started = Instant::now();
        let filter = &options.metadata_filter;
        let target = config.candidate_target();

        options.checkpoint("retrieve")?;
        let fetch_n = if config.hybrid.enabled { target * 2 } else { target };
        let (query_embedding, hits) = self
            .retrieve_vector(query, collection, fetch_n, filter, config.vector_timeout())
            .await?;
        let vector_candidates: Vec<Candidate> = hits.into_iter().map(Candidate::from_vector_hit).collect();
        tracing::debug!(stage = "retrieve", candidates = vector_candidates.len(), "Vector leg complete");

        let lexical_candidates = if config.hybrid.enabled {
            options.checkpoint("lexical")?;
            let vector_ids: Vec<&str> = vector_candidates.iter().map(|c| c.id.as_str()).collect();
            self.lexical_candidates(query, collection, filter, target * 2, &vector_ids, config.vector_timeout())
                .await
        } else {
            None
        };

        options.checkpoint("combine")?;
        let mut candidates = combine(vector_candidates, lexical_candidates, &config.hybrid);
        tracing::debug!(stage = "combine", candidates = candidates.len(), "Candidates ranked");

        if config.relevance_filter.enabled {
            options.checkpoint("filter")?;
            if let Some(threshold) = config.relevance_filter.distance_threshold {
                let before = candidates.len();
                candidates = filter_by_distance(candidates, threshold);
                tracing::debug!(stage = "filter", before, after = candidates.len(), threshold, "Relevance filter applied");
            }
            if candidates.is_empty() {
                tracing::info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "No candidate passed the relevance filter"
                );
                return Ok(Vec::new());
            }
        }

        if config.rerank.enabled {
            options.checkpoint("rerank")?;
            match self.scorers.get(&config.rerank.scorer) {
                Some(scorer) => {
                    candidates = cross_score(
                        scorer.as_ref(),
                        query,
                        candidates,
                        config.rerank.pool_size,
                        config.downstream_count(),
                        config.rerank_timeout(),
                    )
                    .await;
                }
                None => {
                    let err = RerankerUnavailable::NotConfigured(config.rerank.scorer.clone());
                    tracing::warn!(error = %err, "Skipping rerank stage");
                }
            }
        }

        if config.mmr.enabled {
            options.checkpoint("mmr")?;
            candidates.truncate(config.mmr.candidate_pool.max(config.final_top_k));
            candidates = select_diverse(candidates, &query_embedding, config.final_top_k, config.mmr.lambda);
        }

        candidates.truncate(config.final_top_k);
        tracing::info!(
            results = candidates.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Search complete"
        );
        Ok(candidates.into_iter().map(Candidate::into_hit).collect())
    }

    /// Embed the query and run the knn lookup under one deadline.
    ///
    /// A collection the index does not know is an empty corpus, not a failure.
    async fn retrieve_vector(
        &self,
        query: &str,
        collection: &str,
        n: usize,
        filter: &MetadataFilter,
        timeout: Duration,
    ) -> Result<(Vec<f32>, Vec<VectorHit>), SearchError> {
        let lookup = async {
            let embedding = self.embedder.embed(query).await?;
            let hits = self.vector.knn_query(collection, &embedding, n, filter).await;
            Ok::<_, SearchError>((embedding, hits))
        };

        let (embedding, hits) = tokio::time::timeout(timeout, lookup)
            .await
            .map_err(|_| SearchError::VectorBackendTimeout {
                collection: collection.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })??;

        match hits {
            Ok(hits) => Ok((embedding, hits)),
            Err(VectorIndexError::CollectionNotFound(_)) => {
                tracing::warn!(collection, "Collection not found; treating as empty");
                Ok((embedding, Vec::new()))
            }
            Err(e) => Err(SearchError::VectorBackendUnavailable {
                collection: collection.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Lexical leg. `None` means lexical scoring is unavailable for this call.
    ///
    /// Returns the `limit` best lexical hits plus the lexical score of every
    /// vector candidate that shares a term with the query, so no vector
    /// candidate loses its lexical score to the cutoff.
    async fn lexical_candidates(
        &self,
        query: &str,
        collection: &str,
        filter: &MetadataFilter,
        limit: usize,
        vector_ids: &[&str],
        timeout: Duration,
    ) -> Option<Vec<Candidate>> {
        let snapshot = match self.lexical.get(collection) {
            Some(snapshot) => snapshot,
            None => match self.load_lexical(collection, timeout).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    tracing::warn!(error = %e, "Lexical index unavailable; ranking by vector similarity only");
                    return None;
                }
            },
        };

        let mut candidates: Vec<Candidate> = snapshot
            .top(query, limit, filter)
            .into_iter()
            .map(|(item, score)| Candidate::from_corpus_item(item, score))
            .collect();
        let seen: HashSet<&str> = candidates.iter().map(|c| c.id.as_str()).collect();
        let missing: Vec<&str> = vector_ids.iter().copied().filter(|id| !seen.contains(id)).collect();
        let mut extra: Vec<Candidate> = snapshot
            .score_ids(query, missing)
            .into_iter()
            .filter_map(|(id, score)| snapshot.item(&id).map(|item| Candidate::from_corpus_item(item, score)))
            .collect();
        extra.sort_by(|a, b| a.id.cmp(&b.id));
        tracing::debug!(
            stage = "lexical",
            candidates = candidates.len(),
            below_cutoff = extra.len(),
            "Lexical leg complete"
        );
        candidates.extend(extra);
        Some(candidates)
    }

    /// Fetch the corpus from the vector index and publish a snapshot for it.
    async fn load_lexical(&self, collection: &str, timeout: Duration) -> Result<Arc<LexicalIndex>, SearchError> {
        let unavailable = |reason: String| SearchError::VectorBackendUnavailable {
            collection: collection.to_string(),
            reason,
        };

        let items = tokio::time::timeout(timeout, self.vector.fetch_corpus(collection))
            .await
            .map_err(|_| SearchError::VectorBackendTimeout {
                collection: collection.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })?
            .map_err(|e| unavailable(e.to_string()))?;

        let index = LexicalIndex::build(collection, items)?;
        tracing::info!(collection, documents = index.len(), "Built lexical snapshot from vector index corpus");
        Ok(self.lexical.publish(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let handed_out = flag.clone();
        assert!(!handed_out.is_cancelled());
        flag.cancel();
        assert!(handed_out.is_cancelled());
    }

    #[test]
    fn test_checkpoint_reports_stage() {
        let options = SearchOptions::default();
        assert!(options.checkpoint("rerank").is_ok());
        options.cancel.cancel();
        let err = options.checkpoint("rerank").unwrap_err();
        assert!(matches!(err, SearchError::Cancelled { stage: "rerank" }));
    }
}
