/// Local cross-encoder using fastembed's `TextRerank`
///
/// Weights load in `warm_up` (downloaded into the cache dir on first use).
/// Scoring before warm-up reports the scorer as unavailable, which the
/// reranking stage treats like any other scorer failure.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use tokio::task;

use super::PairwiseScorer;
use crate::errors::RerankerUnavailable;

fn resolve_model(name: &str) -> Option<RerankerModel> {
    match name {
        "bge-reranker-v2-m3" => Some(RerankerModel::BGERerankerV2M3),
        "bge-reranker-base" => Some(RerankerModel::BGERerankerBase),
        "jina-reranker-v1-turbo-en" => Some(RerankerModel::JINARerankerV1TurboEn),
        _ => None,
    }
}

pub struct LocalScorer {
    cache_dir: PathBuf,
    name: String,
    model: RerankerModel,
    loaded: OnceLock<Arc<Mutex<TextRerank>>>,
}

impl LocalScorer {
    pub fn new(model_name: &str, cache_dir: &str) -> Result<Self, RerankerUnavailable> {
        let model = resolve_model(model_name).ok_or_else(|| {
            RerankerUnavailable::NotConfigured(format!("Unsupported local reranker model: {}", model_name))
        })?;
        Ok(LocalScorer {
            cache_dir: PathBuf::from(cache_dir),
            name: model_name.to_string(),
            model,
            loaded: OnceLock::new(),
        })
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.get().is_some()
    }
}

#[async_trait]
impl PairwiseScorer for LocalScorer {
    async fn score_pairs(&self, pairs: &[(String, String)]) -> Result<Vec<f32>, RerankerUnavailable> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.loaded.get().cloned().ok_or_else(|| {
            RerankerUnavailable::NotConfigured(format!("Reranker '{}' is not loaded", self.name))
        })?;
        let pairs = pairs.to_vec();

        task::spawn_blocking(move || {
            #[allow(unused_mut)]
            let mut model = model
                .lock()
                .map_err(|_| RerankerUnavailable::Failed("reranker model lock poisoned".to_string()))?;

            let mut scores = vec![0.0_f32; pairs.len()];
            // One call per run of identical queries; results come back sorted by score with their index.
            let mut start = 0;
            while start < pairs.len() {
                let query = &pairs[start].0;
                let end = pairs[start..]
                    .iter()
                    .position(|(q, _)| q != query)
                    .map_or(pairs.len(), |offset| start + offset);
                let documents: Vec<String> = pairs[start..end].iter().map(|(_, text)| text.clone()).collect();

                let results = model
                    .rerank(query.clone(), documents, false, None)
                    .map_err(|e| RerankerUnavailable::Failed(format!("fastembed rerank failed: {}", e)))?;
                if results.len() != end - start {
                    return Err(RerankerUnavailable::LengthMismatch {
                        expected: end - start,
                        got: results.len(),
                    });
                }
                for result in results {
                    if let Some(slot) = scores.get_mut(start + result.index) {
                        *slot = result.score;
                    }
                }
                start = end;
            }
            Ok(scores)
        })
        .await
        .map_err(|e| RerankerUnavailable::Failed(e.to_string()))?
    }

    async fn warm_up(&self) -> Result<(), RerankerUnavailable> {
        if self.is_loaded() {
            return Ok(());
        }

        let cache_dir = self.cache_dir.clone();
        let model = self.model.clone();
        let name = self.name.clone();

        let reranker = task::spawn_blocking(move || {
            std::fs::create_dir_all(&cache_dir)
                .map_err(|e| RerankerUnavailable::Failed(format!("Failed to create cache dir: {}", e)))?;
            tracing::info!(model = %name, cache_dir = %cache_dir.display(), "Loading reranker model");
            TextRerank::try_new(
                RerankInitOptions::new(model)
                    .with_cache_dir(cache_dir)
                    .with_show_download_progress(false),
            )
            .map_err(|e| RerankerUnavailable::Failed(format!("fastembed reranker init failed: {}", e)))
        })
        .await
        .map_err(|e| RerankerUnavailable::Failed(e.to_string()))??;

        let _ = self.loaded.set(Arc::new(Mutex::new(reranker)));
        Ok(())
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}
