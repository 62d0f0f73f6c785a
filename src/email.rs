/// Email-assistant adapters over `SearchEngine`
///
/// Builds the query text for an incoming email and retrieves structured context
/// from the three named collections: labelled classification examples, importance
/// examples with their scores, and reply templates optionally narrowed by email type.
/// Prompt construction belongs to the caller.

use std::sync::Arc;

use serde::Serialize;

use crate::config::{CLASSIFICATION_COLLECTION, IMPORTANCE_COLLECTION, REPLY_TEMPLATE_COLLECTION};
use crate::errors::SearchError;
use crate::pipeline::{PipelineConfig, SearchEngine, SearchOptions};
use crate::search::{MetadataFilter, SearchHit};

/// Characters of the body that go into the query text.
pub const BODY_PREFIX_CHARS: usize = 500;

/// Score assumed for an importance example without a usable `importance_score`.
pub const DEFAULT_IMPORTANCE_SCORE: f64 = 5.0;

const DEFAULT_EXAMPLES: usize = 3;

/// `subject + " " + first 500 characters of body`. Truncation counts characters, not bytes.
pub fn query_text(subject: &str, body: &str) -> String {
    let prefix: String = body.chars().take(BODY_PREFIX_CHARS).collect();
    format!("{} {}", subject, prefix)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportanceExample {
    pub hit: SearchHit,
    pub score: f64,
    /// `importance_level` metadata, "medium" when absent
    pub level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportanceContext {
    pub examples: Vec<ImportanceExample>,
    /// Mean score of the examples; `None` when nothing similar was found
    pub average_score: Option<f64>,
}

impl ImportanceContext {
    fn from_hits(hits: Vec<SearchHit>) -> Self {
        let examples: Vec<ImportanceExample> = hits
            .into_iter()
            .map(|hit| {
                let score = hit
                    .metadata
                    .get("importance_score")
                    .and_then(|s| s.trim().parse::<f64>().ok())
                    .filter(|s| s.is_finite())
                    .unwrap_or(DEFAULT_IMPORTANCE_SCORE);
                let level = hit
                    .metadata
                    .get("importance_level")
                    .cloned()
                    .unwrap_or_else(|| "medium".to_string());
                ImportanceExample { hit, score, level }
            })
            .collect();

        let average_score = if examples.is_empty() {
            None
        } else {
            Some(examples.iter().map(|e| e.score).sum::<f64>() / examples.len() as f64)
        };
        ImportanceContext { examples, average_score }
    }
}

/// Context retrieval for the classification and reply workflows.
pub struct EmailRetriever {
    engine: Arc<SearchEngine>,
    pipeline: PipelineConfig,
    examples: usize,
}

impl EmailRetriever {
    /// `pipeline` supplies every stage setting except the result count.
    pub fn new(engine: Arc<SearchEngine>, pipeline: PipelineConfig) -> Self {
        EmailRetriever {
            engine,
            pipeline,
            examples: DEFAULT_EXAMPLES,
        }
    }

    pub fn with_examples(mut self, examples: usize) -> Self {
        self.examples = examples;
        self
    }

    fn config(&self, top_k: usize) -> PipelineConfig {
        PipelineConfig {
            final_top_k: top_k,
            ..self.pipeline.clone()
        }
    }

    /// Similar, already-labelled emails (metadata carries `email_type`, `importance_score`).
    pub async fn classification_examples(&self, subject: &str, body: &str) -> Result<Vec<SearchHit>, SearchError> {
        self.engine
            .search(&query_text(subject, body), CLASSIFICATION_COLLECTION, &self.config(self.examples))
            .await
    }

    pub async fn importance_examples(&self, subject: &str, body: &str) -> Result<ImportanceContext, SearchError> {
        let hits = self
            .engine
            .search(&query_text(subject, body), IMPORTANCE_COLLECTION, &self.config(self.examples))
            .await?;
        Ok(ImportanceContext::from_hits(hits))
    }

    /// Reply templates, restricted to `email_type` when one is given.
    pub async fn reply_templates(
        &self,
        subject: &str,
        body: &str,
        email_type: Option<&str>,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let mut filter = MetadataFilter::new();
        if let Some(email_type) = email_type.filter(|t| !t.is_empty()) {
            filter.insert("email_type".to_string(), email_type.to_string());
        }
        self.engine
            .search_with_options(
                &query_text(subject, body),
                REPLY_TEMPLATE_COLLECTION,
                &self.config(self.examples),
                &SearchOptions::with_filter(filter),
            )
            .await
    }
}
