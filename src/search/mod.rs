pub mod filter;
pub mod hybrid;
pub mod mmr;

// Re-export key types for convenience
pub use filter::filter_by_distance;
pub use hybrid::{combine, distance_to_similarity};
pub use mmr::select_diverse;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Opaque per-document metadata (keys unique, values flattened to strings).
pub type Metadata = BTreeMap<String, String>;

/// Exact-match metadata constraints applied to both retrieval legs.
pub type MetadataFilter = BTreeMap<String, String>;

/// An indexed document as the retrieval core sees it. Never mutated after indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusItem {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl CorpusItem {
    pub fn matches(&self, filter: &MetadataFilter) -> bool {
        filter.iter().all(|(k, v)| self.metadata.get(k) == Some(v))
    }
}

/// Scores accumulated by a candidate as it moves through the stages.
///
/// Each field stays `None` until its stage runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    /// Raw vector distance (lower = more similar)
    pub distance: Option<f64>,
    /// BM25 score (higher = more similar, unbounded non-negative)
    pub lexical: Option<f64>,
    /// Normalized weighted combination of vector similarity and lexical score
    pub hybrid: Option<f64>,
    /// Pairwise cross-scorer relevance (unbounded)
    pub cross: Option<f64>,
    /// MMR value at the moment the candidate was selected
    pub selection: Option<f64>,
}

/// A transient, scored reference to a corpus item within one search call.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: String,
    pub text: Option<String>,
    pub metadata: Metadata,
    pub embedding: Option<Vec<f32>>,
    pub scores: ComponentScores,
}

impl Candidate {
    pub fn new(id: impl Into<String>) -> Self {
        Candidate {
            id: id.into(),
            text: None,
            metadata: Metadata::new(),
            embedding: None,
            scores: ComponentScores::default(),
        }
    }

    pub fn from_vector_hit(hit: crate::vector::VectorHit) -> Self {
        Candidate {
            id: hit.id,
            text: hit.document,
            metadata: hit.metadata,
            embedding: hit.embedding,
            scores: ComponentScores {
                distance: Some(hit.distance),
                ..ComponentScores::default()
            },
        }
    }

    /// A lexical-only hit: text and metadata come from the corpus snapshot.
    pub fn from_corpus_item(item: &CorpusItem, lexical_score: f64) -> Self {
        Candidate {
            id: item.id.clone(),
            text: Some(item.text.clone()),
            metadata: item.metadata.clone(),
            embedding: None,
            scores: ComponentScores {
                lexical: Some(lexical_score),
                ..ComponentScores::default()
            },
        }
    }

    pub fn into_hit(self) -> SearchHit {
        SearchHit {
            doc_id: self.id,
            metadata: self.metadata,
            scores: self.scores,
        }
    }
}

/// One ranked result returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub doc_id: String,
    pub metadata: Metadata,
    pub scores: ComponentScores,
}

/// Cosine similarity between two vectors, as f64. Zero-length or zero-norm → 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let len = a.len().min(b.len());
    if len == 0 {
        return 0.0;
    }

    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for i in 0..len {
        let ai = f64::from(a[i]);
        let bi = f64::from(b[i]);
        dot += ai * bi;
        norm_a += ai * ai;
        norm_b += bi * bi;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f64::EPSILON {
        return 0.0;
    }
    dot / denom
}
