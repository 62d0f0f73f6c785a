/// BM25 lexical index over one collection snapshot.
///
/// Maps terms to postings lists (internal document position + term frequency) and
/// tracks document lengths for length normalization. The snapshot also keeps the
/// corpus items themselves so lexical-only hits can be materialized with their
/// text and metadata. Immutable once built.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use super::tokenizer::tokenize;
use crate::errors::IndexBuildError;
use crate::search::{CorpusItem, MetadataFilter};

/// BM25 term-frequency saturation
const BM25_K1: f64 = 1.2;
/// BM25 length normalization strength
const BM25_B: f64 = 0.75;

#[derive(Debug, Clone)]
struct Posting {
    doc: u32,
    term_frequency: u32,
}

/// Inverted index for one named collection.
#[derive(Debug)]
pub struct LexicalIndex {
    collection: String,
    items: Vec<CorpusItem>,
    positions: HashMap<String, u32>,
    postings: HashMap<String, Vec<Posting>>,
    doc_lengths: Vec<u32>,
    total_doc_length: u64,
}

impl LexicalIndex {
    /// Tokenize every document and build term statistics.
    ///
    /// An empty document list produces an empty index that scores nothing.
    pub fn build(collection: &str, documents: Vec<CorpusItem>) -> Result<Self, IndexBuildError> {
        let mut positions: HashMap<String, u32> = HashMap::with_capacity(documents.len());
        let mut postings: HashMap<String, Vec<Posting>> = HashMap::new();
        let mut doc_lengths: Vec<u32> = Vec::with_capacity(documents.len());
        let mut total_doc_length: u64 = 0;

        for (position, item) in documents.iter().enumerate() {
            if item.id.is_empty() {
                return Err(IndexBuildError::EmptyId { position });
            }
            let doc = position as u32;
            if positions.insert(item.id.clone(), doc).is_some() {
                return Err(IndexBuildError::DuplicateId { id: item.id.clone() });
            }

            let tokens = tokenize(&item.text);
            let doc_len = tokens.len() as u32;
            doc_lengths.push(doc_len);
            total_doc_length += u64::from(doc_len);

            let mut tf_map: HashMap<&str, u32> = HashMap::new();
            for token in tokens.iter() {
                *tf_map.entry(token).or_insert(0) += 1;
            }
            for (term, tf) in tf_map {
                postings.entry(term.to_string()).or_default().push(Posting {
                    doc,
                    term_frequency: tf,
                });
            }
        }

        tracing::debug!(
            collection,
            documents = documents.len(),
            terms = postings.len(),
            "Built lexical index"
        );

        Ok(LexicalIndex {
            collection: collection.to_string(),
            items: documents,
            positions,
            postings,
            doc_lengths,
            total_doc_length,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of distinct terms in the index.
    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    pub fn average_doc_length(&self) -> f64 {
        if self.items.is_empty() {
            return 0.0;
        }
        self.total_doc_length as f64 / self.items.len() as f64
    }

    pub fn item(&self, id: &str) -> Option<&CorpusItem> {
        self.positions.get(id).map(|&doc| &self.items[doc as usize])
    }

    /// Per-position BM25 scores for documents sharing at least one query term.
    fn raw_scores(&self, query: &str) -> HashMap<u32, f64> {
        let query_tokens = tokenize(query);
        let mut scores: HashMap<u32, f64> = HashMap::new();
        if query_tokens.is_empty() || self.items.is_empty() {
            return scores;
        }

        let n = self.items.len() as f64;
        let avgdl = self.average_doc_length();

        // Repeated query terms count once.
        let unique: HashSet<&str> = query_tokens.iter().collect();
        for token in unique {
            let Some(postings) = self.postings.get(token) else {
                continue;
            };
            let df = postings.len() as f64;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();

            for posting in postings {
                let dl = f64::from(self.doc_lengths[posting.doc as usize]);
                let tf = f64::from(posting.term_frequency);
                let length_norm = if avgdl > 0.0 { dl / avgdl } else { 1.0 };
                let tf_norm = (tf * (BM25_K1 + 1.0)) / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * length_norm));
                *scores.entry(posting.doc).or_insert(0.0) += idf * tf_norm;
            }
        }
        scores
    }

    /// Score the query against every document sharing at least one term with it.
    ///
    /// Documents with no shared term are absent from the map (implicitly 0).
    pub fn score(&self, query: &str) -> HashMap<String, f64> {
        self.raw_scores(query)
            .into_iter()
            .map(|(doc, score)| (self.items[doc as usize].id.clone(), score))
            .collect()
    }

    /// Scores for the given ids only. Ids that are unknown or share no term are absent.
    pub fn score_ids<'a, I>(&self, query: &str, ids: I) -> HashMap<String, f64>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let raw = self.raw_scores(query);
        if raw.is_empty() {
            return HashMap::new();
        }
        ids.into_iter()
            .filter_map(|id| {
                let doc = self.positions.get(id)?;
                raw.get(doc).map(|&score| (id.to_string(), score))
            })
            .collect()
    }

    /// The `limit` best-scoring documents matching `filter`, best first, ties by id.
    pub fn top(&self, query: &str, limit: usize, filter: &MetadataFilter) -> Vec<(&CorpusItem, f64)> {
        let mut hits: Vec<(&CorpusItem, f64)> = self
            .raw_scores(query)
            .into_iter()
            .map(|(doc, score)| (&self.items[doc as usize], score))
            .filter(|(item, _)| item.matches(filter))
            .collect();
        hits.sort_by(|a, b| match b.1.total_cmp(&a.1) {
            Ordering::Equal => a.0.id.cmp(&b.0.id),
            other => other,
        });
        hits.truncate(limit);
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, text: &str) -> CorpusItem {
        CorpusItem {
            id: id.to_string(),
            text: text.to_string(),
            metadata: Default::default(),
        }
    }

    fn build_corpus() -> LexicalIndex {
        LexicalIndex::build(
            "email_classification",
            vec![
                item("e0", "interview schedule for the backend position"),
                item("e1", "weekly newsletter discount coupon"),
                item("e2", "interview interview interview reminder"),
                item("e3", "면접 일정 안내 interview"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_empty_corpus_is_valid_and_scores_nothing() {
        let idx = LexicalIndex::build("empty", Vec::new()).unwrap();
        assert!(idx.is_empty());
        assert!(idx.score("anything").is_empty());
        assert_eq!(idx.average_doc_length(), 0.0);
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let err = LexicalIndex::build("c", vec![item("a", "one two"), item("a", "three four")]).unwrap_err();
        assert_eq!(err, IndexBuildError::DuplicateId { id: "a".into() });
    }

    #[test]
    fn test_empty_id_is_rejected() {
        let err = LexicalIndex::build("c", vec![item("a", "one"), item("", "two")]).unwrap_err();
        assert_eq!(err, IndexBuildError::EmptyId { position: 1 });
    }

    #[test]
    fn test_only_sharing_documents_are_scored() {
        let idx = build_corpus();
        let scores = idx.score("interview");
        assert_eq!(scores.len(), 3);
        assert!(!scores.contains_key("e1"));
        assert!(scores.values().all(|&s| s > 0.0));
    }

    #[test]
    fn test_higher_term_frequency_ranks_first() {
        let idx = build_corpus();
        let top = idx.top("interview", 10, &MetadataFilter::new());
        assert_eq!(top[0].0.id, "e2");
    }

    #[test]
    fn test_korean_query_matches() {
        let idx = build_corpus();
        let scores = idx.score("면접 일정");
        assert_eq!(scores.len(), 1);
        assert!(scores.contains_key("e3"));
    }

    #[test]
    fn test_no_shared_terms_is_empty() {
        let idx = build_corpus();
        assert!(idx.score("quarterly invoice").is_empty());
        assert!(idx.score("").is_empty());
    }

    #[test]
    fn test_top_respects_limit_and_filter() {
        let mut tagged = item("t1", "interview feedback");
        tagged.metadata.insert("email_type".into(), "채용".into());
        let idx = LexicalIndex::build("c", vec![tagged, item("t2", "interview notes")]).unwrap();

        assert_eq!(idx.top("interview", 1, &MetadataFilter::new()).len(), 1);

        let mut filter = MetadataFilter::new();
        filter.insert("email_type".into(), "채용".into());
        let hits = idx.top("interview", 10, &filter);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, "t1");
    }

    #[test]
    fn test_score_ids_matches_full_scoring() {
        let idx = build_corpus();
        let full = idx.score("interview");
        let picked = idx.score_ids("interview", ["e3", "e1", "missing"]);

        assert_eq!(picked.len(), 1);
        assert_eq!(picked.get("e3"), full.get("e3"));
        assert!(idx.score_ids("", ["e0"]).is_empty());
    }

    #[test]
    fn test_item_lookup() {
        let idx = build_corpus();
        assert_eq!(idx.item("e1").map(|i| i.text.as_str()), Some("weekly newsletter discount coupon"));
        assert!(idx.item("missing").is_none());
        assert_eq!(idx.collection(), "email_classification");
    }
}
