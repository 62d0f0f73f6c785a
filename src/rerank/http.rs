/// HTTP pairwise scorer for Jina/Cohere-compatible `/rerank` endpoints
///
/// Request:  `{"model", "query", "documents": [...], "top_n"}`
/// Response: `{"results": [{"index", "relevance_score"}]}`
///
/// Pairs are grouped by query so a typical search (one query, N texts) is a
/// single request. Scores are mapped back to input order by `index`.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::PairwiseScorer;
use crate::errors::RerankerUnavailable;

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: Vec<&'a str>,
    top_n: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f64,
}

pub struct HttpScorer {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpScorer {
    /// # Errors
    /// Returns `RerankerUnavailable::NotConfigured` if the API key is empty.
    pub fn new(base_url: String, api_key: String, model: String) -> Result<Self, RerankerUnavailable> {
        if api_key.trim().is_empty() {
            return Err(RerankerUnavailable::NotConfigured(
                "HTTP reranker requires an API key (rerankers[].api_key in mailrank.toml)".to_string(),
            ));
        }
        Ok(HttpScorer {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }

    async fn score_group(&self, query: &str, documents: Vec<&str>) -> Result<Vec<f32>, RerankerUnavailable> {
        let count = documents.len();
        let url = format!("{}/rerank", self.base_url);
        let request = RerankRequest {
            model: &self.model,
            query,
            documents,
            top_n: count,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| RerankerUnavailable::Failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RerankerUnavailable::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let parsed: RerankResponse = response
            .json()
            .await
            .map_err(|e| RerankerUnavailable::Failed(format!("Failed to parse rerank response: {}", e)))?;

        scores_in_input_order(parsed.results, count)
    }
}

/// Place each result at its `index`. Every input slot must be filled exactly once.
fn scores_in_input_order(results: Vec<RerankResult>, count: usize) -> Result<Vec<f32>, RerankerUnavailable> {
    if results.len() != count {
        return Err(RerankerUnavailable::LengthMismatch {
            expected: count,
            got: results.len(),
        });
    }
    let mut scores: Vec<Option<f32>> = vec![None; count];
    for result in results {
        match scores.get_mut(result.index) {
            Some(slot) if slot.is_none() => *slot = Some(result.relevance_score as f32),
            _ => {
                return Err(RerankerUnavailable::Failed(format!(
                    "Rerank result index {} is out of range or repeated",
                    result.index
                )))
            }
        }
    }
    Ok(scores.into_iter().flatten().collect())
}

#[async_trait]
impl PairwiseScorer for HttpScorer {
    async fn score_pairs(&self, pairs: &[(String, String)]) -> Result<Vec<f32>, RerankerUnavailable> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }

        // query -> positions in `pairs`, in first-seen order
        let mut order: Vec<&str> = Vec::new();
        let mut groups: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, (query, _)) in pairs.iter().enumerate() {
            groups
                .entry(query.as_str())
                .or_insert_with(|| {
                    order.push(query.as_str());
                    Vec::new()
                })
                .push(i);
        }

        let mut scores = vec![0.0_f32; pairs.len()];
        for query in order {
            let positions = &groups[query];
            let documents: Vec<&str> = positions.iter().map(|&i| pairs[i].1.as_str()).collect();
            let group_scores = self.score_group(query, documents).await?;
            for (&i, score) in positions.iter().zip(group_scores) {
                scores[i] = score;
            }
        }
        Ok(scores)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_api_key_rejected() {
        let result = HttpScorer::new("https://api.jina.ai/v1".into(), "  ".into(), "jina-reranker-v2".into());
        assert!(matches!(result, Err(RerankerUnavailable::NotConfigured(_))));
    }

    #[test]
    fn test_results_are_reordered_by_index() {
        let results = vec![
            RerankResult { index: 2, relevance_score: 0.9 },
            RerankResult { index: 0, relevance_score: 0.5 },
            RerankResult { index: 1, relevance_score: 0.1 },
        ];
        let scores = scores_in_input_order(results, 3).unwrap();
        assert_eq!(scores, vec![0.5, 0.1, 0.9]);
    }

    #[test]
    fn test_short_response_is_length_mismatch() {
        let results = vec![RerankResult { index: 0, relevance_score: 0.5 }];
        let err = scores_in_input_order(results, 2).unwrap_err();
        assert!(matches!(err, RerankerUnavailable::LengthMismatch { expected: 2, got: 1 }));
    }

    #[test]
    fn test_repeated_index_rejected() {
        let results = vec![
            RerankResult { index: 0, relevance_score: 0.5 },
            RerankResult { index: 0, relevance_score: 0.4 },
        ];
        assert!(matches!(scores_in_input_order(results, 2), Err(RerankerUnavailable::Failed(_))));
    }

    #[test]
    fn test_response_parses() {
        let body = r#"{"results":[{"index":1,"relevance_score":0.8,"document":{"text":"x"}},{"index":0,"relevance_score":0.2}]}"#;
        let parsed: RerankResponse = serde_json::from_str(body).unwrap();
        assert_eq!(scores_in_input_order(parsed.results, 2).unwrap(), vec![0.2, 0.8]);
    }
}
