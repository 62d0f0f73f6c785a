/// Reranking stage: cross-score a bounded pool and reorder it.
///
/// Only the first `pool_size` candidates are ever sent to the scorer. Candidates
/// with missing or blank text are not sent; they get the minimum score and sort
/// last. Output is sorted by cross-score descending (ties keep the incoming
/// order) and truncated to `min(pool_size, downstream)`.
///
/// Any scorer failure, a timeout, or a wrong-length response skips the stage:
/// the incoming candidates are returned untouched and the cause is logged.

use std::time::Duration;

use super::PairwiseScorer;
use crate::errors::RerankerUnavailable;
use crate::search::Candidate;

/// Cross-score assigned to candidates that have no text to score.
pub const MIN_CROSS_SCORE: f64 = f64::MIN;

fn has_text(candidate: &Candidate) -> bool {
    candidate.text.as_deref().is_some_and(|t| !t.trim().is_empty())
}

pub async fn cross_score(
    scorer: &dyn PairwiseScorer,
    query: &str,
    candidates: Vec<Candidate>,
    pool_size: usize,
    downstream: usize,
    timeout: Duration,
) -> Vec<Candidate> {
    if candidates.is_empty() || pool_size == 0 {
        return candidates;
    }

    let pool_len = pool_size.min(candidates.len());
    let pairs: Vec<(String, String)> = candidates[..pool_len]
        .iter()
        .filter(|c| has_text(c))
        .map(|c| (query.to_string(), c.text.clone().unwrap_or_default()))
        .collect();

    let scores = if pairs.is_empty() {
        Vec::new()
    } else {
        let outcome = match tokio::time::timeout(timeout, scorer.score_pairs(&pairs)).await {
            Ok(result) => result,
            Err(_) => Err(RerankerUnavailable::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        };
        match outcome {
            Ok(scores) if scores.len() == pairs.len() => scores,
            Ok(scores) => {
                let err = RerankerUnavailable::LengthMismatch {
                    expected: pairs.len(),
                    got: scores.len(),
                };
                tracing::warn!(scorer = scorer.model_name(), error = %err, "Skipping rerank stage");
                return candidates;
            }
            Err(err) => {
                tracing::warn!(scorer = scorer.model_name(), error = %err, "Skipping rerank stage");
                return candidates;
            }
        }
    };

    let mut pool = candidates;
    pool.truncate(pool_len);

    let mut scores = scores.into_iter();
    for candidate in pool.iter_mut() {
        let cross = if has_text(candidate) {
            scores.next().map_or(MIN_CROSS_SCORE, f64::from)
        } else {
            MIN_CROSS_SCORE
        };
        candidate.scores.cross = Some(cross);
    }

    // Stable: equal cross-scores keep the pre-rerank order.
    pool.sort_by(|a, b| {
        let a = a.scores.cross.unwrap_or(MIN_CROSS_SCORE);
        let b = b.scores.cross.unwrap_or(MIN_CROSS_SCORE);
        b.total_cmp(&a)
    });
    pool.truncate(pool_size.min(downstream));

    tracing::debug!(scored = pairs.len(), kept = pool.len(), "Rerank stage complete");
    pool
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scores a pair by the number in its text ("doc 7" -> 7.0).
    struct CountingScorer {
        calls: AtomicUsize,
        pairs: AtomicUsize,
    }

    impl CountingScorer {
        fn new() -> Self {
            CountingScorer {
                calls: AtomicUsize::new(0),
                pairs: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PairwiseScorer for CountingScorer {
        async fn score_pairs(&self, pairs: &[(String, String)]) -> Result<Vec<f32>, RerankerUnavailable> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.pairs.fetch_add(pairs.len(), Ordering::SeqCst);
            Ok(pairs
                .iter()
                .map(|(_, text)| text.rsplit(' ').next().and_then(|n| n.parse().ok()).unwrap_or(0.0))
                .collect())
        }

        fn model_name(&self) -> &str {
            "counting"
        }
    }

    struct FailingScorer;

    #[async_trait]
    impl PairwiseScorer for FailingScorer {
        async fn score_pairs(&self, _pairs: &[(String, String)]) -> Result<Vec<f32>, RerankerUnavailable> {
            Err(RerankerUnavailable::Api {
                status: 503,
                message: "overloaded".into(),
            })
        }

        fn model_name(&self) -> &str {
            "failing"
        }
    }

    struct SlowScorer;

    #[async_trait]
    impl PairwiseScorer for SlowScorer {
        async fn score_pairs(&self, pairs: &[(String, String)]) -> Result<Vec<f32>, RerankerUnavailable> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![1.0; pairs.len()])
        }

        fn model_name(&self) -> &str {
            "slow"
        }
    }

    struct ShortScorer;

    #[async_trait]
    impl PairwiseScorer for ShortScorer {
        async fn score_pairs(&self, _pairs: &[(String, String)]) -> Result<Vec<f32>, RerankerUnavailable> {
            Ok(vec![1.0])
        }

        fn model_name(&self) -> &str {
            "short"
        }
    }

    fn candidates(n: usize) -> Vec<Candidate> {
        (0..n)
            .map(|i| {
                let mut c = Candidate::new(format!("d{i}"));
                c.text = Some(format!("doc {i}"));
                c
            })
            .collect()
    }

    fn ids(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.id.as_str()).collect()
    }

    const TIMEOUT: Duration = Duration::from_millis(200);

    #[tokio::test]
    async fn test_scores_only_the_bounded_pool() {
        let scorer = CountingScorer::new();
        let out = cross_score(&scorer, "q", candidates(50), 20, 20, TIMEOUT).await;
        assert_eq!(scorer.pairs.load(Ordering::SeqCst), 20);
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(out.len(), 20);
        // highest number within the pool wins
        assert_eq!(out[0].id, "d19");
    }

    #[tokio::test]
    async fn test_truncates_to_downstream_count() {
        let scorer = CountingScorer::new();
        let out = cross_score(&scorer, "q", candidates(10), 8, 3, TIMEOUT).await;
        assert_eq!(ids(&out), vec!["d7", "d6", "d5"]);
        assert!(out.iter().all(|c| c.scores.cross.is_some()));
    }

    #[tokio::test]
    async fn test_missing_text_sorts_last_and_is_not_sent() {
        let scorer = CountingScorer::new();
        let mut input = candidates(3);
        input[2].text = None;
        input[1].text = Some("   ".into());
        let out = cross_score(&scorer, "q", input, 10, 10, TIMEOUT).await;
        assert_eq!(scorer.pairs.load(Ordering::SeqCst), 1);
        assert_eq!(out[0].id, "d0");
        assert_eq!(out[1].scores.cross, Some(MIN_CROSS_SCORE));
        // ties at the minimum keep incoming order
        assert_eq!(ids(&out), vec!["d0", "d1", "d2"]);
    }

    #[tokio::test]
    async fn test_all_missing_text_skips_scorer() {
        let scorer = CountingScorer::new();
        let input: Vec<Candidate> = (0..3).map(|i| Candidate::new(format!("d{i}"))).collect();
        let out = cross_score(&scorer, "q", input, 10, 10, TIMEOUT).await;
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(ids(&out), vec!["d0", "d1", "d2"]);
    }

    #[tokio::test]
    async fn test_failure_passes_order_through() {
        let input = candidates(30);
        let out = cross_score(&FailingScorer, "q", input.clone(), 20, 5, TIMEOUT).await;
        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn test_timeout_passes_order_through() {
        let input = candidates(4);
        let out = cross_score(&SlowScorer, "q", input.clone(), 4, 4, Duration::from_millis(20)).await;
        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn test_length_mismatch_passes_order_through() {
        let input = candidates(4);
        let out = cross_score(&ShortScorer, "q", input.clone(), 4, 4, TIMEOUT).await;
        assert_eq!(out, input);
    }
}
