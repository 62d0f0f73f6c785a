/// Maximal Marginal Relevance (MMR) diversity selection.
///
/// Greedily picks `k` candidates from a relevance-ordered pool, trading relevance
/// to the query against redundancy with what has already been picked.
///
/// ```text
/// MMR(c) = lambda * cos(q, c) - (1 - lambda) * max_{s in S} cos(c, s)
/// ```
///
/// Redundancy is 0 while nothing is selected. Ties go to the higher raw relevance,
/// then to the smaller document id. Candidates without an embedding cannot be
/// scored; they are appended in their incoming order only when the embedded pool
/// runs out before `k` picks.
///
/// Cost is `O(k * pool)` cosine evaluations: each candidate keeps its running
/// maximum similarity to the selected set, updated once per pick.

use std::cmp::Ordering;

use super::{cosine_similarity, Candidate};

struct Scored {
    candidate: Candidate,
    relevance: f64,
    redundancy: f64,
}

/// True when `a` should be picked over `b`.
fn beats(a_mmr: f64, a: &Scored, b_mmr: f64, b: &Scored) -> bool {
    match a_mmr.total_cmp(&b_mmr) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => match a.relevance.total_cmp(&b.relevance) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => a.candidate.id < b.candidate.id,
        },
    }
}

/// Select up to `k` candidates from `pool`.
///
/// A pool no larger than `k` passes through unchanged, in its incoming order.
pub fn select_diverse(
    pool: Vec<Candidate>,
    query_embedding: &[f32],
    k: usize,
    lambda: f64,
) -> Vec<Candidate> {
    if pool.len() <= k {
        return pool;
    }

    let lambda = lambda.clamp(0.0, 1.0);
    let diversity_weight = 1.0 - lambda;

    let mut remaining: Vec<Scored> = Vec::with_capacity(pool.len());
    let mut without_embedding: Vec<Candidate> = Vec::new();
    for candidate in pool {
        match candidate.embedding.as_deref() {
            Some(embedding) if !embedding.is_empty() => {
                let relevance = cosine_similarity(query_embedding, embedding);
                remaining.push(Scored {
                    candidate,
                    relevance,
                    redundancy: 0.0,
                });
            }
            _ => without_embedding.push(candidate),
        }
    }

    if !without_embedding.is_empty() {
        tracing::debug!(
            count = without_embedding.len(),
            "Candidates without embeddings excluded from MMR selection"
        );
    }

    let mut selected: Vec<Candidate> = Vec::with_capacity(k);
    while selected.len() < k && !remaining.is_empty() {
        let mut best = 0;
        let mut best_mmr = f64::NEG_INFINITY;
        for (i, scored) in remaining.iter().enumerate() {
            let mmr = lambda * scored.relevance - diversity_weight * scored.redundancy;
            if i == 0 || beats(mmr, scored, best_mmr, &remaining[best]) {
                best = i;
                best_mmr = mmr;
            }
        }

        let mut picked = remaining.swap_remove(best);
        if let Some(picked_embedding) = picked.candidate.embedding.as_deref() {
            for other in remaining.iter_mut() {
                if let Some(embedding) = other.candidate.embedding.as_deref() {
                    let sim = cosine_similarity(embedding, picked_embedding);
                    if sim > other.redundancy {
                        other.redundancy = sim;
                    }
                }
            }
        }
        picked.candidate.scores.selection = Some(best_mmr);
        selected.push(picked.candidate);
    }

    let shortfall = k - selected.len();
    selected.extend(without_embedding.into_iter().take(shortfall));
    selected
}
