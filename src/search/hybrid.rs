/// Hybrid score combination.
///
/// Merges vector-sourced candidates and lexical candidates into one ranked list.
/// Vector distance becomes a similarity via `1 / (1 + d)`; lexical scores are
/// divided by the maximum lexical score of this query. A document missing from
/// one side contributes 0 for that side.

use std::cmp::Ordering;
use std::collections::HashMap;

use super::Candidate;
use crate::config::HybridConfig;

/// Monotonic decreasing map from distance to similarity in (0, 1].
///
/// Negative distances (some inner-product indexes emit them) are clamped to 0.
pub fn distance_to_similarity(distance: f64) -> f64 {
    1.0 / (1.0 + distance.max(0.0))
}

/// Descending by hybrid score, ties broken by id ascending.
pub(crate) fn by_hybrid_desc(a: &Candidate, b: &Candidate) -> Ordering {
    let sa = a.scores.hybrid.unwrap_or(f64::NEG_INFINITY);
    let sb = b.scores.hybrid.unwrap_or(f64::NEG_INFINITY);
    sb.total_cmp(&sa).then_with(|| a.id.cmp(&b.id))
}

/// Fuse vector and lexical candidates.
///
/// `lexical = None` is the vector-only mode: the hybrid score is the plain vector
/// similarity, so ordering follows raw distance. Use it when hybrid search is
/// disabled or no lexical snapshot is available.
pub fn combine(
    vector: Vec<Candidate>,
    lexical: Option<Vec<Candidate>>,
    config: &HybridConfig,
) -> Vec<Candidate> {
    let Some(lexical) = lexical else {
        let mut ranked: Vec<Candidate> = vector
            .into_iter()
            .map(|mut c| {
                c.scores.hybrid = Some(c.scores.distance.map_or(0.0, distance_to_similarity));
                c
            })
            .collect();
        ranked.sort_by(by_hybrid_desc);
        return ranked;
    };

    let max_lexical = lexical
        .iter()
        .filter_map(|c| c.scores.lexical)
        .fold(0.0_f64, f64::max);

    // Union by id; vector candidates keep their embedding and distance.
    let mut merged: Vec<Candidate> = Vec::with_capacity(vector.len() + lexical.len());
    let mut position: HashMap<String, usize> = HashMap::with_capacity(vector.len() + lexical.len());
    for candidate in vector {
        if position.contains_key(&candidate.id) {
            continue;
        }
        position.insert(candidate.id.clone(), merged.len());
        merged.push(candidate);
    }
    for candidate in lexical {
        match position.get(&candidate.id) {
            Some(&i) => {
                let existing = &mut merged[i];
                existing.scores.lexical = candidate.scores.lexical;
                if existing.text.as_deref().map_or(true, str::is_empty) {
                    existing.text = candidate.text;
                }
            }
            None => {
                position.insert(candidate.id.clone(), merged.len());
                merged.push(candidate);
            }
        }
    }

    for candidate in &mut merged {
        let s_v = candidate.scores.distance.map_or(0.0, distance_to_similarity);
        let s_l = match candidate.scores.lexical {
            Some(score) if max_lexical > 0.0 => score / max_lexical,
            _ => 0.0,
        };
        candidate.scores.hybrid = Some(config.vector_weight * s_v + config.lexical_weight * s_l);
    }

    merged.sort_by(by_hybrid_desc);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec_candidate(id: &str, distance: f64) -> Candidate {
        let mut c = Candidate::new(id);
        c.scores.distance = Some(distance);
        c
    }

    fn lex_candidate(id: &str, score: f64) -> Candidate {
        let mut c = Candidate::new(id);
        c.text = Some(format!("text of {id}"));
        c.scores.lexical = Some(score);
        c
    }

    fn weights(v: f64, l: f64) -> HybridConfig {
        HybridConfig {
            enabled: true,
            vector_weight: v,
            lexical_weight: l,
        }
    }

    #[test]
    fn test_similarity_transform() {
        assert_eq!(distance_to_similarity(0.0), 1.0);
        assert!((distance_to_similarity(2.0) - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(distance_to_similarity(-0.5), 1.0);
        assert!(distance_to_similarity(5.0) > distance_to_similarity(6.0));
    }

    #[test]
    fn test_lexical_overlap_outranks_closer_vector() {
        // A: distance 2, no lexical; B: distance 10, max lexical.
        let vector = vec![vec_candidate("A", 2.0), vec_candidate("B", 10.0)];
        let lexical = vec![lex_candidate("B", 4.2)];
        let ranked = combine(vector, Some(lexical), &weights(0.7, 0.3));

        assert_eq!(ranked[0].id, "B");
        assert_eq!(ranked[1].id, "A");
        let b = ranked[0].scores.hybrid.unwrap();
        let a = ranked[1].scores.hybrid.unwrap();
        assert!((a - 0.7 / 3.0).abs() < 1e-3, "A was {a}");
        assert!((b - (0.7 / 11.0 + 0.3)).abs() < 1e-3, "B was {b}");
    }

    #[test]
    fn test_monotonic_in_distance_with_equal_lexical() {
        let vector = vec![vec_candidate("far", 3.0), vec_candidate("near", 1.0)];
        let lexical = vec![lex_candidate("far", 2.0), lex_candidate("near", 2.0)];
        let ranked = combine(vector, Some(lexical), &weights(0.5, 0.5));
        assert_eq!(ranked[0].id, "near");
        assert_eq!(ranked[1].id, "far");
    }

    #[test]
    fn test_union_keeps_single_side_documents() {
        let vector = vec![vec_candidate("v", 1.0)];
        let lexical = vec![lex_candidate("l", 1.0)];
        let ranked = combine(vector, Some(lexical), &weights(0.7, 0.3));
        let ids: Vec<&str> = ranked.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["v", "l"]);
        // lexical-only hit has no distance
        assert_eq!(ranked[1].scores.distance, None);
        assert!((ranked[1].scores.hybrid.unwrap() - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_zero_max_lexical_is_treated_as_zero() {
        let vector = vec![vec_candidate("a", 1.0)];
        let lexical = vec![lex_candidate("a", 0.0)];
        let ranked = combine(vector, Some(lexical), &weights(0.7, 0.3));
        assert!((ranked[0].scores.hybrid.unwrap() - 0.35).abs() < 1e-12);
    }

    #[test]
    fn test_ties_break_by_id() {
        let vector = vec![vec_candidate("b", 1.0), vec_candidate("a", 1.0), vec_candidate("c", 1.0)];
        let ranked = combine(vector, Some(Vec::new()), &weights(0.7, 0.3));
        let ids: Vec<&str> = ranked.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_vector_only_mode_follows_distance() {
        let vector = vec![vec_candidate("x", 5.0), vec_candidate("y", 0.5), vec_candidate("z", 2.0)];
        let ranked = combine(vector, None, &weights(0.7, 0.3));
        let ids: Vec<&str> = ranked.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["y", "z", "x"]);
        assert!(ranked.iter().all(|c| c.scores.lexical.is_none()));
        assert!((ranked[0].scores.hybrid.unwrap() - 1.0 / 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_lexical_text_fills_missing_vector_text() {
        let vector = vec![vec_candidate("a", 1.0)];
        let lexical = vec![lex_candidate("a", 1.0)];
        let ranked = combine(vector, Some(lexical), &weights(0.7, 0.3));
        assert_eq!(ranked[0].text.as_deref(), Some("text of a"));
    }
}
