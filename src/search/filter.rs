/// Relevance filter: drop candidates whose raw vector distance exceeds the threshold.
///
/// Lexical-only candidates carry no distance and pass through untouched.

use super::Candidate;

/// Keep candidates with `distance <= threshold` (or no distance at all), preserving order.
pub fn filter_by_distance(candidates: Vec<Candidate>, threshold: f64) -> Vec<Candidate> {
    candidates
        .into_iter()
        .filter(|c| c.scores.distance.map_or(true, |d| d <= threshold))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_distance(id: &str, distance: f64) -> Candidate {
        let mut c = Candidate::new(id);
        c.scores.distance = Some(distance);
        c
    }

    #[test]
    fn test_threshold_keeps_three_of_five() {
        let candidates: Vec<Candidate> = [1.0, 5.0, 9.0, 13.0, 20.0]
            .iter()
            .enumerate()
            .map(|(i, &d)| with_distance(&format!("d{i}"), d))
            .collect();
        let kept = filter_by_distance(candidates, 10.0);
        let distances: Vec<f64> = kept.iter().filter_map(|c| c.scores.distance).collect();
        assert_eq!(distances, vec![1.0, 5.0, 9.0]);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let kept = filter_by_distance(vec![with_distance("edge", 10.0)], 10.0);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_lexical_only_passes_through() {
        let mut lexical = Candidate::new("lex");
        lexical.scores.lexical = Some(3.0);
        let kept = filter_by_distance(vec![with_distance("far", 50.0), lexical], 1.0);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "lex");
    }

    #[test]
    fn test_everything_filtered_is_empty() {
        let kept = filter_by_distance(vec![with_distance("a", 3.0), with_distance("b", 4.0)], 0.5);
        assert!(kept.is_empty());
    }
}
