// crates/muninn-server/src/context/scoring.rs
// Candidate scoring: weighted sum of similarity, recency, confidence,
// and type diversity. Strategy presets pick the weights.

use super::retrieval::Candidate;
use crate::utils::age_days;
use std::collections::HashSet;

/// Recency half-life driver: exp(-age_days / 90).
const RECENCY_SCALE: f64 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub similarity: f64,
    pub recency: f64,
    pub confidence: f64,
    pub diversity: f64,
}

/// Strategy presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    Balanced,
    Precise,
    Broad,
}

impl Strategy {
    pub fn parse(s: &str) -> Strategy {
        match s {
            "precise" => Strategy::Precise,
            "broad" => Strategy::Broad,
            _ => Strategy::Balanced,
        }
    }

    pub fn weights(&self) -> Weights {
        match self {
            Strategy::Balanced => Weights {
                similarity: 0.5,
                recency: 0.2,
                confidence: 0.2,
                diversity: 0.1,
            },
            Strategy::Precise => Weights {
                similarity: 0.7,
                recency: 0.1,
                confidence: 0.15,
                diversity: 0.05,
            },
            Strategy::Broad => Weights {
                similarity: 0.3,
                recency: 0.2,
                confidence: 0.2,
                diversity: 0.3,
            },
        }
    }
}

/// A scored candidate.
#[derive(Debug, Clone)]
pub struct Scored {
    pub candidate: Candidate,
    pub score: f64,
}

/// Score candidates. Diversity is evaluated against the set of types seen
/// so far in the scoring pass, so the pass order matters: candidates are
/// visited by similarity, then recency, then id (the tie-break rule).
pub fn score(candidates: Vec<Candidate>, strategy: Strategy) -> Vec<Scored> {
    let weights = strategy.weights();

    let mut ordered = candidates;
    ordered.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                recency(&b.created_at)
                    .partial_cmp(&recency(&a.created_at))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut seen_types: HashSet<&'static str> = HashSet::new();
    let mut scored: Vec<Scored> = ordered
        .into_iter()
        .map(|candidate| {
            let diversity = if seen_types.insert(candidate.source_type) {
                1.0
            } else {
                0.0
            };
            let value = weights.similarity * candidate.similarity
                + weights.recency * recency(&candidate.created_at)
                + weights.confidence * candidate.confidence
                + weights.diversity * diversity;
            Scored {
                score: value,
                candidate,
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.candidate
                    .similarity
                    .partial_cmp(&a.candidate.similarity)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| {
                recency(&b.candidate.created_at)
                    .partial_cmp(&recency(&a.candidate.created_at))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.candidate.id.cmp(&b.candidate.id))
    });
    scored
}

/// Recency component: exp(-age_days / 90), 1.0 for brand-new rows.
pub fn recency(created_at: &str) -> f64 {
    (-age_days(created_at) / RECENCY_SCALE).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: i64, source_type: &'static str, similarity: f64) -> Candidate {
        Candidate {
            id,
            source_type,
            subtype: None,
            title: format!("c{id}"),
            content: "content".to_string(),
            confidence: 0.5,
            created_at: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            similarity,
        }
    }

    #[test]
    fn test_preset_weights() {
        let balanced = Strategy::Balanced.weights();
        assert_eq!(
            (balanced.similarity, balanced.recency, balanced.confidence, balanced.diversity),
            (0.5, 0.2, 0.2, 0.1)
        );
        let precise = Strategy::Precise.weights();
        assert_eq!(precise.similarity, 0.7);
        let broad = Strategy::Broad.weights();
        assert_eq!(broad.diversity, 0.3);
    }

    #[test]
    fn test_first_of_each_type_gets_diversity() {
        let scored = score(
            vec![
                candidate(1, "decision", 0.9),
                candidate(2, "decision", 0.9),
                candidate(3, "learning", 0.5),
            ],
            Strategy::Broad,
        );
        // With broad weights the novel learning type outranks the duplicate decision
        let positions: Vec<i64> = scored.iter().map(|s| s.candidate.id).collect();
        let learning_pos = positions.iter().position(|&id| id == 3).unwrap();
        let dup_pos = positions.iter().position(|&id| id == 2).unwrap();
        assert!(learning_pos < dup_pos);
    }

    #[test]
    fn test_equal_scores_tie_break_by_id() {
        let scored = score(
            vec![candidate(5, "decision", 0.9), candidate(2, "decision", 0.9)],
            Strategy::Balanced,
        );
        // First visited (lower id) takes the diversity point and wins;
        // among leftovers order falls back to id
        assert_eq!(scored[0].candidate.id, 2);
        assert_eq!(scored[1].candidate.id, 5);
    }

    #[test]
    fn test_scoring_is_order_independent_for_equal_inputs() {
        let forward = score(
            vec![candidate(1, "decision", 0.8), candidate(2, "learning", 0.8)],
            Strategy::Balanced,
        );
        let reversed = score(
            vec![candidate(2, "learning", 0.8), candidate(1, "decision", 0.8)],
            Strategy::Balanced,
        );
        let ids_forward: Vec<i64> = forward.iter().map(|s| s.candidate.id).collect();
        let ids_reversed: Vec<i64> = reversed.iter().map(|s| s.candidate.id).collect();
        assert_eq!(ids_forward, ids_reversed);
    }

    #[test]
    fn test_recency_decays() {
        assert!(recency("2020-01-01 00:00:00") < 0.01);
        let now = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
        assert!(recency(&now) > 0.99);
    }
}
