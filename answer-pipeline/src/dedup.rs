//! Near-duplicate suppression over a scored shortlist. Overlapping windows
//! and mirrored documentation frequently surface the same passage through
//! several chunks; only the best-scored copy should survive.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::scoring::Candidate;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupMethod {
    /// Byte-equality of trimmed text.
    #[default]
    Exact,
    /// Jaccard similarity over lowercased token sets.
    Approximate,
}

/// Precomputed representation a strategy compares candidates by.
pub enum Fingerprint {
    Digest([u8; 32]),
    TokenSet(HashSet<String>),
}

pub trait SimilarityStrategy: Send + Sync {
    fn fingerprint(&self, text: &str) -> Fingerprint;
    fn similarity(&self, a: &Fingerprint, b: &Fingerprint) -> f32;
}

pub struct ExactHash;

impl SimilarityStrategy for ExactHash {
    fn fingerprint(&self, text: &str) -> Fingerprint {
        let digest = Sha256::digest(text.trim().as_bytes());
        Fingerprint::Digest(digest.into())
    }

    fn similarity(&self, a: &Fingerprint, b: &Fingerprint) -> f32 {
        match (a, b) {
            (Fingerprint::Digest(x), Fingerprint::Digest(y)) if x == y => 1.0,
            _ => 0.0,
        }
    }
}

pub struct TokenSetJaccard;

impl SimilarityStrategy for TokenSetJaccard {
    fn fingerprint(&self, text: &str) -> Fingerprint {
        let tokens = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_ascii_lowercase)
            .collect();
        Fingerprint::TokenSet(tokens)
    }

    fn similarity(&self, a: &Fingerprint, b: &Fingerprint) -> f32 {
        match (a, b) {
            (Fingerprint::TokenSet(x), Fingerprint::TokenSet(y)) => {
                if x.is_empty() && y.is_empty() {
                    return 1.0;
                }
                let intersection = x.intersection(y).count();
                let union = x.len() + y.len() - intersection;
                if union == 0 {
                    0.0
                } else {
                    (intersection as f32) / (union as f32)
                }
            }
            _ => 0.0,
        }
    }
}

pub fn strategy_for(method: DedupMethod) -> Box<dyn SimilarityStrategy> {
    match method {
        DedupMethod::Exact => Box::new(ExactHash),
        DedupMethod::Approximate => Box::new(TokenSetJaccard),
    }
}

/// Drops every candidate whose similarity to an already-kept, better-scored
/// candidate reaches `threshold`. Relative order of the survivors is
/// preserved, so running the pass twice changes nothing.
pub fn suppress_near_duplicates(
    candidates: Vec<Candidate>,
    strategy: &dyn SimilarityStrategy,
    threshold: f32,
) -> Vec<Candidate> {
    if candidates.len() < 2 {
        return candidates;
    }

    let fingerprints: Vec<Fingerprint> = candidates
        .iter()
        .map(|c| strategy.fingerprint(&c.chunk.text))
        .collect();

    // Visit by descending score so the survivor of each duplicate group is
    // its best-scored member. Index breaks ties deterministically.
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| {
        candidates[b]
            .ranking_score()
            .partial_cmp(&candidates[a].ranking_score())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    let mut kept: Vec<usize> = Vec::with_capacity(candidates.len());
    for idx in order {
        let duplicate = kept.iter().any(|&kept_idx| {
            strategy.similarity(&fingerprints[idx], &fingerprints[kept_idx]) >= threshold
        });
        if duplicate {
            debug!(
                chunk_id = %candidates[idx].chunk.chunk_id,
                "suppressing near-duplicate candidate"
            );
        } else {
            kept.push(idx);
        }
    }

    kept.sort_unstable();
    let mut kept_flags = vec![false; candidates.len()];
    for idx in kept {
        kept_flags[idx] = true;
    }

    candidates
        .into_iter()
        .zip(kept_flags)
        .filter_map(|(candidate, keep)| keep.then_some(candidate))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::CorpusChunk;

    fn candidate(id: &str, text: &str, fused: f32) -> Candidate {
        let mut c = Candidate::new(CorpusChunk::new(id, "doc.md", text));
        c.update_fused(fused);
        c
    }

    #[test]
    fn exact_hash_drops_only_byte_identical_text() {
        let strategy = ExactHash;
        let input = vec![
            candidate("c1", "the same passage", 0.9),
            candidate("c2", "the same passage", 0.5),
            candidate("c3", "a different passage", 0.4),
        ];
        let survivors = suppress_near_duplicates(input, &strategy, 0.9);
        let ids: Vec<&str> = survivors.iter().map(|c| c.chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c3"]);
    }

    #[test]
    fn survivor_is_the_best_scored_copy() {
        let strategy = ExactHash;
        let input = vec![
            candidate("low", "duplicated text", 0.2),
            candidate("high", "duplicated text", 0.8),
        ];
        let survivors = suppress_near_duplicates(input, &strategy, 0.9);
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].chunk.chunk_id, "high");
    }

    #[test]
    fn jaccard_catches_near_duplicates() {
        let strategy = TokenSetJaccard;
        let input = vec![
            candidate("c1", "alpha beta gamma delta epsilon zeta eta theta iota kappa", 0.9),
            candidate("c2", "alpha beta gamma delta epsilon zeta eta theta iota lambda", 0.5),
            candidate("c3", "entirely unrelated words about cooking pasta", 0.4),
        ];
        let survivors = suppress_near_duplicates(input, &strategy, 0.8);
        let ids: Vec<&str> = survivors.iter().map(|c| c.chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c3"]);
    }

    #[test]
    fn suppression_is_idempotent() {
        let strategy = TokenSetJaccard;
        let input = vec![
            candidate("c1", "alpha beta gamma delta epsilon zeta", 0.9),
            candidate("c2", "alpha beta gamma delta epsilon eta", 0.5),
            candidate("c3", "something else entirely here now", 0.4),
        ];
        let once = suppress_near_duplicates(input, &strategy, 0.8);
        let twice = suppress_near_duplicates(once.clone(), &strategy, 0.8);
        let once_ids: Vec<&str> = once.iter().map(|c| c.chunk.chunk_id.as_str()).collect();
        let twice_ids: Vec<&str> = twice.iter().map(|c| c.chunk.chunk_id.as_str()).collect();
        assert_eq!(once_ids, twice_ids);
    }

    #[test]
    fn order_of_survivors_is_preserved() {
        let strategy = ExactHash;
        let input = vec![
            candidate("c1", "one", 0.1),
            candidate("c2", "two", 0.9),
            candidate("c3", "three", 0.5),
        ];
        let survivors = suppress_near_duplicates(input, &strategy, 0.9);
        let ids: Vec<&str> = survivors.iter().map(|c| c.chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
    }
}
