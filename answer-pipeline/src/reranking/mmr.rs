//! Maximal-marginal-relevance reranking with a per-file penalty and a hard
//! per-file cap. Pure relevance ordering tends to stack the shortlist with
//! near-identical chunks from one popular file; MMR trades a little
//! relevance for coverage of the rest of the corpus.

use std::collections::{HashMap, HashSet};

use crate::scoring::Candidate;

#[derive(Debug, Clone, Copy)]
pub struct MmrParams {
    /// Relevance weight; `1 - alpha` weighs redundancy.
    pub alpha: f32,
    /// Flat penalty per already-selected chunk from the same file.
    pub per_file_penalty: f32,
    /// Number of candidates to select.
    pub take: usize,
}

/// Greedy MMR selection over a fused-score-ordered shortlist. At each step
/// the candidate maximizing
/// `alpha * relevance - (1 - alpha) * max_similarity_to_selected - penalty`
/// is taken; ties resolve to the earlier input position.
pub fn mmr_rerank(candidates: Vec<Candidate>, params: &MmrParams) -> Vec<Candidate> {
    if candidates.len() <= 1 || params.take == 0 {
        let mut out = candidates;
        out.truncate(params.take);
        return out;
    }

    let token_sets: Vec<HashSet<String>> = candidates
        .iter()
        .map(|c| token_set(&c.chunk.text))
        .collect();

    let mut remaining: Vec<usize> = (0..candidates.len()).collect();
    let mut selected: Vec<usize> = Vec::with_capacity(params.take.min(candidates.len()));
    let mut per_file: HashMap<&str, usize> = HashMap::new();

    while selected.len() < params.take && !remaining.is_empty() {
        let mut best_pos = 0usize;
        let mut best_score = f32::NEG_INFINITY;

        for (pos, &idx) in remaining.iter().enumerate() {
            let candidate = &candidates[idx];
            let redundancy = selected
                .iter()
                .map(|&s| jaccard(&token_sets[idx], &token_sets[s]))
                .fold(0.0f32, f32::max);
            let same_file = per_file
                .get(candidate.chunk.file_path.as_str())
                .copied()
                .unwrap_or(0);

            let score = params.alpha * candidate.ranking_score()
                - (1.0 - params.alpha) * redundancy
                - params.per_file_penalty * (same_file as f32);

            if score > best_score {
                best_score = score;
                best_pos = pos;
            }
        }

        let idx = remaining.remove(best_pos);
        *per_file
            .entry(candidates[idx].chunk.file_path.as_str())
            .or_insert(0) += 1;
        selected.push(idx);
    }

    let mut picked: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();
    selected
        .into_iter()
        .filter_map(|idx| picked[idx].take())
        .collect()
}

/// Enforces a hard ceiling on chunks per file, walking in rank order.
/// A cap of zero means unlimited.
pub fn apply_per_file_cap(ranked: Vec<Candidate>, cap: usize) -> Vec<Candidate> {
    if cap == 0 {
        return ranked;
    }
    let mut per_file: HashMap<String, usize> = HashMap::new();
    ranked
        .into_iter()
        .filter(|candidate| {
            let count = per_file
                .entry(candidate.chunk.file_path.clone())
                .or_insert(0);
            *count += 1;
            *count <= cap
        })
        .collect()
}

fn token_set(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        (intersection as f32) / (union as f32)
    }
}
