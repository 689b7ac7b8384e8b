use std::{cmp::Ordering, collections::HashMap};

use common::types::CorpusChunk;
use serde::{Deserialize, Serialize};

/// Identity of a candidate within a shortlist: `(chunk_id, file_path)`.
pub type CandidateKey = (String, String);

/// Holds optional subscores gathered from the retrieval channels.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComponentScores {
    pub lexical: Option<f32>,
    pub dense: Option<f32>,
    pub metadata: Option<f32>,
}

/// A corpus chunk annotated with its accumulated retrieval scores.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub chunk: CorpusChunk,
    pub scores: ComponentScores,
    pub fused: f32,
    /// Set by the cross-encoder stage; `None` until then.
    pub rerank: Option<f32>,
}

impl Candidate {
    pub fn new(chunk: CorpusChunk) -> Self {
        Self {
            chunk,
            scores: ComponentScores::default(),
            fused: 0.0,
            rerank: None,
        }
    }

    pub fn key(&self) -> CandidateKey {
        (self.chunk.chunk_id.clone(), self.chunk.file_path.clone())
    }

    pub const fn with_lexical_score(mut self, score: f32) -> Self {
        self.scores.lexical = Some(score);
        self
    }

    pub const fn with_dense_score(mut self, score: f32) -> Self {
        self.scores.dense = Some(score);
        self
    }

    pub const fn with_metadata_score(mut self, score: f32) -> Self {
        self.scores.metadata = Some(score);
        self
    }

    pub const fn update_fused(&mut self, fused: f32) {
        self.fused = fused;
    }

    /// Rerank score when present, fused score otherwise.
    pub fn ranking_score(&self) -> f32 {
        self.rerank.unwrap_or(self.fused)
    }
}

/// Weights used for linear score fusion across the retrieval channels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FusionWeights {
    pub lexical: f32,
    pub dense: f32,
    pub metadata: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        // Lexical search carries most weight for question answering over
        // documentation-heavy corpora; dense catches paraphrases and the
        // metadata signal nudges filename-relevant chunks upward.
        Self {
            lexical: 0.55,
            dense: 0.35,
            metadata: 0.10,
        }
    }
}

pub const fn clamp_unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }

    let mut min = f32::MAX;
    let mut max = f32::MIN;

    for s in scores {
        if !s.is_finite() {
            continue;
        }
        if *s < min {
            min = *s;
        }
        if *s > max {
            max = *s;
        }
    }

    if !min.is_finite() || !max.is_finite() {
        return scores.iter().map(|_| 0.0).collect();
    }

    if (max - min).abs() < f32::EPSILON {
        return vec![1.0; scores.len()];
    }

    scores
        .iter()
        .map(|score| {
            if score.is_finite() {
                clamp_unit((score - min) / (max - min))
            } else {
                0.0
            }
        })
        .collect()
}

pub fn fuse_scores(scores: &ComponentScores, weights: FusionWeights) -> f32 {
    let lexical = scores.lexical.unwrap_or(0.0);
    let dense = scores.dense.unwrap_or(0.0);
    let metadata = scores.metadata.unwrap_or(0.0);

    let fused = metadata.mul_add(
        weights.metadata,
        lexical.mul_add(weights.lexical, dense * weights.dense),
    );

    clamp_unit(fused)
}

/// Merges candidates by identity, keeping the best value per signal when
/// the same chunk arrives from more than one channel.
pub fn merge_candidates(target: &mut HashMap<CandidateKey, Candidate>, incoming: Vec<Candidate>) {
    for candidate in incoming {
        let key = candidate.key();
        target
            .entry(key)
            .and_modify(|existing| {
                if let Some(score) = candidate.scores.lexical {
                    let prior = existing.scores.lexical.unwrap_or(f32::MIN);
                    if score > prior {
                        existing.scores.lexical = Some(score);
                    }
                }
                if let Some(score) = candidate.scores.dense {
                    let prior = existing.scores.dense.unwrap_or(f32::MIN);
                    if score > prior {
                        existing.scores.dense = Some(score);
                    }
                }
                if let Some(score) = candidate.scores.metadata {
                    let prior = existing.scores.metadata.unwrap_or(f32::MIN);
                    if score > prior {
                        existing.scores.metadata = Some(score);
                    }
                }
            })
            .or_insert(candidate);
    }
}

pub fn apply_fusion(candidates: &mut HashMap<CandidateKey, Candidate>, weights: FusionWeights) {
    for candidate in candidates.values_mut() {
        let fused = fuse_scores(&candidate.scores, weights);
        candidate.update_fused(fused);
    }
}

pub fn sort_by_fused_desc(items: &mut [Candidate]) {
    items.sort_by(|a, b| {
        b.fused
            .partial_cmp(&a.fused)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.key().cmp(&b.key()))
    });
}

pub fn sort_by_rank_desc(items: &mut [Candidate]) {
    items.sort_by(|a, b| {
        b.ranking_score()
            .partial_cmp(&a.ranking_score())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.key().cmp(&b.key()))
    });
}

/// Lowercased alphanumeric terms of length >= 3, sorted and deduplicated.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut terms = Vec::new();
    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        let term = raw.trim().to_ascii_lowercase();
        if term.len() >= 3 {
            terms.push(term);
        }
    }
    terms.sort();
    terms.dedup();
    terms
}

/// Fraction of `terms` present as substrings of `haystack`.
pub fn lexical_overlap_score(terms: &[String], haystack: &str) -> f32 {
    if terms.is_empty() {
        return 0.0;
    }
    let lower = haystack.to_ascii_lowercase();
    let mut matches = 0usize;
    for term in terms {
        if lower.contains(term) {
            matches += 1;
        }
    }
    (matches as f32) / (terms.len() as f32)
}
