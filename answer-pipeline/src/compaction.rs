//! Context assembly under a token budget. Chunks are taken in rank order
//! until the budget is hit; optional compaction drops sentences already
//! seen verbatim in an earlier selected chunk.

use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use crate::scoring::Candidate;

#[derive(Debug, Clone, Serialize)]
pub struct SelectedChunk {
    pub chunk_id: String,
    pub file_path: String,
    pub text: String,
    pub score: f32,
}

/// The context handed to answer resolution, with its provenance.
#[derive(Debug, Clone, Serialize)]
pub struct ContextBundle {
    pub chunks: Vec<SelectedChunk>,
    pub token_count: usize,
    pub token_budget: usize,
    pub compacted: bool,
}

impl ContextBundle {
    pub fn text(&self) -> String {
        self.chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CompactionStats {
    pub selected: usize,
    pub dropped_for_budget: usize,
    pub sentences_deduplicated: usize,
}

/// Character-count heuristic; good enough for budgeting without pulling in
/// a tokenizer.
pub fn estimate_tokens(text: &str, avg_chars_per_token: usize) -> usize {
    let divisor = avg_chars_per_token.max(1);
    text.chars().count().div_ceil(divisor)
}

/// Packs ranked candidates into the budget. Selection stops at the first
/// candidate that would overflow, so the context is always a rank-order
/// prefix of the shortlist.
pub fn compact_context(
    ranked: &[Candidate],
    token_budget: usize,
    compact: bool,
    avg_chars_per_token: usize,
) -> (ContextBundle, CompactionStats) {
    let mut stats = CompactionStats::default();
    let mut chunks = Vec::new();
    let mut token_count = 0usize;
    let mut seen_sentences: HashSet<String> = HashSet::new();

    for (rank, candidate) in ranked.iter().enumerate() {
        let text = if compact {
            let (text, dropped) = drop_seen_sentences(&candidate.chunk.text, &mut seen_sentences);
            stats.sentences_deduplicated += dropped;
            text
        } else {
            candidate.chunk.text.clone()
        };

        if text.trim().is_empty() {
            continue;
        }

        let cost = estimate_tokens(&text, avg_chars_per_token);
        if token_count + cost > token_budget {
            stats.dropped_for_budget = ranked.len() - rank;
            debug!(
                rank,
                cost, token_count, token_budget, "context budget reached"
            );
            break;
        }

        token_count += cost;
        chunks.push(SelectedChunk {
            chunk_id: candidate.chunk.chunk_id.clone(),
            file_path: candidate.chunk.file_path.clone(),
            text,
            score: candidate.ranking_score(),
        });
    }

    stats.selected = chunks.len();
    (
        ContextBundle {
            chunks,
            token_count,
            token_budget,
            compacted: compact,
        },
        stats,
    )
}

/// Removes sentences whose normalized form was already seen. Segments are
/// kept with their original terminators (including newlines) so the
/// chunk's line structure survives compaction; a chunk with nothing to
/// drop passes through byte-identical.
fn drop_seen_sentences(text: &str, seen: &mut HashSet<String>) -> (String, usize) {
    let mut kept = String::new();
    let mut dropped = 0usize;

    for segment in text.split_inclusive(['.', '!', '?', '\n']) {
        let normalized = normalize_sentence(segment);
        if normalized.is_empty() || seen.insert(normalized) {
            kept.push_str(segment);
        } else {
            dropped += 1;
        }
    }

    if dropped == 0 {
        return (text.to_owned(), 0);
    }
    (kept.trim().to_owned(), dropped)
}

fn normalize_sentence(sentence: &str) -> String {
    sentence
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
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
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens("abcde", 4), 2);
        assert_eq!(estimate_tokens("", 4), 0);
    }

    #[test]
    fn selection_stops_at_the_budget() {
        let ranked = vec![
            candidate("c1", &"a".repeat(40), 0.9), // 10 tokens at 4 chars each
            candidate("c2", &"b".repeat(40), 0.8),
            candidate("c3", &"c".repeat(40), 0.7),
        ];
        let (bundle, stats) = compact_context(&ranked, 25, false, 4);

        assert_eq!(bundle.chunks.len(), 2);
        assert_eq!(bundle.token_count, 20);
        assert_eq!(stats.dropped_for_budget, 1);
    }

    #[test]
    fn lower_ranked_chunk_never_skips_past_an_overflow() {
        // c2 overflows; c3 would fit but must not jump the queue.
        let ranked = vec![
            candidate("c1", &"a".repeat(40), 0.9),
            candidate("c2", &"b".repeat(200), 0.8),
            candidate("c3", &"c".repeat(8), 0.7),
        ];
        let (bundle, _) = compact_context(&ranked, 25, false, 4);
        assert_eq!(bundle.chunks.len(), 1);
        assert_eq!(bundle.chunks[0].chunk_id, "c1");
    }

    #[test]
    fn compaction_drops_repeated_sentences() {
        let ranked = vec![
            candidate("c1", "The cache is bounded. It evicts oldest entries.", 0.9),
            candidate("c2", "The cache is bounded. Eviction is LRU.", 0.8),
        ];
        let (bundle, stats) = compact_context(&ranked, 1000, true, 4);

        assert_eq!(stats.sentences_deduplicated, 1);
        assert!(!bundle.chunks[1].text.contains("bounded"));
        assert!(bundle.chunks[1].text.contains("LRU"));
    }

    #[test]
    fn compaction_preserves_line_structure_of_untouched_chunks() {
        let ranked = vec![
            candidate("c1", "intro paragraph about versions.", 0.9),
            candidate("c2", "name: answer-pipeline\nversion: 0.1.0", 0.8),
        ];
        let (bundle, stats) = compact_context(&ranked, 1000, true, 4);

        assert_eq!(stats.sentences_deduplicated, 0);
        assert_eq!(bundle.chunks[1].text, "name: answer-pipeline\nversion: 0.1.0");
        let lines: Vec<&str> = bundle.chunks[1].text.lines().collect();
        assert_eq!(lines, vec!["name: answer-pipeline", "version: 0.1.0"]);
    }

    #[test]
    fn compaction_keeps_newlines_around_dropped_sentences() {
        let ranked = vec![
            candidate("c1", "The cache is bounded.", 0.9),
            candidate("c2", "The cache is bounded.\nkey: value\nEviction is LRU.", 0.8),
        ];
        let (bundle, stats) = compact_context(&ranked, 1000, true, 4);

        assert_eq!(stats.sentences_deduplicated, 1);
        assert!(bundle.chunks[1]
            .text
            .lines()
            .any(|line| line.trim() == "key: value"));
    }

    #[test]
    fn empty_shortlist_yields_empty_bundle() {
        let (bundle, stats) = compact_context(&[], 1000, true, 4);
        assert!(bundle.is_empty());
        assert_eq!(stats.selected, 0);
    }

    #[test]
    fn bundle_text_joins_chunks_with_blank_lines() {
        let ranked = vec![candidate("c1", "first", 0.9), candidate("c2", "second", 0.8)];
        let (bundle, _) = compact_context(&ranked, 1000, false, 4);
        assert_eq!(bundle.text(), "first\n\nsecond");
    }
}
