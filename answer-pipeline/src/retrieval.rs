//! Stage-one retrieval: fans the query variants out to the lexical and
//! dense channels concurrently, normalizes and fuses the scores, and
//! hydrates the winning ids into full chunks. Every external call is
//! wrapped in a timeout and fails open, so one sick index degrades the
//! shortlist instead of killing the request.

use std::{collections::HashMap, time::Duration};

use common::services::{DocumentStore, IndexHit, LexicalIndex, VectorIndex};
use common::types::CorpusChunk;
use serde::Serialize;
use tracing::warn;

use crate::pipeline::config::PipelineTuning;
use crate::query::QueryVariants;
use crate::scoring::{
    apply_fusion, extract_keywords, lexical_overlap_score, merge_candidates, min_max_normalize,
    sort_by_fused_desc, Candidate, CandidateKey,
};

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RetrievalStats {
    pub lexical_hits: usize,
    pub dense_hits: usize,
    pub lexical_failed: bool,
    pub dense_failed: bool,
    pub merged: usize,
    pub shortlisted: usize,
    pub hint_chunks: usize,
}

pub async fn retrieve_candidates(
    lexical: &dyn LexicalIndex,
    dense: &dyn VectorIndex,
    store: &dyn DocumentStore,
    variants: &QueryVariants,
    query_embedding: &[f32],
    tuning: &PipelineTuning,
) -> (Vec<Candidate>, RetrievalStats) {
    let mut stats = RetrievalStats::default();
    let take = tuning.stage1_top_k;
    let timeout = Duration::from_millis(tuning.service_timeout_ms);

    let (lexical_main, lexical_title, dense_hits) = tokio::join!(
        guarded_lexical(lexical, &variants.lexical, take, timeout),
        guarded_lexical(lexical, &variants.title, take, timeout),
        guarded_dense(dense, query_embedding, take, timeout),
    );

    stats.lexical_failed = lexical_main.is_none() && lexical_title.is_none();
    stats.dense_failed = dense_hits.is_none();

    let mut lexical_hits = lexical_main.unwrap_or_default();
    for hit in lexical_title.unwrap_or_default() {
        if !lexical_hits.iter().any(|h| h.chunk_id == hit.chunk_id) {
            lexical_hits.push(hit);
        }
    }
    let dense_hits = dense_hits.unwrap_or_default();
    stats.lexical_hits = lexical_hits.len();
    stats.dense_hits = dense_hits.len();

    let mut ids: Vec<String> = lexical_hits.iter().map(|h| h.chunk_id.clone()).collect();
    for hit in &dense_hits {
        if !ids.contains(&hit.chunk_id) {
            ids.push(hit.chunk_id.clone());
        }
    }

    let chunks = hydrate(store, &ids, timeout).await;

    let mut merged: HashMap<CandidateKey, Candidate> = HashMap::new();
    merge_candidates(
        &mut merged,
        channel_candidates(&lexical_hits, &chunks, Signal::Lexical),
    );
    merge_candidates(
        &mut merged,
        channel_candidates(&dense_hits, &chunks, Signal::Dense),
    );

    let question_terms = extract_keywords(&variants.raw);
    for candidate in merged.values_mut() {
        let score = lexical_overlap_score(&question_terms, &candidate.chunk.file_path);
        if score > 0.0 {
            candidate.scores.metadata = Some(score);
        }
    }

    apply_fusion(&mut merged, tuning.fusion_weights());
    stats.merged = merged.len();

    let mut shortlist: Vec<Candidate> = merged.into_values().collect();
    sort_by_fused_desc(&mut shortlist);
    shortlist.truncate(tuning.stage1_top_k);
    stats.shortlisted = shortlist.len();

    // The hint prefetch is unioned in after truncation so an explicit
    // pointer in the question cannot be squeezed out by ranking.
    if let Some(hint) = &variants.document_hint {
        let prefetched = prefetch_hint(store, &hint.file_path, timeout).await;
        stats.hint_chunks = prefetched.len();
        for chunk in prefetched {
            let key = (chunk.chunk_id.clone(), chunk.file_path.clone());
            if shortlist.iter().any(|c| c.key() == key) {
                continue;
            }
            let mut candidate = Candidate::new(chunk);
            let score = lexical_overlap_score(&question_terms, &candidate.chunk.file_path);
            if score > 0.0 {
                candidate.scores.metadata = Some(score);
            }
            candidate.update_fused(crate::scoring::fuse_scores(
                &candidate.scores,
                tuning.fusion_weights(),
            ));
            shortlist.push(candidate);
        }
    }

    (shortlist, stats)
}

enum Signal {
    Lexical,
    Dense,
}

fn channel_candidates(
    hits: &[IndexHit],
    chunks: &HashMap<String, CorpusChunk>,
    signal: Signal,
) -> Vec<Candidate> {
    let scores: Vec<f32> = hits.iter().map(|h| h.score).collect();
    let normalized = min_max_normalize(&scores);

    hits.iter()
        .zip(normalized)
        .filter_map(|(hit, score)| {
            let chunk = chunks.get(&hit.chunk_id)?.clone();
            let candidate = Candidate::new(chunk);
            Some(match signal {
                Signal::Lexical => candidate.with_lexical_score(score),
                Signal::Dense => candidate.with_dense_score(score),
            })
        })
        .collect()
}

async fn guarded_lexical(
    index: &dyn LexicalIndex,
    query: &str,
    take: usize,
    timeout: Duration,
) -> Option<Vec<IndexHit>> {
    if query.trim().is_empty() {
        return Some(Vec::new());
    }
    match tokio::time::timeout(timeout, index.search(query, take)).await {
        Ok(Ok(hits)) => Some(hits),
        Ok(Err(error)) => {
            warn!(%error, "lexical channel failed, continuing without it");
            None
        }
        Err(_) => {
            warn!("lexical channel timed out, continuing without it");
            None
        }
    }
}

async fn guarded_dense(
    index: &dyn VectorIndex,
    embedding: &[f32],
    take: usize,
    timeout: Duration,
) -> Option<Vec<IndexHit>> {
    if embedding.is_empty() {
        return Some(Vec::new());
    }
    match tokio::time::timeout(timeout, index.search(embedding, take)).await {
        Ok(Ok(hits)) => Some(hits),
        Ok(Err(error)) => {
            warn!(%error, "dense channel failed, continuing without it");
            None
        }
        Err(_) => {
            warn!("dense channel timed out, continuing without it");
            None
        }
    }
}

async fn hydrate(
    store: &dyn DocumentStore,
    ids: &[String],
    timeout: Duration,
) -> HashMap<String, CorpusChunk> {
    if ids.is_empty() {
        return HashMap::new();
    }
    match tokio::time::timeout(timeout, store.fetch_chunks(ids)).await {
        Ok(Ok(chunks)) => chunks
            .into_iter()
            .map(|chunk| (chunk.chunk_id.clone(), chunk))
            .collect(),
        Ok(Err(error)) => {
            warn!(%error, "chunk hydration failed, dropping shortlist");
            HashMap::new()
        }
        Err(_) => {
            warn!("chunk hydration timed out, dropping shortlist");
            HashMap::new()
        }
    }
}

async fn prefetch_hint(
    store: &dyn DocumentStore,
    file_path: &str,
    timeout: Duration,
) -> Vec<CorpusChunk> {
    match tokio::time::timeout(timeout, store.chunks_for_document(file_path)).await {
        Ok(Ok(chunks)) => chunks,
        Ok(Err(error)) => {
            warn!(%error, file_path, "hint prefetch failed, continuing without it");
            Vec::new()
        }
        Err(_) => {
            warn!(file_path, "hint prefetch timed out, continuing without it");
            Vec::new()
        }
    }
}
