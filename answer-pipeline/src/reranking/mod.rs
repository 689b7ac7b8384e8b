//! Stage-two reranking: a cross-encoder scores the head of the shortlist
//! pairwise against the question, behind a bounded score cache so repeated
//! questions do not pay for the same pairs twice.

pub mod mmr;

pub use mmr::{apply_per_file_cap, mmr_rerank, MmrParams};

use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
    time::Duration,
};

use common::services::PairwiseScorer;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::pipeline::config::PipelineTuning;
use crate::scoring::{clamp_unit, Candidate};

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RerankStats {
    pub scored: usize,
    pub cache_hits: usize,
    pub fallbacks: usize,
}

/// Bounded LRU cache of cross-encoder scores, keyed by a digest of the
/// question and chunk text. Shared across requests.
#[derive(Debug)]
pub struct ScoreCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

#[derive(Debug)]
struct CacheEntry {
    value: f32,
    stamp: u64,
}

/// Recency is tracked with a monotonically increasing stamp per entry and
/// a stamp-ordered index, so touches and evictions avoid scanning.
#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    by_stamp: BTreeMap<u64, String>,
    clock: u64,
}

impl ScoreCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn get(&self, key: &str) -> Option<f32> {
        let mut guard = self.inner.lock().ok()?;
        let inner = &mut *guard;
        let entry = inner.entries.get_mut(key)?;
        inner.clock += 1;
        inner.by_stamp.remove(&entry.stamp);
        entry.stamp = inner.clock;
        inner.by_stamp.insert(entry.stamp, key.to_owned());
        Some(entry.value)
    }

    pub fn put(&self, key: String, value: f32) {
        let Ok(mut guard) = self.inner.lock() else {
            return;
        };
        let inner = &mut *guard;
        inner.clock += 1;
        let stamp = inner.clock;

        if let Some(entry) = inner.entries.get_mut(&key) {
            inner.by_stamp.remove(&entry.stamp);
            entry.value = value;
            entry.stamp = stamp;
            inner.by_stamp.insert(stamp, key);
            return;
        }

        while inner.entries.len() >= self.capacity {
            if let Some((_, evicted)) = inner.by_stamp.pop_first() {
                inner.entries.remove(&evicted);
            } else {
                break;
            }
        }
        inner.entries.insert(key.clone(), CacheEntry { value, stamp });
        inner.by_stamp.insert(stamp, key);
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.entries.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn pair_key(query: &str, document: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    hasher.update([0u8]);
    hasher.update(document.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Squashes a raw cross-encoder logit into the unit interval.
fn squash(raw: f32) -> f32 {
    if raw.is_finite() {
        1.0 / (1.0 + (-raw).exp())
    } else {
        0.0
    }
}

/// Reranks the head of the shortlist with the cross-encoder. Each pair
/// score comes from the cache when available; a failed or timed-out score
/// falls back to the candidate's fused score and is not cached. The tail
/// past `stage2_top_k` keeps its fused ordering and is appended unscored.
pub async fn cross_encode(
    scorer: &dyn PairwiseScorer,
    cache: &ScoreCache,
    query: &str,
    mut candidates: Vec<Candidate>,
    tuning: &PipelineTuning,
) -> (Vec<Candidate>, RerankStats) {
    let mut stats = RerankStats::default();
    let head_len = tuning.stage2_top_k.min(candidates.len());
    if head_len == 0 {
        return (candidates, stats);
    }

    let tail = candidates.split_off(head_len);
    let mut head = candidates;
    let timeout = Duration::from_millis(tuning.service_timeout_ms);
    let blend = tuning.rerank_blend_weight;

    for candidate in &mut head {
        let key = pair_key(query, &candidate.chunk.text);
        let normalized = if let Some(cached) = cache.get(&key) {
            stats.cache_hits += 1;
            Some(cached)
        } else {
            match tokio::time::timeout(timeout, scorer.score(query, &candidate.chunk.text)).await {
                Ok(Ok(raw)) => {
                    let value = squash(raw);
                    cache.put(key, value);
                    stats.scored += 1;
                    Some(value)
                }
                Ok(Err(error)) => {
                    warn!(%error, "cross-encoder failed for pair, keeping fused score");
                    None
                }
                Err(_) => {
                    warn!("cross-encoder timed out for pair, keeping fused score");
                    None
                }
            }
        };

        candidate.rerank = Some(match normalized {
            Some(score) if tuning.rerank_scores_only => score,
            Some(score) => clamp_unit(candidate.fused.mul_add(1.0 - blend, score * blend)),
            None => {
                stats.fallbacks += 1;
                candidate.fused
            }
        });
    }

    crate::scoring::sort_by_rank_desc(&mut head);
    head.extend(tail);
    (head, stats)
}
