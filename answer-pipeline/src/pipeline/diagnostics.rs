//! Per-request diagnostics, always collected and attached to the outcome
//! so a surprising answer or abstention can be explained after the fact.

use serde::Serialize;

use crate::answer::GateTraceEntry;
use crate::compaction::CompactionStats;
use crate::reranking::RerankStats;
use crate::retrieval::RetrievalStats;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DedupStats {
    pub before: usize,
    pub after: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MmrStats {
    pub before: usize,
    pub after: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineDiagnostics {
    /// Caller-supplied tag correlating this request in logs.
    pub tag: Option<String>,
    pub retrieval: Option<RetrievalStats>,
    pub dedup: Option<DedupStats>,
    pub mmr: Option<MmrStats>,
    pub rerank: Option<RerankStats>,
    pub compaction: Option<CompactionStats>,
    pub gate_trace: Vec<GateTraceEntry>,
}

impl PipelineDiagnostics {
    pub fn tagged(tag: Option<String>) -> Self {
        Self {
            tag,
            ..Self::default()
        }
    }
}
