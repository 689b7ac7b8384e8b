//! Tuning knobs for the answer pipeline. Everything deserializes from
//! configuration with sensible defaults, and `sanitized` repairs invalid
//! values instead of refusing to start.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::answer::GateSettings;
use crate::chunking::{stitch_windows, window_document, Overlap, StitchedChunk, WindowOptions};
use crate::dedup::DedupMethod;
use crate::reranking::MmrParams;
use crate::scoring::FusionWeights;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineTuning {
    // Windowing.
    pub window_size_tokens: usize,
    pub overlap_pct: u8,
    /// Overrides `overlap_pct` when set.
    pub overlap_tokens: Option<usize>,
    pub preserve_code_units: bool,
    pub enable_stitching: bool,
    pub stitch_max_tokens: usize,

    // Near-duplicate suppression.
    pub dedup_enabled: bool,
    pub dedup_method: DedupMethod,
    pub dedup_threshold: f32,

    // Retrieval and fusion.
    pub stage1_top_k: usize,
    pub lexical_weight: f32,
    pub dense_weight: f32,
    pub metadata_weight: f32,

    // MMR reranking.
    pub mmr_alpha: f32,
    pub mmr_per_file_penalty: f32,
    pub mmr_take: usize,
    pub per_file_cap: usize,

    // Cross-encoder stage.
    pub enable_reranking: bool,
    pub stage2_top_k: usize,
    pub rerank_blend_weight: f32,
    pub rerank_scores_only: bool,
    pub score_cache_capacity: usize,

    // Context assembly.
    pub context_token_budget: usize,
    pub compact_context: bool,
    pub avg_chars_per_token: usize,

    // Answer gates.
    pub abstain_enabled: bool,
    pub rule_extract_enabled: bool,
    pub precheck_enabled: bool,
    pub classify_enabled: bool,
    pub enforce_span_enabled: bool,
    pub precheck_min_overlap: f32,

    // External calls.
    pub service_timeout_ms: u64,
}

impl Default for PipelineTuning {
    fn default() -> Self {
        Self {
            window_size_tokens: 256,
            overlap_pct: 15,
            overlap_tokens: None,
            preserve_code_units: true,
            enable_stitching: true,
            stitch_max_tokens: 1024,
            dedup_enabled: true,
            dedup_method: DedupMethod::default(),
            dedup_threshold: 0.9,
            stage1_top_k: 24,
            lexical_weight: 0.55,
            dense_weight: 0.35,
            metadata_weight: 0.10,
            mmr_alpha: 0.85,
            mmr_per_file_penalty: 0.05,
            mmr_take: 12,
            per_file_cap: 3,
            enable_reranking: true,
            stage2_top_k: 8,
            rerank_blend_weight: 0.65,
            rerank_scores_only: false,
            score_cache_capacity: 4096,
            context_token_budget: 2000,
            compact_context: true,
            avg_chars_per_token: 4,
            abstain_enabled: true,
            rule_extract_enabled: true,
            precheck_enabled: true,
            classify_enabled: true,
            enforce_span_enabled: true,
            precheck_min_overlap: 0.10,
            service_timeout_ms: 10_000,
        }
    }
}

impl PipelineTuning {
    /// Returns a copy with out-of-range values replaced by their defaults.
    /// Fusion weights are renormalized to sum to one.
    pub fn sanitized(&self) -> Self {
        let defaults = Self::default();
        let mut tuning = self.clone();

        if tuning.window_size_tokens == 0 {
            warn!("window_size_tokens must be positive, using default");
            tuning.window_size_tokens = defaults.window_size_tokens;
        }
        if tuning.overlap_pct >= 100 {
            warn!(overlap_pct = tuning.overlap_pct, "overlap_pct out of range, using default");
            tuning.overlap_pct = defaults.overlap_pct;
        }
        if !(0.0..=1.0).contains(&tuning.dedup_threshold) {
            warn!("dedup_threshold out of range, using default");
            tuning.dedup_threshold = defaults.dedup_threshold;
        }
        if tuning.stage1_top_k == 0 {
            warn!("stage1_top_k must be positive, using default");
            tuning.stage1_top_k = defaults.stage1_top_k;
        }
        if !(0.0..=1.0).contains(&tuning.mmr_alpha) {
            warn!("mmr_alpha out of range, using default");
            tuning.mmr_alpha = defaults.mmr_alpha;
        }
        if !(0.0..=1.0).contains(&tuning.rerank_blend_weight) {
            warn!("rerank_blend_weight out of range, using default");
            tuning.rerank_blend_weight = defaults.rerank_blend_weight;
        }
        if !(0.0..=1.0).contains(&tuning.precheck_min_overlap) {
            warn!("precheck_min_overlap out of range, using default");
            tuning.precheck_min_overlap = defaults.precheck_min_overlap;
        }
        if tuning.context_token_budget == 0 {
            warn!("context_token_budget must be positive, using default");
            tuning.context_token_budget = defaults.context_token_budget;
        }
        if tuning.avg_chars_per_token == 0 {
            warn!("avg_chars_per_token must be positive, using default");
            tuning.avg_chars_per_token = defaults.avg_chars_per_token;
        }
        if tuning.score_cache_capacity == 0 {
            warn!("score_cache_capacity must be positive, using default");
            tuning.score_cache_capacity = defaults.score_cache_capacity;
        }
        if tuning.service_timeout_ms == 0 {
            warn!("service_timeout_ms must be positive, using default");
            tuning.service_timeout_ms = defaults.service_timeout_ms;
        }

        let weight_sum = tuning.lexical_weight + tuning.dense_weight + tuning.metadata_weight;
        if !weight_sum.is_finite()
            || weight_sum <= 0.0
            || tuning.lexical_weight < 0.0
            || tuning.dense_weight < 0.0
            || tuning.metadata_weight < 0.0
        {
            warn!("invalid fusion weights, using defaults");
            tuning.lexical_weight = defaults.lexical_weight;
            tuning.dense_weight = defaults.dense_weight;
            tuning.metadata_weight = defaults.metadata_weight;
        } else if (weight_sum - 1.0).abs() > 1e-3 {
            tuning.lexical_weight /= weight_sum;
            tuning.dense_weight /= weight_sum;
            tuning.metadata_weight /= weight_sum;
        }

        tuning
    }

    pub fn fusion_weights(&self) -> FusionWeights {
        FusionWeights {
            lexical: self.lexical_weight,
            dense: self.dense_weight,
            metadata: self.metadata_weight,
        }
    }

    pub fn window_options(&self) -> WindowOptions {
        WindowOptions {
            max_tokens: self.window_size_tokens,
            overlap: match self.overlap_tokens {
                Some(tokens) => Overlap::Tokens(tokens),
                None => Overlap::Percent(self.overlap_pct),
            },
            preserve_units: self.preserve_code_units,
        }
    }

    /// Windows a document and stitches keyed fragments back together.
    /// With stitching disabled every window becomes its own chunk.
    pub fn chunk_document(&self, doc_id: &str, text: &str) -> Vec<StitchedChunk> {
        let windows = window_document(doc_id, text, &self.window_options());
        let max_merged = if self.enable_stitching {
            self.stitch_max_tokens
        } else {
            0
        };
        stitch_windows(text, &windows, max_merged)
    }

    pub fn mmr_params(&self) -> MmrParams {
        MmrParams {
            alpha: self.mmr_alpha,
            per_file_penalty: self.mmr_per_file_penalty,
            take: self.mmr_take,
        }
    }

    /// With abstention disabled, only span bookkeeping gates remain off;
    /// the sentinel reply still abstains.
    pub fn gate_settings(&self) -> GateSettings {
        GateSettings {
            rule_extract_enabled: self.rule_extract_enabled,
            precheck_enabled: self.abstain_enabled && self.precheck_enabled,
            classify_enabled: self.abstain_enabled && self.classify_enabled,
            enforce_span_enabled: self.abstain_enabled && self.enforce_span_enabled,
            precheck_min_overlap: self.precheck_min_overlap,
            service_timeout_ms: self.service_timeout_ms,
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub tuning: PipelineTuning,
}
