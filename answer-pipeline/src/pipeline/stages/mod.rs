//! The stages of the answer pipeline and the context they share. Each
//! stage reads and writes the context; external failures are absorbed
//! upstream so the run degrades instead of aborting.

use std::time::Duration;

use async_trait::async_trait;
use common::error::AppError;
use tracing::{debug, warn};

use crate::answer::resolve_answer;
use crate::compaction::{compact_context, ContextBundle};
use crate::dedup::{strategy_for, suppress_near_duplicates};
use crate::query::{rewrite_question, QueryVariants};
use crate::reranking::{apply_per_file_cap, cross_encode, mmr_rerank, ScoreCache};
use crate::retrieval::retrieve_candidates;
use crate::scoring::{sort_by_fused_desc, Candidate};
use crate::{AnswerResult, PipelineServices};

use super::config::PipelineTuning;
use super::diagnostics::{DedupStats, MmrStats, PipelineDiagnostics};
use super::{PipelineStage, PipelineStageTimings, StageKind};

pub struct PipelineContext<'a> {
    pub services: &'a PipelineServices,
    pub tuning: &'a PipelineTuning,
    pub score_cache: &'a ScoreCache,
    pub question: String,

    pub variants: Option<QueryVariants>,
    pub query_embedding: Option<Vec<f32>>,
    pub shortlist: Vec<Candidate>,
    pub context_bundle: Option<ContextBundle>,
    pub result: Option<AnswerResult>,

    pub diagnostics: PipelineDiagnostics,
    pub stage_timings: PipelineStageTimings,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        services: &'a PipelineServices,
        tuning: &'a PipelineTuning,
        score_cache: &'a ScoreCache,
        question: String,
        tag: Option<String>,
    ) -> Self {
        Self {
            services,
            tuning,
            score_cache,
            question,
            variants: None,
            query_embedding: None,
            shortlist: Vec::new(),
            context_bundle: None,
            result: None,
            diagnostics: PipelineDiagnostics::tagged(tag),
            stage_timings: PipelineStageTimings::default(),
        }
    }

    pub fn with_embedding(
        services: &'a PipelineServices,
        tuning: &'a PipelineTuning,
        score_cache: &'a ScoreCache,
        question: String,
        tag: Option<String>,
        embedding: Vec<f32>,
    ) -> Self {
        let mut ctx = Self::new(services, tuning, score_cache, question, tag);
        ctx.query_embedding = Some(embedding);
        ctx
    }

    fn variants(&self) -> Result<&QueryVariants, AppError> {
        self.variants
            .as_ref()
            .ok_or_else(|| AppError::InternalError("query variants not yet computed".into()))
    }
}

pub struct RewriteStage;

#[async_trait]
impl PipelineStage for RewriteStage {
    fn kind(&self) -> StageKind {
        StageKind::Rewrite
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        ctx.variants = Some(rewrite_question(&ctx.question));
        Ok(())
    }
}

/// Embeds the short query variant unless the caller supplied an embedding.
/// An embedding failure leaves the vector empty and the dense channel
/// silently out of the race.
pub struct EmbedStage;

#[async_trait]
impl PipelineStage for EmbedStage {
    fn kind(&self) -> StageKind {
        StageKind::Embed
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        if ctx.query_embedding.is_some() {
            return Ok(());
        }
        let variants = ctx.variants()?;
        let text = if variants.short.is_empty() {
            variants.raw.as_str()
        } else {
            variants.short.as_str()
        };
        let timeout = Duration::from_millis(ctx.tuning.service_timeout_ms);
        let embedding =
            match tokio::time::timeout(timeout, ctx.services.embedder.embed(text)).await {
                Ok(Ok(vector)) => vector,
                Ok(Err(error)) => {
                    warn!(%error, "query embedding failed, dense channel disabled");
                    Vec::new()
                }
                Err(_) => {
                    warn!("query embedding timed out, dense channel disabled");
                    Vec::new()
                }
            };
        ctx.query_embedding = Some(embedding);
        Ok(())
    }
}

pub struct RetrieveStage;

#[async_trait]
impl PipelineStage for RetrieveStage {
    fn kind(&self) -> StageKind {
        StageKind::Retrieve
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        let variants = ctx.variants()?.clone();
        let embedding = ctx.query_embedding.clone().unwrap_or_default();

        let (shortlist, stats) = retrieve_candidates(
            ctx.services.lexical.as_ref(),
            ctx.services.dense.as_ref(),
            ctx.services.store.as_ref(),
            &variants,
            &embedding,
            ctx.tuning,
        )
        .await;

        debug!(
            shortlisted = stats.shortlisted,
            hint_chunks = stats.hint_chunks,
            "retrieval complete"
        );
        ctx.diagnostics.retrieval = Some(stats);
        ctx.shortlist = shortlist;
        Ok(())
    }
}

pub struct DedupStage;

#[async_trait]
impl PipelineStage for DedupStage {
    fn kind(&self) -> StageKind {
        StageKind::Dedup
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        if !ctx.tuning.dedup_enabled {
            return Ok(());
        }
        let before = ctx.shortlist.len();
        let strategy = strategy_for(ctx.tuning.dedup_method);
        let shortlist = std::mem::take(&mut ctx.shortlist);
        ctx.shortlist =
            suppress_near_duplicates(shortlist, strategy.as_ref(), ctx.tuning.dedup_threshold);
        ctx.diagnostics.dedup = Some(DedupStats {
            before,
            after: ctx.shortlist.len(),
        });
        Ok(())
    }
}

pub struct MmrRerankStage;

#[async_trait]
impl PipelineStage for MmrRerankStage {
    fn kind(&self) -> StageKind {
        StageKind::MmrRerank
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        let mut shortlist = std::mem::take(&mut ctx.shortlist);
        let before = shortlist.len();
        sort_by_fused_desc(&mut shortlist);
        let ranked = mmr_rerank(shortlist, &ctx.tuning.mmr_params());
        ctx.shortlist = apply_per_file_cap(ranked, ctx.tuning.per_file_cap);
        ctx.diagnostics.mmr = Some(MmrStats {
            before,
            after: ctx.shortlist.len(),
        });
        Ok(())
    }
}

pub struct CrossEncodeStage;

#[async_trait]
impl PipelineStage for CrossEncodeStage {
    fn kind(&self) -> StageKind {
        StageKind::CrossEncode
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        if !ctx.tuning.enable_reranking {
            return Ok(());
        }
        let Some(scorer) = &ctx.services.scorer else {
            return Ok(());
        };
        let shortlist = std::mem::take(&mut ctx.shortlist);
        let (ranked, stats) = cross_encode(
            scorer.as_ref(),
            ctx.score_cache,
            &ctx.question,
            shortlist,
            ctx.tuning,
        )
        .await;
        ctx.diagnostics.rerank = Some(stats);
        ctx.shortlist = ranked;
        Ok(())
    }
}

pub struct CompactStage;

#[async_trait]
impl PipelineStage for CompactStage {
    fn kind(&self) -> StageKind {
        StageKind::Compact
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        let (bundle, stats) = compact_context(
            &ctx.shortlist,
            ctx.tuning.context_token_budget,
            ctx.tuning.compact_context,
            ctx.tuning.avg_chars_per_token,
        );
        ctx.diagnostics.compaction = Some(stats);
        ctx.context_bundle = Some(bundle);
        Ok(())
    }
}

pub struct ResolveStage;

#[async_trait]
impl PipelineStage for ResolveStage {
    fn kind(&self) -> StageKind {
        StageKind::Resolve
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        let bundle = ctx
            .context_bundle
            .as_ref()
            .ok_or_else(|| AppError::InternalError("context bundle not yet assembled".into()))?;
        let settings = ctx.tuning.gate_settings();
        let (result, trace) = resolve_answer(
            ctx.services.chat.as_ref(),
            &ctx.question,
            bundle,
            &settings,
        )
        .await;
        ctx.diagnostics.gate_trace = trace;
        ctx.result = Some(result);
        Ok(())
    }
}
