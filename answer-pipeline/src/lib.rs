//! Grounded question answering over an indexed corpus: hybrid retrieval,
//! two-stage reranking, context compaction, and span-verified answer
//! extraction with abstention. The pipeline prefers saying nothing over
//! saying something the corpus does not support.

pub mod answer;
pub mod chunking;
pub mod compaction;
pub mod dedup;
pub mod pipeline;
pub mod query;
pub mod reranking;
pub mod retrieval;
pub mod scoring;

pub use answer::{AbstainReason, AnswerResult, IDK_SENTINEL};
pub use chunking::{stitch_windows, window_document, Overlap, StitchedChunk, Window, WindowOptions};
pub use compaction::ContextBundle;
pub use dedup::DedupMethod;
pub use pipeline::{AnswerOutcome, PipelineConfig, PipelineDiagnostics, PipelineTuning, StageKind};
pub use query::{DocumentHint, QueryVariants};
pub use reranking::ScoreCache;
pub use scoring::{Candidate, FusionWeights};

use std::sync::Arc;
use std::time::Instant;

use common::services::{
    ChatModel, DocumentStore, EmbeddingService, LexicalIndex, PairwiseScorer, VectorIndex,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use pipeline::default_stages;
use pipeline::stages::PipelineContext;

/// The external collaborators a pipeline runs against.
#[derive(Clone)]
pub struct PipelineServices {
    pub lexical: Arc<dyn LexicalIndex>,
    pub dense: Arc<dyn VectorIndex>,
    pub embedder: Arc<dyn EmbeddingService>,
    pub chat: Arc<dyn ChatModel>,
    /// Cross-encoder; stage two is skipped when absent.
    pub scorer: Option<Arc<dyn PairwiseScorer>>,
    pub store: Arc<dyn DocumentStore>,
}

pub struct AnswerPipeline {
    services: PipelineServices,
    tuning: PipelineTuning,
    score_cache: Arc<ScoreCache>,
}

impl AnswerPipeline {
    pub fn new(services: PipelineServices, config: PipelineConfig) -> Self {
        let tuning = config.tuning.sanitized();
        let score_cache = Arc::new(ScoreCache::new(tuning.score_cache_capacity));
        Self {
            services,
            tuning,
            score_cache,
        }
    }

    /// Answers a question, or abstains. Never errors: every failure mode
    /// along the way degrades into an abstention with diagnostics.
    #[instrument(skip(self, question), fields(question_chars = question.chars().count()))]
    pub async fn answer(&self, question: &str) -> AnswerOutcome {
        let tag = Uuid::new_v4().to_string();
        let ctx = PipelineContext::new(
            &self.services,
            &self.tuning,
            &self.score_cache,
            question.to_owned(),
            Some(tag),
        );
        self.run(ctx).await
    }

    /// Like [`answer`](Self::answer), with a caller-supplied correlation tag.
    pub async fn answer_tagged(&self, question: &str, tag: &str) -> AnswerOutcome {
        let ctx = PipelineContext::new(
            &self.services,
            &self.tuning,
            &self.score_cache,
            question.to_owned(),
            Some(tag.to_owned()),
        );
        self.run(ctx).await
    }

    /// Runs with a precomputed query embedding, skipping the embed call.
    pub async fn answer_with_embedding(&self, question: &str, embedding: Vec<f32>) -> AnswerOutcome {
        let ctx = PipelineContext::with_embedding(
            &self.services,
            &self.tuning,
            &self.score_cache,
            question.to_owned(),
            Some(Uuid::new_v4().to_string()),
            embedding,
        );
        self.run(ctx).await
    }

    async fn run(&self, mut ctx: PipelineContext<'_>) -> AnswerOutcome {
        let mut failed = false;

        for stage in default_stages() {
            let start = Instant::now();
            if let Err(error) = stage.execute(&mut ctx).await {
                warn!(%error, stage = ?stage.kind(), "pipeline stage failed, abstaining");
                failed = true;
                break;
            }
            ctx.stage_timings.record(stage.kind(), start.elapsed());
        }

        let result = if failed {
            AnswerResult::Abstain {
                reason: AbstainReason::EmptyContext,
            }
        } else {
            ctx.result.take().unwrap_or(AnswerResult::Abstain {
                reason: AbstainReason::EmptyContext,
            })
        };

        info!(
            abstained = result.is_abstention(),
            retrieve_ms = ctx.stage_timings.retrieve_ms(),
            resolve_ms = ctx.stage_timings.resolve_ms(),
            "pipeline run complete"
        );

        AnswerOutcome {
            result,
            diagnostics: ctx.diagnostics,
            stage_timings: ctx.stage_timings,
        }
    }
}

/// One-shot convenience: builds a pipeline and answers a single question.
pub async fn answer_question(
    services: PipelineServices,
    question: &str,
    config: PipelineConfig,
) -> AnswerOutcome {
    AnswerPipeline::new(services, config).answer(question).await
}

/// JSON rendering of an outcome for logging or API responses.
pub fn outcome_to_json(outcome: &AnswerOutcome) -> serde_json::Value {
    let timings: Vec<serde_json::Value> = outcome
        .stage_timings
        .clone()
        .into_vec()
        .into_iter()
        .map(|(kind, duration)| {
            serde_json::json!({
                "stage": format!("{kind:?}"),
                "ms": duration.as_millis() as u64,
            })
        })
        .collect();

    serde_json::json!({
        "result": outcome.result,
        "diagnostics": outcome.diagnostics,
        "stage_timings": timings,
    })
}
