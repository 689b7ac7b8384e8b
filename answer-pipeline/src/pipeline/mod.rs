pub mod config;
pub mod diagnostics;
pub mod stages;

pub use config::{PipelineConfig, PipelineTuning};
pub use diagnostics::{DedupStats, MmrStats, PipelineDiagnostics};

use async_trait::async_trait;
use common::error::AppError;
use std::time::Duration;

use crate::answer::AnswerResult;
use stages::PipelineContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Rewrite,
    Embed,
    Retrieve,
    Dedup,
    MmrRerank,
    CrossEncode,
    Compact,
    Resolve,
}

#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn kind(&self) -> StageKind;
    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError>;
}

pub type BoxedStage = Box<dyn PipelineStage>;

#[derive(Debug, Default, Clone)]
pub struct PipelineStageTimings {
    timings: Vec<(StageKind, Duration)>,
}

impl PipelineStageTimings {
    pub fn record(&mut self, kind: StageKind, duration: Duration) {
        self.timings.push((kind, duration));
    }

    pub fn into_vec(self) -> Vec<(StageKind, Duration)> {
        self.timings
    }

    fn get_stage_ms(&self, kind: StageKind) -> u128 {
        self.timings
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, d)| d.as_millis())
            .unwrap_or(0)
    }

    pub fn retrieve_ms(&self) -> u128 {
        self.get_stage_ms(StageKind::Retrieve)
    }

    pub fn cross_encode_ms(&self) -> u128 {
        self.get_stage_ms(StageKind::CrossEncode)
    }

    pub fn resolve_ms(&self) -> u128 {
        self.get_stage_ms(StageKind::Resolve)
    }
}

/// Final product of a pipeline run: the answer or abstention, plus the
/// diagnostics and timings gathered along the way.
#[derive(Debug)]
pub struct AnswerOutcome {
    pub result: AnswerResult,
    pub diagnostics: PipelineDiagnostics,
    pub stage_timings: PipelineStageTimings,
}

/// The canonical stage sequence.
pub fn default_stages() -> Vec<BoxedStage> {
    vec![
        Box::new(stages::RewriteStage),
        Box::new(stages::EmbedStage),
        Box::new(stages::RetrieveStage),
        Box::new(stages::DedupStage),
        Box::new(stages::MmrRerankStage),
        Box::new(stages::CrossEncodeStage),
        Box::new(stages::CompactStage),
        Box::new(stages::ResolveStage),
    ]
}
