//! Deterministic in-memory stand-ins for the external services, used by
//! pipeline tests. Enabled through the `test-utils` feature.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;

use crate::{
    error::AppError,
    services::{
        ChatModel, DocumentStore, EmbeddingService, IndexHit, LexicalIndex, PairwiseScorer,
        VectorIndex,
    },
    types::{CorpusChunk, HealthStatus},
};

/// Lexical/vector index that always returns the same ranked hits.
#[derive(Debug, Default)]
pub struct StaticIndex {
    pub hits: Vec<IndexHit>,
}

impl StaticIndex {
    pub fn new(hits: Vec<(&str, f32)>) -> Self {
        Self {
            hits: hits
                .into_iter()
                .map(|(id, score)| IndexHit {
                    chunk_id: id.to_owned(),
                    score,
                })
                .collect(),
        }
    }
}

#[async_trait]
impl LexicalIndex for StaticIndex {
    async fn search(&self, _query: &str, take: usize) -> Result<Vec<IndexHit>, AppError> {
        Ok(self.hits.iter().take(take).cloned().collect())
    }
}

#[async_trait]
impl VectorIndex for StaticIndex {
    async fn search(&self, _embedding: &[f32], take: usize) -> Result<Vec<IndexHit>, AppError> {
        Ok(self.hits.iter().take(take).cloned().collect())
    }
}

/// Index that fails every call, for fail-open tests.
#[derive(Debug, Default)]
pub struct FailingIndex;

#[async_trait]
impl LexicalIndex for FailingIndex {
    async fn search(&self, _query: &str, _take: usize) -> Result<Vec<IndexHit>, AppError> {
        Err(AppError::Service("lexical index unavailable".into()))
    }
}

#[async_trait]
impl VectorIndex for FailingIndex {
    async fn search(&self, _embedding: &[f32], _take: usize) -> Result<Vec<IndexHit>, AppError> {
        Err(AppError::Service("vector index unavailable".into()))
    }
}

/// Chat model that replays a fixed queue of responses, then errors.
#[derive(Debug, Default)]
pub struct ScriptedChatModel {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedChatModel {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(str::to_owned).collect()),
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String, AppError> {
        let mut guard = self
            .responses
            .lock()
            .map_err(|_| AppError::InternalError("scripted model poisoned".into()))?;
        guard
            .pop_front()
            .ok_or_else(|| AppError::Service("scripted model exhausted".into()))
    }
}

/// Chat model that fails every call.
#[derive(Debug, Default)]
pub struct FailingChatModel;

#[async_trait]
impl ChatModel for FailingChatModel {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String, AppError> {
        Err(AppError::Service("chat model unavailable".into()))
    }
}

/// Pairwise scorer returning a constant score and counting invocations,
/// so cache behaviour can be asserted.
#[derive(Debug)]
pub struct CountingScorer {
    pub score: f32,
    calls: AtomicUsize,
}

impl CountingScorer {
    pub fn new(score: f32) -> Self {
        Self {
            score,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PairwiseScorer for CountingScorer {
    async fn score(&self, _query: &str, _document: &str) -> Result<f32, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.score)
    }
}

/// Pairwise scorer that fails every call.
#[derive(Debug, Default)]
pub struct FailingScorer;

#[async_trait]
impl PairwiseScorer for FailingScorer {
    async fn score(&self, _query: &str, _document: &str) -> Result<f32, AppError> {
        Err(AppError::Service("pairwise scorer unavailable".into()))
    }
}

/// Document store backed by a fixed chunk list.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    pub chunks: Vec<CorpusChunk>,
}

impl InMemoryStore {
    pub fn new(chunks: Vec<CorpusChunk>) -> Self {
        Self { chunks }
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn fetch_chunks(&self, chunk_ids: &[String]) -> Result<Vec<CorpusChunk>, AppError> {
        Ok(chunk_ids
            .iter()
            .filter_map(|id| {
                self.chunks
                    .iter()
                    .find(|chunk| chunk.chunk_id == *id)
                    .cloned()
            })
            .collect())
    }

    async fn chunks_for_document(&self, file_path: &str) -> Result<Vec<CorpusChunk>, AppError> {
        Ok(self
            .chunks
            .iter()
            .filter(|chunk| chunk.file_path == file_path)
            .cloned()
            .collect())
    }

    async fn health(&self) -> Result<HealthStatus, AppError> {
        Ok(HealthStatus::Healthy)
    }
}

/// Embedder returning a constant vector, for plumbing tests where the
/// direction of the vector does not matter.
#[derive(Debug)]
pub struct FixedEmbedder {
    pub vector: Vec<f32>,
}

impl FixedEmbedder {
    pub fn new(vector: Vec<f32>) -> Self {
        Self { vector }
    }
}

#[async_trait]
impl EmbeddingService for FixedEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, AppError> {
        Ok(self.vector.clone())
    }
}
