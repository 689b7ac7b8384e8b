//! Narrow interfaces over the external collaborators the pipeline consumes:
//! the lexical index, the vector index, embedding generation, chat-model
//! inference, pairwise relevance scoring, and the document/chunk store.
//!
//! None of these are implemented here beyond thin client adapters; the
//! indices and models live in external services.

pub mod embedding;
pub mod openai;

use async_trait::async_trait;

use crate::{
    error::AppError,
    types::{CorpusChunk, HealthStatus},
};

/// A ranked hit returned by either retrieval index.
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub chunk_id: String,
    pub score: f32,
}

/// Keyword-based search over the corpus.
#[async_trait]
pub trait LexicalIndex: Send + Sync {
    async fn search(&self, query: &str, take: usize) -> Result<Vec<IndexHit>, AppError>;
}

/// Nearest-neighbour search over embedded chunks.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(&self, embedding: &[f32], take: usize) -> Result<Vec<IndexHit>, AppError>;
}

/// Text-to-vector embedding generation.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError>;
}

/// Chat-model inference used for answer generation and answerability
/// classification. Implementations return the raw model text; parsing is
/// the caller's concern.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_message: &str) -> Result<String, AppError>;
}

/// Cross-encoder style pairwise relevance scoring of (query, document).
#[async_trait]
pub trait PairwiseScorer: Send + Sync {
    async fn score(&self, query: &str, document: &str) -> Result<f32, AppError>;
}

/// Read access to the chunk store backing both indices.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Hydrate index hits into full chunks. Unknown ids are skipped.
    async fn fetch_chunks(&self, chunk_ids: &[String]) -> Result<Vec<CorpusChunk>, AppError>;

    /// All chunks belonging to one source document, in document order.
    async fn chunks_for_document(&self, file_path: &str) -> Result<Vec<CorpusChunk>, AppError>;

    async fn health(&self) -> Result<HealthStatus, AppError>;
}
