use serde::{Deserialize, Serialize};

/// Structural classification assigned when a document is windowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    CodeFunction,
    CodeClass,
    #[default]
    Prose,
}

/// A chunk of corpus text as served by the external document store.
///
/// Identity is the `(chunk_id, file_path)` pair; the same chunk id may
/// legitimately recur across files after a corpus re-index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusChunk {
    pub chunk_id: String,
    pub file_path: String,
    pub text: String,
    #[serde(default)]
    pub kind: ChunkKind,
    /// False when the source unit was hard-split because it exceeded the
    /// window size on its own.
    #[serde(default = "default_complete")]
    pub complete: bool,
    /// Groups adjacent windows of one structural unit for later stitching.
    #[serde(default)]
    pub stitching_key: Option<String>,
}

const fn default_complete() -> bool {
    true
}

impl CorpusChunk {
    pub fn new(chunk_id: impl Into<String>, file_path: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            file_path: file_path.into(),
            text: text.into(),
            kind: ChunkKind::default(),
            complete: true,
            stitching_key: None,
        }
    }
}

/// Health report from the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unavailable,
}
