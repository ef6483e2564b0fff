//! Core data models used throughout Finance RAG.
//!
//! These types represent the documents, chunks, retrieved passages, and
//! responses that flow through the ingestion → retrieval → synthesis
//! pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::BackendError;

/// An uploaded document after text extraction.
///
/// Documents are transient: only the chunks derived from them are
/// persisted in the vector index.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub text: String,
    pub uploaded_at: DateTime<Utc>,
}

impl Document {
    pub fn new(filename: impl Into<String>, text: impl Into<String>) -> Self {
        Self::with_timestamp(filename, text, Utc::now())
    }

    pub fn with_timestamp(
        filename: impl Into<String>,
        text: impl Into<String>,
        uploaded_at: DateTime<Utc>,
    ) -> Self {
        let filename = filename.into();
        let text = text.into();
        Self {
            id: document_id(&filename, text.as_bytes()),
            filename,
            text,
            uploaded_at,
        }
    }
}

/// Derive a stable document identifier from the filename and raw content.
///
/// Re-uploading the same file yields the same identifier, so its chunks
/// replace the previous copies instead of duplicating them.
pub fn document_id(filename: &str, content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(filename.as_bytes());
    hasher.update([0u8]);
    hasher.update(content);
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// Metadata carried with every chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Original filename of the parent document.
    pub source: String,
    /// Character offset (inclusive) of the chunk in the document text.
    pub char_start: usize,
    /// Character offset (exclusive) of the chunk in the document text.
    pub char_end: usize,
    pub uploaded_at: DateTime<Utc>,
}

/// A retrievable segment of a document plus its embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable identifier: `<document_id>:<chunk_index>`.
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 of `text`.
    pub hash: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn source(&self) -> &str {
        &self.metadata.source
    }
}

/// Relevance band of a retrieved passage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relevance {
    High,
    Medium,
    Low,
}

impl Relevance {
    /// Band a normalized similarity score.
    ///
    /// The thresholds correspond to cosine distances of 0.6 and 1.0.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.7 {
            Relevance::High
        } else if score >= 0.5 {
            Relevance::Medium
        } else {
            Relevance::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Relevance::High => "high",
            Relevance::Medium => "medium",
            Relevance::Low => "low",
        }
    }
}

/// A chunk retrieved for a query, with its score and prompt label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub chunk: Chunk,
    /// Normalized similarity in `[0, 1]`; higher is more relevant.
    pub score: f64,
    /// 1-based rank.
    pub rank: usize,
    /// Prompt label, `P{rank}`.
    pub label: String,
    pub relevance: Relevance,
}

impl RetrievedPassage {
    pub fn new(chunk: Chunk, score: f64, rank: usize) -> Self {
        Self {
            chunk,
            score,
            rank,
            label: format!("P{}", rank),
            relevance: Relevance::from_score(score),
        }
    }

    /// Assign consecutive 1-based ranks and labels in the current order.
    pub fn relabel(passages: &mut [RetrievedPassage]) {
        for (i, p) in passages.iter_mut().enumerate() {
            p.rank = i + 1;
            p.label = format!("P{}", i + 1);
            p.relevance = Relevance::from_score(p.score);
        }
    }
}

/// How a backend's raw output was interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Json,
    Markdown,
    PlainText,
}

/// One backend's normalized answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesizedAnswer {
    pub answer: String,
    pub key_points: Vec<String>,
    pub next_steps: Vec<String>,
    pub citations: Vec<RetrievedPassage>,
    pub format: OutputFormat,
    pub raw_output: String,
}

/// Result of one backend for one query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Answered(SynthesizedAnswer),
    Failed(BackendError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendOutcome {
    /// Backend identifier (`"hosted"`, `"local"`).
    pub backend: String,
    pub model: String,
    pub elapsed_ms: u64,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl BackendOutcome {
    pub fn answer(&self) -> Option<&SynthesizedAnswer> {
        match &self.outcome {
            Outcome::Answered(a) => Some(a),
            Outcome::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&BackendError> {
        match &self.outcome {
            Outcome::Answered(_) => None,
            Outcome::Failed(e) => Some(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// Every requested backend answered.
    Complete,
    /// At least one backend answered and at least one failed.
    Partial,
    /// Every requested backend failed.
    Failed,
    /// Retrieval found nothing; no backend was called.
    NoContext,
}

/// Merged response to a user question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub query: String,
    pub status: ResponseStatus,
    /// Answer of the primary backend (first successful in request order).
    pub answer: String,
    pub key_points: Vec<String>,
    pub next_steps: Vec<String>,
    pub citations: Vec<RetrievedPassage>,
    /// Backends whose answer is present, in request order.
    pub produced_by: Vec<String>,
    pub backends: Vec<BackendOutcome>,
    /// Number of retrieved passages handed to the synthesizer.
    pub passages_considered: usize,
}

/// Fresh identifier for a [`ChatResponse`].
pub fn new_response_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Per-document failure recorded by the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestFailure {
    /// Absent when the file was rejected before its content was read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    pub filename: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestedDocument {
    pub document_id: String,
    pub filename: String,
    pub chunks: usize,
}

/// Outcome of one ingestion batch, in original batch order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub processed: usize,
    pub failed: Vec<IngestFailure>,
    pub total_chunks: usize,
    pub documents: Vec<IngestedDocument>,
}
