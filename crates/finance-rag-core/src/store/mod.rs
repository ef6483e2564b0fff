//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait defines the storage operations needed by
//! ingestion and retrieval, enabling pluggable backends (SQLite in the app
//! crate, [`memory::InMemoryIndex`] here).
//!
//! Implementations must be `Send + Sync` and allow concurrent readers and
//! writers. Every [`insert`](VectorIndex::insert) call is atomic: either all
//! of its chunks become visible or none do.

pub mod memory;

use async_trait::async_trait;
use std::cmp::Ordering;

use crate::error::{RagError, Result};
use crate::models::Chunk;

/// Parameters of a similarity query.
#[derive(Debug, Clone, Default)]
pub struct IndexQuery {
    pub embedding: Vec<f32>,
    pub top_k: usize,
    /// Restrict results to one collection.
    pub collection: Option<String>,
    /// Restrict results to one source filename.
    pub source: Option<String>,
}

/// A chunk returned by a query with its normalized similarity in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f64,
}

/// A scored chunk tagged with its insertion sequence, used for tie-breaking.
#[derive(Debug, Clone)]
pub struct IndexCandidate {
    pub seq: u64,
    pub chunk: Chunk,
    pub score: f64,
}

/// Sort candidates by descending score, ties broken by insertion order,
/// and keep the first `top_k`.
pub fn rank_candidates(mut candidates: Vec<IndexCandidate>, top_k: usize) -> Vec<ScoredChunk> {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(a.seq.cmp(&b.seq))
    });
    candidates.truncate(top_k);
    candidates
        .into_iter()
        .map(|c| ScoredChunk {
            chunk: c.chunk,
            score: c.score,
        })
        .collect()
}

/// Reject a batch whose chunks lack embeddings or disagree on dimensionality.
pub fn validate_batch(chunks: &[Chunk]) -> Result<()> {
    let Some(first) = chunks.first() else {
        return Ok(());
    };
    let dims = first.embedding.len();
    for c in chunks {
        if c.embedding.is_empty() {
            return Err(RagError::InvalidArgument(format!(
                "chunk {} has no embedding",
                c.id
            )));
        }
        if c.embedding.len() != dims {
            return Err(RagError::InvalidArgument(format!(
                "chunk {} has {} dims, expected {}",
                c.id,
                c.embedding.len(),
                dims
            )));
        }
    }
    Ok(())
}

/// Abstract vector store.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert`](VectorIndex::insert) | Atomically replace each document's chunks |
/// | [`query`](VectorIndex::query) | Top-k cosine similarity search |
/// | [`count`](VectorIndex::count) | Number of stored chunks |
/// | [`document_count`](VectorIndex::document_count) | Number of distinct documents |
/// | [`collections`](VectorIndex::collections) | Names of non-empty collections |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert chunks into `collection`.
    ///
    /// Re-inserting an existing chunk id replaces its content and keeps
    /// its original insertion position. Each document in the batch ends up
    /// with exactly the chunks given here; its other chunks are removed in
    /// the same atomic step. Every chunk must carry an embedding.
    async fn insert(&self, collection: &str, chunks: &[Chunk]) -> Result<()>;

    /// Return up to `top_k` chunks sorted by descending similarity, ties
    /// broken by insertion order (earlier first).
    async fn query(&self, query: &IndexQuery) -> Result<Vec<ScoredChunk>>;

    async fn count(&self) -> Result<usize>;

    async fn document_count(&self) -> Result<usize>;

    async fn collections(&self) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    fn candidate(id: &str, seq: u64, score: f64) -> IndexCandidate {
        IndexCandidate {
            seq,
            score,
            chunk: Chunk {
                id: id.to_string(),
                document_id: "d".to_string(),
                chunk_index: 0,
                text: String::new(),
                hash: String::new(),
                embedding: Vec::new(),
                metadata: ChunkMetadata {
                    source: "s".to_string(),
                    char_start: 0,
                    char_end: 0,
                    uploaded_at: chrono::Utc::now(),
                },
            },
        }
    }

    #[test]
    fn test_rank_candidates_orders_by_score_then_seq() {
        let ranked = rank_candidates(
            vec![
                candidate("late-tie", 5, 0.8),
                candidate("best", 9, 0.9),
                candidate("early-tie", 1, 0.8),
                candidate("worst", 0, 0.1),
            ],
            3,
        );
        let ids: Vec<&str> = ranked.iter().map(|c| c.chunk.id.as_str()).collect();
        assert_eq!(ids, ["best", "early-tie", "late-tie"]);
    }
}
