//! In-memory [`VectorIndex`] implementation for tests and ephemeral use.
//!
//! Uses a `HashMap` behind `std::sync::RwLock`. Each insert takes the write
//! lock once, so a batch (including the removal of a document's stale
//! chunks) becomes visible atomically. Search is brute-force
//! cosine similarity over all stored vectors.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::relevance_score;
use crate::error::{RagError, Result};
use crate::models::Chunk;

use super::{
    rank_candidates, validate_batch, IndexCandidate, IndexQuery, ScoredChunk, VectorIndex,
};

struct StoredChunk {
    seq: u64,
    collection: String,
    chunk: Chunk,
}

#[derive(Default)]
struct State {
    next_seq: u64,
    chunks: HashMap<String, StoredChunk>,
}

/// In-memory vector index.
#[derive(Default)]
pub struct InMemoryIndex {
    state: RwLock<State>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| RagError::IndexUnavailable("in-memory index lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| RagError::IndexUnavailable("in-memory index lock poisoned".to_string()))
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn insert(&self, collection: &str, chunks: &[Chunk]) -> Result<()> {
        validate_batch(chunks)?;
        let documents: HashSet<&str> = chunks.iter().map(|c| c.document_id.as_str()).collect();
        let keep: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();

        let mut state = self.write()?;
        state.chunks.retain(|id, sc| {
            !documents.contains(sc.chunk.document_id.as_str()) || keep.contains(id.as_str())
        });
        for c in chunks {
            let seq = match state.chunks.get(&c.id) {
                Some(existing) => existing.seq,
                None => {
                    let seq = state.next_seq;
                    state.next_seq += 1;
                    seq
                }
            };
            state.chunks.insert(
                c.id.clone(),
                StoredChunk {
                    seq,
                    collection: collection.to_string(),
                    chunk: c.clone(),
                },
            );
        }
        Ok(())
    }

    async fn query(&self, query: &IndexQuery) -> Result<Vec<ScoredChunk>> {
        let state = self.read()?;
        let candidates: Vec<IndexCandidate> = state
            .chunks
            .values()
            .filter(|sc| {
                query
                    .collection
                    .as_deref()
                    .map_or(true, |c| c == sc.collection)
            })
            .filter(|sc| {
                query
                    .source
                    .as_deref()
                    .map_or(true, |s| s == sc.chunk.metadata.source)
            })
            .map(|sc| IndexCandidate {
                seq: sc.seq,
                score: relevance_score(&query.embedding, &sc.chunk.embedding),
                chunk: sc.chunk.clone(),
            })
            .collect();
        Ok(rank_candidates(candidates, query.top_k))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read()?.chunks.len())
    }

    async fn document_count(&self) -> Result<usize> {
        let state = self.read()?;
        let docs: HashSet<&str> = state
            .chunks
            .values()
            .map(|sc| sc.chunk.document_id.as_str())
            .collect();
        Ok(docs.len())
    }

    async fn collections(&self) -> Result<Vec<String>> {
        let state = self.read()?;
        let names: BTreeSet<&str> = state
            .chunks
            .values()
            .map(|sc| sc.collection.as_str())
            .collect();
        Ok(names.into_iter().map(str::to_string).collect())
    }
}
