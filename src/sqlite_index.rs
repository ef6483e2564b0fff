//! SQLite-backed [`VectorIndex`].
//!
//! Chunks and their embeddings live in one `chunks` table; similarity is
//! computed in Rust over the decoded BLOBs, the same brute-force scan the
//! in-memory index performs. Each `insert` call runs in one transaction,
//! which also drops any chunks a re-ingested document no longer has.
//!
//! The index remembers the embedding model and dimensionality it was
//! built with (`index_meta`). Opening it with a different embedder fails
//! with [`RagError::InvalidConfig`] instead of silently mixing vector
//! spaces.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashSet};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use finance_rag_core::embedding::{blob_to_vec, relevance_score, vec_to_blob};
use finance_rag_core::models::{Chunk, ChunkMetadata};
use finance_rag_core::store::{
    rank_candidates, validate_batch, IndexCandidate, IndexQuery, ScoredChunk, VectorIndex,
};
use finance_rag_core::{RagError, Result};

const META_MODEL: &str = "embedding_model";
const META_DIMS: &str = "embedding_dims";

/// Per-document summary for listings.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub document_id: String,
    pub source: String,
    pub collection: String,
    pub chunks: i64,
    pub uploaded_at: String,
}

pub struct SqliteIndex {
    pool: SqlitePool,
}

fn unavailable(e: sqlx::Error) -> RagError {
    RagError::IndexUnavailable(e.to_string())
}

fn format_ts_iso(ts_millis: i64) -> String {
    DateTime::from_timestamp_millis(ts_millis)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts_millis.to_string())
}

impl SqliteIndex {
    /// Wrap a pool whose schema has already been migrated.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// The embedding identity recorded for this index, if any.
    pub async fn embedding_identity(&self) -> Result<Option<(String, usize)>> {
        let rows = sqlx::query("SELECT key, value FROM index_meta WHERE key IN (?, ?)")
            .bind(META_MODEL)
            .bind(META_DIMS)
            .fetch_all(&self.pool)
            .await
            .map_err(unavailable)?;

        let mut model = None;
        let mut dims = None;
        for row in &rows {
            let key: String = row.get("key");
            let value: String = row.get("value");
            match key.as_str() {
                META_MODEL => model = Some(value),
                META_DIMS => dims = value.parse::<usize>().ok(),
                _ => {}
            }
        }
        Ok(model.zip(dims))
    }

    /// Record the embedder identity, or verify it matches the recorded one.
    ///
    /// An empty index adopts the new identity.
    pub async fn ensure_embedding_identity(&self, model: &str, dims: usize) -> Result<()> {
        if let Some((stored_model, stored_dims)) = self.embedding_identity().await? {
            if stored_model == model && stored_dims == dims {
                return Ok(());
            }
            if self.count().await? > 0 {
                return Err(RagError::InvalidConfig(format!(
                    "index was built with embedding model '{}' ({} dims) but '{}' ({} dims) is configured; \
                     restore the previous embedding settings or rebuild the index",
                    stored_model, stored_dims, model, dims
                )));
            }
            tracing::info!(
                previous = %stored_model,
                model,
                "empty index adopting new embedding model"
            );
        }

        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        for (key, value) in [(META_MODEL, model.to_string()), (META_DIMS, dims.to_string())] {
            sqlx::query(
                r#"
                INSERT INTO index_meta (key, value) VALUES (?, ?)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value
                "#,
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        }
        tx.commit().await.map_err(unavailable)?;
        Ok(())
    }

    /// One row per indexed document, most recent upload first.
    pub async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT document_id, source, collection,
                   COUNT(*) AS chunks, MAX(uploaded_at) AS uploaded_at
            FROM chunks
            GROUP BY document_id, source, collection
            ORDER BY uploaded_at DESC, source ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(rows
            .iter()
            .map(|row| DocumentSummary {
                document_id: row.get("document_id"),
                source: row.get("source"),
                collection: row.get("collection"),
                chunks: row.get("chunks"),
                uploaded_at: format_ts_iso(row.get("uploaded_at")),
            })
            .collect())
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn insert(&self, collection: &str, chunks: &[Chunk]) -> Result<()> {
        validate_batch(chunks)?;
        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, collection, document_id, chunk_index, source, text, hash,
                                    char_start, char_end, uploaded_at, embedding, dims)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    collection = excluded.collection,
                    document_id = excluded.document_id,
                    chunk_index = excluded.chunk_index,
                    source = excluded.source,
                    text = excluded.text,
                    hash = excluded.hash,
                    char_start = excluded.char_start,
                    char_end = excluded.char_end,
                    uploaded_at = excluded.uploaded_at,
                    embedding = excluded.embedding,
                    dims = excluded.dims
                "#,
            )
            .bind(&chunk.id)
            .bind(collection)
            .bind(&chunk.document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.metadata.source)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(chunk.metadata.char_start as i64)
            .bind(chunk.metadata.char_end as i64)
            .bind(chunk.metadata.uploaded_at.timestamp_millis())
            .bind(vec_to_blob(&chunk.embedding))
            .bind(chunk.embedding.len() as i64)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        }

        // Chunks left over from an earlier chunking of the same document.
        let keep: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        let documents: BTreeSet<&str> = chunks.iter().map(|c| c.document_id.as_str()).collect();
        for document_id in documents {
            let existing: Vec<String> =
                sqlx::query_scalar("SELECT id FROM chunks WHERE document_id = ?")
                    .bind(document_id)
                    .fetch_all(&mut *tx)
                    .await
                    .map_err(unavailable)?;
            for id in existing.iter().filter(|id| !keep.contains(id.as_str())) {
                sqlx::query("DELETE FROM chunks WHERE id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(unavailable)?;
            }
        }

        tx.commit().await.map_err(unavailable)?;
        Ok(())
    }

    async fn query(&self, query: &IndexQuery) -> Result<Vec<ScoredChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT seq, id, document_id, chunk_index, source, text, hash,
                   char_start, char_end, uploaded_at, embedding
            FROM chunks
            WHERE (?1 IS NULL OR collection = ?1)
              AND (?2 IS NULL OR source = ?2)
            "#,
        )
        .bind(query.collection.as_deref())
        .bind(query.source.as_deref())
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        let candidates: Vec<IndexCandidate> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let embedding = blob_to_vec(&blob);
                let score = relevance_score(&query.embedding, &embedding);
                let uploaded_ms: i64 = row.get("uploaded_at");
                let char_start: i64 = row.get("char_start");
                let char_end: i64 = row.get("char_end");
                let seq: i64 = row.get("seq");
                IndexCandidate {
                    seq: seq as u64,
                    score,
                    chunk: Chunk {
                        id: row.get("id"),
                        document_id: row.get("document_id"),
                        chunk_index: row.get("chunk_index"),
                        text: row.get("text"),
                        hash: row.get("hash"),
                        embedding,
                        metadata: ChunkMetadata {
                            source: row.get("source"),
                            char_start: char_start as usize,
                            char_end: char_end as usize,
                            uploaded_at: DateTime::from_timestamp_millis(uploaded_ms)
                                .unwrap_or_else(Utc::now),
                        },
                    },
                }
            })
            .collect();

        Ok(rank_candidates(candidates, query.top_k))
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(n as usize)
    }

    async fn document_count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT document_id) FROM chunks")
            .fetch_one(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(n as usize)
    }

    async fn collections(&self) -> Result<Vec<String>> {
        sqlx::query_scalar("SELECT DISTINCT collection FROM chunks ORDER BY collection")
            .fetch_all(&self.pool)
            .await
            .map_err(unavailable)
    }
}
