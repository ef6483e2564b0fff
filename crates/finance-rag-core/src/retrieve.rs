//! Query-time retrieval.
//!
//! The [`Retriever`] embeds a question with the shared [`Embedder`], runs a
//! top-k similarity query against the [`VectorIndex`], and turns the hits
//! into ranked, labelled [`RetrievedPassage`]s.
//!
//! Relevance is normalized cosine similarity. An optional recency re-rank
//! ([`rerank_by_recency`]) is a separate stage applied after ranking and is
//! disabled by default.

use std::sync::Arc;

use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::models::RetrievedPassage;
use crate::store::{IndexQuery, VectorIndex};

/// Optional restrictions applied to a retrieval.
#[derive(Debug, Clone, Default)]
pub struct RetrievalFilter {
    pub collection: Option<String>,
    pub source: Option<String>,
    /// Drop passages whose normalized score is below this value.
    pub min_score: Option<f64>,
}

pub struct Retriever {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    recency_weight: f64,
}

impl Retriever {
    pub fn new(index: Arc<dyn VectorIndex>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            index,
            embedder,
            recency_weight: 0.0,
        }
    }

    /// Enable recency re-ranking with `weight` in `[0, 1]`.
    pub fn with_recency_weight(mut self, weight: f64) -> Self {
        self.recency_weight = weight.clamp(0.0, 1.0);
        self
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Retrieve the `top_k` passages most relevant to `query`.
    ///
    /// Returns an empty list when the index is empty. Fails with
    /// [`RagError::InvalidArgument`] for `top_k < 1` or a blank query
    /// before touching the index.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filter: &RetrievalFilter,
    ) -> Result<Vec<RetrievedPassage>> {
        if top_k < 1 {
            return Err(RagError::InvalidArgument("top_k must be >= 1".to_string()));
        }
        if query.trim().is_empty() {
            return Err(RagError::InvalidArgument("query must not be empty".to_string()));
        }

        if self.index.count().await? == 0 {
            tracing::debug!("index is empty; skipping query embedding");
            return Ok(Vec::new());
        }

        let embedding = self.embedder.embed_query(query).await?;
        let hits = self
            .index
            .query(&IndexQuery {
                embedding,
                top_k,
                collection: filter.collection.clone(),
                source: filter.source.clone(),
            })
            .await?;

        let mut passages: Vec<RetrievedPassage> = hits
            .into_iter()
            .filter(|h| filter.min_score.map_or(true, |min| h.score >= min))
            .enumerate()
            .map(|(i, h)| RetrievedPassage::new(h.chunk, h.score, i + 1))
            .collect();

        if self.recency_weight > 0.0 {
            passages = rerank_by_recency(passages, self.recency_weight);
        }

        tracing::debug!(top_k, returned = passages.len(), "retrieval complete");
        Ok(passages)
    }
}

/// Blend relevance with upload recency and re-rank.
///
/// `score' = (1 - weight) * score + weight * recency`, where recency is 1.0
/// for the newest passage in the set and falls linearly to 0.0 for the
/// oldest. Ranks and labels are reassigned; the relevance band still
/// reflects the blended score. Ties keep their previous relative order.
pub fn rerank_by_recency(
    mut passages: Vec<RetrievedPassage>,
    weight: f64,
) -> Vec<RetrievedPassage> {
    let weight = weight.clamp(0.0, 1.0);
    if passages.len() < 2 || weight == 0.0 {
        return passages;
    }

    let stamps: Vec<i64> = passages
        .iter()
        .map(|p| p.chunk.metadata.uploaded_at.timestamp_millis())
        .collect();
    let newest = stamps.iter().copied().max().unwrap_or(0);
    let oldest = stamps.iter().copied().min().unwrap_or(0);
    let span = (newest - oldest) as f64;

    for (p, ts) in passages.iter_mut().zip(stamps) {
        let recency = if span > 0.0 {
            (ts - oldest) as f64 / span
        } else {
            1.0
        };
        p.score = (1.0 - weight) * p.score + weight * recency;
    }

    passages.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    RetrievedPassage::relabel(&mut passages);
    passages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{Chunker, ChunkingConfig};
    use crate::embedding::HashEmbedder;
    use crate::models::Document;
    use crate::store::memory::InMemoryIndex;
    use chrono::{Duration, Utc};

    async fn seeded() -> (Arc<InMemoryIndex>, Arc<HashEmbedder>) {
        let index = Arc::new(InMemoryIndex::new());
        let embedder = Arc::new(HashEmbedder::new(128));
        let chunker = Chunker::new(&ChunkingConfig {
            chunk_size: 200,
            chunk_overlap: 0,
        })
        .unwrap();
        let now = Utc::now();
        let docs = [
            Document::with_timestamp(
                "rates.txt",
                "The bank raised interest rates on savings accounts.",
                now - Duration::days(30),
            ),
            Document::with_timestamp(
                "budget.txt",
                "The household budget covers rent, groceries and utilities.",
                now - Duration::days(10),
            ),
            Document::with_timestamp(
                "tax.txt",
                "Capital gains tax applies when selling shares at a profit.",
                now,
            ),
        ];
        for doc in &docs {
            let mut chunks = chunker.chunk_document(doc);
            for c in &mut chunks {
                c.embedding = embedder.embed_one(&c.text);
            }
            index.insert("default", &chunks).await.unwrap();
        }
        (index, embedder)
    }

    #[tokio::test]
    async fn test_rejects_zero_top_k_and_blank_query() {
        let retriever = Retriever::new(
            Arc::new(InMemoryIndex::new()),
            Arc::new(HashEmbedder::new(8)),
        );
        let f = RetrievalFilter::default();
        assert!(matches!(
            retriever.retrieve("rates", 0, &f).await,
            Err(RagError::InvalidArgument(_))
        ));
        assert!(matches!(
            retriever.retrieve("   ", 3, &f).await,
            Err(RagError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_index_yields_no_passages() {
        let retriever = Retriever::new(
            Arc::new(InMemoryIndex::new()),
            Arc::new(HashEmbedder::new(8)),
        );
        let passages = retriever
            .retrieve("anything", 5, &RetrievalFilter::default())
            .await
            .unwrap();
        assert!(passages.is_empty());
    }

    #[tokio::test]
    async fn test_most_relevant_passage_ranks_first() {
        let (index, embedder) = seeded().await;
        let retriever = Retriever::new(index, embedder);
        let passages = retriever
            .retrieve("interest rates savings", 3, &RetrievalFilter::default())
            .await
            .unwrap();
        assert_eq!(passages.len(), 3);
        assert_eq!(passages[0].chunk.metadata.source, "rates.txt");
        for (i, p) in passages.iter().enumerate() {
            assert_eq!(p.rank, i + 1);
            assert_eq!(p.label, format!("P{}", i + 1));
            assert!((0.0..=1.0).contains(&p.score));
        }
    }

    #[tokio::test]
    async fn test_monotonic_prefix_without_rerank() {
        let (index, embedder) = seeded().await;
        let retriever = Retriever::new(index, embedder);
        let f = RetrievalFilter::default();
        let small = retriever.retrieve("tax on shares", 2, &f).await.unwrap();
        let large = retriever.retrieve("tax on shares", 3, &f).await.unwrap();
        for (a, b) in small.iter().zip(large.iter()) {
            assert_eq!(a.chunk.id, b.chunk.id);
        }
        for pair in large.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_filters_by_source_and_min_score() {
        let (index, embedder) = seeded().await;
        let retriever = Retriever::new(index, embedder);
        let only_tax = RetrievalFilter {
            source: Some("tax.txt".to_string()),
            ..Default::default()
        };
        let passages = retriever.retrieve("rates", 5, &only_tax).await.unwrap();
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].chunk.metadata.source, "tax.txt");

        let strict = RetrievalFilter {
            min_score: Some(1.01),
            ..Default::default()
        };
        assert!(retriever.retrieve("rates", 5, &strict).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_full_recency_weight_orders_newest_first() {
        let (index, embedder) = seeded().await;
        let retriever = Retriever::new(index, embedder).with_recency_weight(1.0);
        let passages = retriever
            .retrieve("interest rates savings", 3, &RetrievalFilter::default())
            .await
            .unwrap();
        let sources: Vec<&str> = passages
            .iter()
            .map(|p| p.chunk.metadata.source.as_str())
            .collect();
        assert_eq!(sources, ["tax.txt", "budget.txt", "rates.txt"]);
        assert_eq!(passages[0].label, "P1");
    }
}
