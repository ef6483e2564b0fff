//! The assembled question-answering engine.
//!
//! [`RagEngine`] wires the SQLite index, the configured embedder, the
//! retriever, the synthesizer, and the ingestion pipeline together. Every
//! CLI command goes through it; tests build it with
//! [`RagEngine::with_components`] to swap in fakes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use finance_rag_core::backend::{HOSTED, LOCAL};
use finance_rag_core::chunk::Chunker;
use finance_rag_core::embedding::Embedder;
use finance_rag_core::models::{ChatResponse, IngestReport, RetrievedPassage};
use finance_rag_core::retrieve::{RetrievalFilter, Retriever};
use finance_rag_core::store::VectorIndex;
use finance_rag_core::{RagError, Result};

use crate::analyze::{
    analyze_batch, analyze_document, AnalysisFailure, AnalysisInput, AnalysisReport, BatchAnalysis,
};
use crate::backend::BackendRegistry;
use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::extract::{PlainTextExtractor, TextExtractor};
use crate::ingest::{scan_paths, IngestPipeline, Upload};
use crate::migrate;
use crate::sqlite_index::{DocumentSummary, SqliteIndex};
use crate::status::{disabled_status, StatusReport};
use crate::synth::Synthesizer;

pub struct RagEngine {
    config: Config,
    index: Arc<SqliteIndex>,
    retriever: Retriever,
    synthesizer: Synthesizer,
    pipeline: IngestPipeline,
}

impl RagEngine {
    /// Open the database at `[db].path`, creating it if needed, and build
    /// the embedder and backends from config.
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::apply(&pool).await?;
        let index = Arc::new(SqliteIndex::new(pool));
        let embedder = create_embedder(&config.embedding)?;
        let backends = BackendRegistry::from_config(&config.backends)?;
        Ok(Self::with_components(config, index, embedder, backends).await?)
    }

    /// Assemble an engine from prebuilt parts.
    ///
    /// Fails with [`RagError::InvalidConfig`] when the index already holds
    /// vectors from a different embedding model.
    pub async fn with_components(
        config: Config,
        index: Arc<SqliteIndex>,
        embedder: Arc<dyn Embedder>,
        backends: BackendRegistry,
    ) -> Result<Self> {
        if config.embedding.is_enabled() {
            index
                .ensure_embedding_identity(embedder.model_name(), embedder.dims())
                .await?;
        }

        let chunker = Chunker::new(&config.chunking)?;
        let dyn_index: Arc<dyn VectorIndex> = index.clone();

        let retriever = Retriever::new(dyn_index.clone(), embedder.clone())
            .with_recency_weight(config.retrieval.recency_weight);
        let synthesizer = Synthesizer::new(
            backends,
            Duration::from_secs(config.synthesis.backend_timeout_secs),
            config.synthesis.prompt,
        );
        let pipeline = IngestPipeline::new(chunker, embedder, dyn_index, config.db.collection.clone())
            .with_batch_size(config.embedding.batch_size)
            .with_workers(config.ingest.workers);

        tracing::debug!(
            db = %config.db.path.display(),
            backends = ?synthesizer.backends().names(),
            "engine ready"
        );

        Ok(Self {
            config,
            index,
            retriever,
            synthesizer,
            pipeline,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn filter(&self) -> RetrievalFilter {
        RetrievalFilter {
            collection: Some(self.config.db.collection.clone()),
            source: None,
            min_score: self.config.retrieval.min_score,
        }
    }

    /// Retrieve passages for `query` without generating an answer.
    pub async fn search(&self, query: &str, top_k: Option<usize>) -> Result<Vec<RetrievedPassage>> {
        let top_k = top_k.unwrap_or(self.config.retrieval.top_k);
        self.retriever.retrieve(query, top_k, &self.filter()).await
    }

    /// Retrieve, then synthesize an answer with the requested backends.
    pub async fn ask(
        &self,
        query: &str,
        top_k: Option<usize>,
        use_hosted: bool,
        use_local: bool,
    ) -> Result<ChatResponse> {
        if !use_hosted && !use_local {
            return Err(RagError::InvalidArgument(
                "at least one backend must be requested".to_string(),
            ));
        }
        tracing::info!(state = "retrieving", "answering question");
        let passages = self.search(query, top_k).await?;
        self.synthesizer
            .answer(query, &passages, use_hosted, use_local)
            .await
    }

    pub async fn ingest(&self, uploads: Vec<Upload>) -> Result<IngestReport> {
        self.pipeline.ingest(uploads).await
    }

    /// Ingest files and directories from disk. Files skipped during the
    /// scan are listed after the pipeline's own failures.
    pub async fn ingest_paths(&self, paths: &[PathBuf]) -> anyhow::Result<IngestReport> {
        let scanned = scan_paths(paths, &self.config.ingest)?;
        let mut report = self.pipeline.ingest(scanned.uploads).await?;
        report.failed.extend(scanned.skipped);
        Ok(report)
    }

    pub async fn analyze(
        &self,
        filename: &str,
        text: &str,
        use_hosted: bool,
        use_local: bool,
    ) -> Result<AnalysisReport> {
        analyze_document(
            self.synthesizer.backends(),
            self.backend_timeout(),
            filename,
            text,
            &requested_backends(use_hosted, use_local),
        )
        .await
    }

    /// Analyze files from disk, one report per readable text file.
    /// Unreadable or non-text files are listed in `failed`.
    pub async fn analyze_files(
        &self,
        paths: &[PathBuf],
        use_hosted: bool,
        use_local: bool,
    ) -> Result<BatchAnalysis> {
        let extractor = PlainTextExtractor;
        let mut inputs = Vec::with_capacity(paths.len());
        let mut unreadable = Vec::new();
        for path in paths {
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string());
            let extracted = std::fs::read(path)
                .map_err(|e| e.to_string())
                .and_then(|bytes| {
                    let size_bytes = bytes.len() as u64;
                    extractor
                        .extract(&filename, &bytes)
                        .map(|text| (text, size_bytes))
                        .map_err(|e| e.to_string())
                });
            match extracted {
                Ok((text, size_bytes)) => inputs.push(AnalysisInput {
                    filename,
                    text,
                    size_bytes,
                }),
                Err(reason) => unreadable.push(AnalysisFailure { filename, reason }),
            }
        }

        let mut batch = analyze_batch(
            self.synthesizer.backends(),
            self.backend_timeout(),
            inputs,
            &requested_backends(use_hosted, use_local),
        )
        .await?;
        batch.failed.extend(unreadable);
        Ok(batch)
    }

    fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.config.synthesis.backend_timeout_secs)
    }

    pub async fn status(&self) -> Result<StatusReport> {
        let backends = self.synthesizer.backends();
        let hosted = async {
            match backends.get(HOSTED) {
                Some(b) => b.status().await,
                None => disabled_status(HOSTED, &self.config.backends.hosted.model),
            }
        };
        let local = async {
            match backends.get(LOCAL) {
                Some(b) => b.status().await,
                None => disabled_status(LOCAL, &self.config.backends.local.model),
            }
        };
        let (hosted_backend_status, local_backend_status) = tokio::join!(hosted, local);

        let identity = self.index.embedding_identity().await?;
        let db_size_bytes = std::fs::metadata(&self.config.db.path)
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(StatusReport {
            index_document_count: self.index.document_count().await?,
            index_chunk_count: self.index.count().await?,
            collections: self.index.collections().await?,
            embedding_model: identity.as_ref().map(|(m, _)| m.clone()),
            embedding_dims: identity.map(|(_, d)| d),
            db_path: self.config.db.path.display().to_string(),
            db_size_bytes,
            hosted_backend_status,
            local_backend_status,
        })
    }

    pub async fn collections(&self) -> Result<Vec<String>> {
        self.index.collections().await
    }

    pub async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        self.index.list_documents().await
    }

    pub async fn close(self) {
        self.index.pool().close().await;
    }
}

fn requested_backends(use_hosted: bool, use_local: bool) -> Vec<&'static str> {
    let mut names = Vec::with_capacity(2);
    if use_hosted {
        names.push(HOSTED);
    }
    if use_local {
        names.push(LOCAL);
    }
    names
}
