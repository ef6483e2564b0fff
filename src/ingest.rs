//! Ingestion pipeline.
//!
//! Each upload goes through extract → chunk → embed → insert on its own.
//! Up to `ingest.workers` documents are in flight at once; results are
//! reported in the original upload order. A failing document is recorded
//! in [`IngestReport::failed`] and the rest of the batch continues, except
//! for [`RagError::IndexUnavailable`], which aborts the whole call.
//!
//! [`scan_paths`] turns files and directories on disk into uploads.

use anyhow::bail;
use futures::stream::{self, StreamExt};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::PathBuf;
use std::sync::Arc;
use walkdir::WalkDir;

use finance_rag_core::chunk::Chunker;
use finance_rag_core::embedding::Embedder;
use finance_rag_core::models::{
    document_id, Document, IngestFailure, IngestReport, IngestedDocument,
};
use finance_rag_core::store::VectorIndex;
use finance_rag_core::{RagError, Result};

use crate::config::IngestConfig;
use crate::extract::{PlainTextExtractor, TextExtractor};

#[derive(Debug, Clone)]
pub enum UploadContent {
    Text(String),
    Bytes(Vec<u8>),
}

/// One document handed to the pipeline.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub content: UploadContent,
}

impl Upload {
    pub fn text(filename: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            content: UploadContent::Text(text.into()),
        }
    }

    pub fn bytes(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content: UploadContent::Bytes(bytes),
        }
    }

    fn raw(&self) -> &[u8] {
        match &self.content {
            UploadContent::Text(t) => t.as_bytes(),
            UploadContent::Bytes(b) => b,
        }
    }
}

pub struct IngestPipeline {
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    extractor: Arc<dyn TextExtractor>,
    collection: String,
    batch_size: usize,
    workers: usize,
}

impl IngestPipeline {
    pub fn new(
        chunker: Chunker,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            chunker,
            embedder,
            index,
            extractor: Arc::new(PlainTextExtractor),
            collection: collection.into(),
            batch_size: 64,
            workers: 4,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Ingest a batch of uploads.
    pub async fn ingest(&self, uploads: Vec<Upload>) -> Result<IngestReport> {
        let total = uploads.len();
        tracing::info!(documents = total, workers = self.workers, "ingest started");

        let mut results = stream::iter(uploads)
            .map(|upload| self.ingest_one(upload))
            .buffered(self.workers);

        let mut report = IngestReport::default();
        while let Some((doc_id, filename, result)) = results.next().await {
            match result {
                Ok(chunks) => {
                    report.processed += 1;
                    report.total_chunks += chunks;
                    report.documents.push(IngestedDocument {
                        document_id: doc_id,
                        filename,
                        chunks,
                    });
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(error = %e, "index unavailable; aborting ingest");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(%filename, error = %e, "document failed to ingest");
                    let reason = match e {
                        RagError::IngestItem { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    report.failed.push(IngestFailure {
                        document_id: Some(doc_id),
                        filename,
                        reason,
                    });
                }
            }
        }

        tracing::info!(
            processed = report.processed,
            failed = report.failed.len(),
            chunks = report.total_chunks,
            "ingest finished"
        );
        Ok(report)
    }

    async fn ingest_one(&self, upload: Upload) -> (String, String, Result<usize>) {
        let fallback_id = document_id(&upload.filename, upload.raw());
        let filename = upload.filename.clone();

        let text = match upload.content {
            UploadContent::Text(text) if !text.trim().is_empty() => text,
            UploadContent::Text(_) => {
                let err = item_error(&fallback_id, "document contains no text");
                return (fallback_id, filename, Err(err));
            }
            UploadContent::Bytes(bytes) => match self.extractor.extract(&filename, &bytes) {
                Ok(text) => text,
                Err(e) => {
                    let err = item_error(&fallback_id, e.to_string());
                    return (fallback_id, filename, Err(err));
                }
            },
        };

        let doc = Document::new(filename.clone(), text);
        let result = self.index_document(&doc).await;
        (doc.id, filename, result)
    }

    async fn index_document(&self, doc: &Document) -> Result<usize> {
        let mut chunks = self.chunker.chunk_document(doc);
        if chunks.is_empty() {
            return Err(item_error(&doc.id, "document produced no chunks"));
        }

        for batch in chunks.chunks_mut(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed(&texts).await.map_err(|e| match e {
                RagError::IndexUnavailable(_) => e,
                other => item_error(&doc.id, other.to_string()),
            })?;
            if vectors.len() != batch.len() {
                return Err(item_error(
                    &doc.id,
                    format!(
                        "embedder returned {} vectors for {} chunks",
                        vectors.len(),
                        batch.len()
                    ),
                ));
            }
            for (chunk, vector) in batch.iter_mut().zip(vectors) {
                chunk.embedding = vector;
            }
        }

        self.index
            .insert(&self.collection, &chunks)
            .await
            .map_err(|e| match e {
                RagError::IndexUnavailable(_) => e,
                other => item_error(&doc.id, other.to_string()),
            })?;

        tracing::debug!(
            document_id = %doc.id,
            source = %doc.filename,
            chunks = chunks.len(),
            "document indexed"
        );
        Ok(chunks.len())
    }
}

fn item_error(document_id: &str, reason: impl Into<String>) -> RagError {
    RagError::IngestItem {
        document_id: document_id.to_string(),
        reason: reason.into(),
    }
}

/// Files found on disk, plus the ones skipped before reading.
#[derive(Debug, Default)]
pub struct ScannedPaths {
    pub uploads: Vec<Upload>,
    pub skipped: Vec<IngestFailure>,
}

/// Collect uploads from files and directories.
///
/// Explicit file arguments are always taken. Directories are walked and
/// filtered by `include_globs`/`exclude_globs`, matched against the path
/// relative to the directory. Files larger than `max_file_bytes` are
/// reported as skipped without being read.
pub fn scan_paths(paths: &[PathBuf], config: &IngestConfig) -> anyhow::Result<ScannedPaths> {
    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut scanned = ScannedPaths::default();
    let mut files: Vec<(PathBuf, String)> = Vec::new();

    for root in paths {
        if !root.exists() {
            bail!("Path does not exist: {}", root.display());
        }
        if root.is_file() {
            let name = root
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| root.display().to_string());
            files.push((root.clone(), name));
            continue;
        }

        let mut found = Vec::new();
        for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().replace('\\', "/");

            if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
                continue;
            }
            found.push((path.to_path_buf(), rel_str));
        }
        // Sort for deterministic ordering
        found.sort_by(|a, b| a.1.cmp(&b.1));
        files.extend(found);
    }

    for (path, name) in files {
        let size = std::fs::metadata(&path)?.len();
        if size > config.max_file_bytes {
            scanned.skipped.push(IngestFailure {
                document_id: None,
                filename: name,
                reason: format!("file is {} bytes, limit is {}", size, config.max_file_bytes),
            });
            continue;
        }
        let bytes = std::fs::read(&path)?;
        scanned.uploads.push(Upload::bytes(name, bytes));
    }

    Ok(scanned)
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
