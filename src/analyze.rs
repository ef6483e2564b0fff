//! Single-document analysis.
//!
//! Asks each requested backend for a structured summary of one document:
//! summary, key topics, document type, confidence, and keywords. Only the
//! first [`ANALYSIS_CHARS`] characters are sent. Backends run concurrently
//! and fail individually, as in answer synthesis.
//!
//! [`analyze_batch`] runs several documents one after another; a document
//! that cannot be analyzed is listed in [`BatchAnalysis::failed`] and the
//! rest continue.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use finance_rag_core::parse::json_span;
use finance_rag_core::prompt::{analysis_instructions, PromptPassage};
use finance_rag_core::{BackendError, RagError, Result};

use crate::backend::BackendRegistry;

/// Characters of the document included in the analysis prompt.
pub const ANALYSIS_CHARS: usize = 2000;

/// Characters of the document echoed back in [`AnalysisReport::preview`].
pub const PREVIEW_CHARS: usize = 300;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentAnalysis {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_topics: Vec<String>,
    #[serde(default = "default_document_type")]
    pub document_type: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub keywords: Vec<String>,
}

fn default_document_type() -> String {
    "other".to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    pub backend: String,
    pub model: String,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<DocumentAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<BackendError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub filename: String,
    /// Lowercased extension, or `"unknown"`.
    pub file_type: String,
    pub size_bytes: u64,
    /// Leading text of the document, up to [`PREVIEW_CHARS`] characters.
    pub preview: String,
    /// Characters of the document that were analyzed.
    pub analyzed_chars: usize,
    pub outcomes: Vec<AnalysisOutcome>,
}

/// A document that could not be analyzed at all.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisFailure {
    pub filename: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchAnalysis {
    pub files_analyzed: usize,
    pub reports: Vec<AnalysisReport>,
    pub failed: Vec<AnalysisFailure>,
}

/// One document handed to [`analyze_batch`].
#[derive(Debug, Clone)]
pub struct AnalysisInput {
    pub filename: String,
    pub text: String,
    pub size_bytes: u64,
}

fn file_type(filename: &str) -> String {
    std::path::Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_else(|| "unknown".to_string())
}

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", cut)
    }
}

/// Interpret a backend reply. A reply without a usable JSON object becomes
/// a plain summary with zero confidence.
pub fn parse_analysis(raw: &str) -> DocumentAnalysis {
    let parsed = json_span(raw)
        .and_then(|span| serde_json::from_str::<DocumentAnalysis>(span).ok())
        .filter(|a| !a.summary.trim().is_empty());

    match parsed {
        Some(mut a) => {
            a.confidence = a.confidence.clamp(0.0, 1.0);
            a
        }
        None => DocumentAnalysis {
            summary: raw.trim().to_string(),
            key_topics: Vec::new(),
            document_type: default_document_type(),
            confidence: 0.0,
            keywords: Vec::new(),
        },
    }
}

pub async fn analyze_document(
    backends: &BackendRegistry,
    timeout: Duration,
    filename: &str,
    text: &str,
    names: &[&str],
) -> Result<AnalysisReport> {
    if names.is_empty() {
        return Err(RagError::InvalidArgument(
            "at least one backend must be requested".to_string(),
        ));
    }
    if text.trim().is_empty() {
        return Err(RagError::InvalidArgument("document contains no text".to_string()));
    }

    let excerpt: String = text.chars().take(ANALYSIS_CHARS).collect();
    let analyzed_chars = excerpt.chars().count();
    let instructions = analysis_instructions(filename);
    let context = vec![PromptPassage {
        label: "DOC".to_string(),
        source: filename.to_string(),
        text: excerpt,
    }];

    let calls = names.iter().map(|name| {
        let instructions = &instructions;
        let context = &context;
        async move {
            let started = Instant::now();
            let Some(backend) = backends.get(name) else {
                return AnalysisOutcome {
                    backend: name.to_string(),
                    model: String::new(),
                    elapsed_ms: 0,
                    analysis: None,
                    error: Some(BackendError::unavailable(format!(
                        "backend '{}' is not enabled",
                        name
                    ))),
                };
            };
            let result =
                match tokio::time::timeout(timeout, backend.generate(instructions, context)).await {
                    Ok(r) => r,
                    Err(_) => Err(BackendError::unavailable(format!(
                        "{} backend timed out",
                        name
                    ))),
                };
            let elapsed_ms = started.elapsed().as_millis() as u64;
            let (analysis, error) = match result {
                Ok(raw) => (Some(parse_analysis(&raw.text)), None),
                Err(e) => {
                    tracing::warn!(backend = *name, error = %e, "analysis failed");
                    (None, Some(e))
                }
            };
            AnalysisOutcome {
                backend: name.to_string(),
                model: backend.model().to_string(),
                elapsed_ms,
                analysis,
                error,
            }
        }
    });

    let outcomes = join_all(calls).await;
    Ok(AnalysisReport {
        filename: filename.to_string(),
        file_type: file_type(filename),
        size_bytes: text.len() as u64,
        preview: preview(text),
        analyzed_chars,
        outcomes,
    })
}

/// Analyze each input in order with the same backends.
///
/// Requesting no backend is an error for the whole batch; a document
/// without text only fails itself.
pub async fn analyze_batch(
    backends: &BackendRegistry,
    timeout: Duration,
    inputs: Vec<AnalysisInput>,
    names: &[&str],
) -> Result<BatchAnalysis> {
    if names.is_empty() {
        return Err(RagError::InvalidArgument(
            "at least one backend must be requested".to_string(),
        ));
    }

    let mut batch = BatchAnalysis::default();
    for input in inputs {
        match analyze_document(backends, timeout, &input.filename, &input.text, names).await {
            Ok(mut report) => {
                report.size_bytes = input.size_bytes;
                batch.reports.push(report);
            }
            Err(RagError::InvalidArgument(reason)) => {
                tracing::warn!(filename = %input.filename, %reason, "document skipped");
                batch.failed.push(AnalysisFailure {
                    filename: input.filename,
                    reason,
                });
            }
            Err(e) => return Err(e),
        }
    }
    batch.files_analyzed = batch.reports.len();
    Ok(batch)
}
