//! Index and backend health overview.
//!
//! Gives a quick summary of what is indexed and whether each generation
//! backend is configured and reachable. Used by `finrag status`.

use serde::Serialize;

use finance_rag_core::backend::{BackendStatus, Configuration, Reachability};

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub index_document_count: usize,
    pub index_chunk_count: usize,
    pub collections: Vec<String>,
    /// `(model, dims)` the index was built with, if anything was stored.
    pub embedding_model: Option<String>,
    pub embedding_dims: Option<usize>,
    pub db_path: String,
    pub db_size_bytes: u64,
    pub hosted_backend_status: BackendStatus,
    pub local_backend_status: BackendStatus,
}

/// Status entry for a backend switched off in config.
pub fn disabled_status(backend: &str, model: &str) -> BackendStatus {
    BackendStatus {
        backend: backend.to_string(),
        model: model.to_string(),
        configuration: Configuration::NotConfigured,
        reachability: Reachability::Unreachable,
        detail: Some("disabled in config".to_string()),
    }
}

impl StatusReport {
    /// Human-readable rendering for the terminal.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("Finance RAG: Status\n");
        out.push_str("===================\n\n");
        out.push_str(&format!("  Database:    {}\n", self.db_path));
        out.push_str(&format!("  Size:        {}\n\n", format_bytes(self.db_size_bytes)));
        out.push_str(&format!("  Documents:   {}\n", self.index_document_count));
        out.push_str(&format!("  Chunks:      {}\n", self.index_chunk_count));
        let embedding = match (&self.embedding_model, self.embedding_dims) {
            (Some(model), Some(dims)) => format!("{} ({} dims)", model, dims),
            _ => "none recorded".to_string(),
        };
        out.push_str(&format!("  Embedding:   {}\n", embedding));
        let collections = if self.collections.is_empty() {
            "-".to_string()
        } else {
            self.collections.join(", ")
        };
        out.push_str(&format!("  Collections: {}\n\n", collections));

        out.push_str(&format!(
            "  {:<8} {:<24} {:<15} {:<12} {}\n",
            "BACKEND", "MODEL", "CONFIGURATION", "REACHABLE", "DETAIL"
        ));
        out.push_str(&format!("  {}\n", "-".repeat(76)));
        for s in [&self.hosted_backend_status, &self.local_backend_status] {
            out.push_str(&format!(
                "  {:<8} {:<24} {:<15} {:<12} {}\n",
                s.backend,
                s.model,
                match s.configuration {
                    Configuration::Configured => "configured",
                    Configuration::NotConfigured => "not_configured",
                },
                match s.reachability {
                    Reachability::Reachable => "reachable",
                    Reachability::Unreachable => "unreachable",
                },
                s.detail.as_deref().unwrap_or("")
            ));
        }
        out
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
