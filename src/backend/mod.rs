//! LLM backend adapters.
//!
//! Two [`GenerationBackend`] implementations ship with the app:
//!
//! | Name | Adapter | Service |
//! |------|---------|---------|
//! | `hosted` | [`GeminiBackend`] | Google Gemini `generateContent` |
//! | `local` | [`OllamaBackend`] | Ollama `/api/generate` |
//!
//! [`BackendRegistry`] holds the enabled adapters by name. The synthesizer
//! resolves requested backend names against it and never sees a concrete
//! adapter type.

pub mod gemini;
pub mod ollama;

use std::collections::BTreeMap;
use std::sync::Arc;

use finance_rag_core::backend::GenerationBackend;
use finance_rag_core::BackendError;

use crate::config::BackendsConfig;

pub use gemini::GeminiBackend;
pub use ollama::OllamaBackend;

/// Enabled backends keyed by name.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn GenerationBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from `[backends]`, skipping disabled adapters.
    pub fn from_config(config: &BackendsConfig) -> anyhow::Result<Self> {
        let mut registry = Self::new();
        if config.hosted.enabled {
            registry.register(Arc::new(GeminiBackend::from_config(&config.hosted)?));
        }
        if config.local.enabled {
            registry.register(Arc::new(OllamaBackend::from_config(&config.local)?));
        }
        Ok(registry)
    }

    /// Add a backend, replacing any previous one with the same name.
    pub fn register(&mut self, backend: Arc<dyn GenerationBackend>) {
        self.backends.insert(backend.name().to_string(), backend);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn GenerationBackend>> {
        self.backends.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

/// Map a transport-level reqwest failure.
pub(crate) fn transport_error(service: &str, e: &reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::unavailable(format!("{} request timed out", service))
    } else if e.is_connect() {
        BackendError::unavailable(format!("{} is not reachable: {}", service, e))
    } else if e.is_decode() {
        BackendError::invalid_response(format!("{} returned an unreadable body: {}", service, e))
    } else {
        BackendError::unavailable(format!("{} request failed: {}", service, e))
    }
}

/// Map a non-success HTTP status.
pub(crate) fn status_error(service: &str, status: u16, body: &str) -> BackendError {
    let body = body.trim();
    let detail = if body.is_empty() {
        format!("{} returned HTTP {}", service, status)
    } else {
        let snippet: String = body.chars().take(300).collect();
        format!("{} returned HTTP {}: {}", service, status, snippet)
    };
    if status == 429 {
        BackendError::rate_limited(detail)
    } else {
        BackendError::unavailable(detail)
    }
}
