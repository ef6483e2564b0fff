//! Generation backend abstraction.
//!
//! Every answer-generation service (the hosted LLM, the local LLM, test
//! fakes) implements [`GenerationBackend`]. The synthesizer orchestrates an
//! arbitrary set of registered backends by name and never depends on a
//! concrete adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::prompt::PromptPassage;

/// Conventional name of the hosted backend.
pub const HOSTED: &str = "hosted";
/// Conventional name of the local backend.
pub const LOCAL: &str = "local";

/// Unparsed text returned by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawModelOutput {
    pub text: String,
    /// Model that produced the text, as reported by the provider when
    /// available.
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Configuration {
    Configured,
    NotConfigured,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reachability {
    Reachable,
    Unreachable,
}

/// Health of one backend as reported by [`GenerationBackend::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendStatus {
    pub backend: String,
    pub model: String,
    pub configuration: Configuration,
    pub reachability: Reachability,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl BackendStatus {
    pub fn is_available(&self) -> bool {
        self.configuration == Configuration::Configured
            && self.reachability == Reachability::Reachable
    }
}

/// Uniform interface over answer-generation services.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Registry name (e.g. `"hosted"`, `"local"`).
    fn name(&self) -> &str;

    /// Configured model identifier.
    fn model(&self) -> &str;

    /// Generate a completion.
    ///
    /// `instructions` carries the task, the question, and the output
    /// schema; `context` carries the passages in rank order. Adapters lay
    /// the two out in whatever shape their protocol prefers.
    async fn generate(
        &self,
        instructions: &str,
        context: &[PromptPassage],
    ) -> Result<RawModelOutput, BackendError>;

    /// Report whether the backend is configured and reachable.
    async fn status(&self) -> BackendStatus;
}
