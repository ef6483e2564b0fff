//! Answer synthesis across one or more generation backends.
//!
//! The [`Synthesizer`] builds one prompt under the configured budget,
//! sends it to every requested backend concurrently, and merges the
//! results into a [`ChatResponse`]. A backend that errors or exceeds its
//! deadline is recorded as a failed [`BackendOutcome`]; the others still
//! answer.
//!
//! The primary answer is the first successful backend in request order.

use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};

use finance_rag_core::backend::{GenerationBackend, HOSTED, LOCAL};
use finance_rag_core::models::{
    new_response_id, BackendOutcome, ChatResponse, Outcome, ResponseStatus, RetrievedPassage,
    SynthesizedAnswer,
};
use finance_rag_core::next_steps::{no_context_next_steps, suggest_next_steps};
use finance_rag_core::parse::{parse_model_output, resolve_citations};
use finance_rag_core::prompt::{PromptBudget, PromptPlan};
use finance_rag_core::{BackendError, RagError, Result};

use crate::backend::BackendRegistry;

pub const NO_CONTEXT_ANSWER: &str =
    "No relevant documents were found for this question. Upload related documents or rephrase the question.";

pub struct Synthesizer {
    backends: BackendRegistry,
    timeout: Duration,
    budget: PromptBudget,
}

impl Synthesizer {
    pub fn new(backends: BackendRegistry, timeout: Duration, budget: PromptBudget) -> Self {
        Self {
            backends,
            timeout,
            budget,
        }
    }

    pub fn backends(&self) -> &BackendRegistry {
        &self.backends
    }

    /// Answer with the hosted and/or local backend.
    pub async fn answer(
        &self,
        query: &str,
        passages: &[RetrievedPassage],
        use_hosted: bool,
        use_local: bool,
    ) -> Result<ChatResponse> {
        let mut names = Vec::with_capacity(2);
        if use_hosted {
            names.push(HOSTED);
        }
        if use_local {
            names.push(LOCAL);
        }
        self.answer_with(query, passages, &names).await
    }

    /// Answer with the named backends, in the given order of preference.
    pub async fn answer_with(
        &self,
        query: &str,
        passages: &[RetrievedPassage],
        names: &[&str],
    ) -> Result<ChatResponse> {
        if names.is_empty() {
            return Err(RagError::InvalidArgument(
                "at least one backend must be requested".to_string(),
            ));
        }
        if query.trim().is_empty() {
            return Err(RagError::InvalidArgument("query must not be empty".to_string()));
        }

        if passages.is_empty() {
            tracing::info!(state = "done", status = "no_context", "no passages; skipping backends");
            return Ok(no_context_response(query));
        }

        let plan = PromptPlan::build(query, passages, &self.budget);
        tracing::info!(
            state = "synthesizing",
            backends = ?names,
            passages = plan.included.len(),
            dropped = plan.dropped,
            "dispatching prompt"
        );

        let calls = names.iter().map(|name| self.run_backend(name, query, &plan));
        let outcomes: Vec<BackendOutcome> = join_all(calls).await;

        let response = merge(query, passages.len(), outcomes);
        match response.status {
            ResponseStatus::Failed => {
                tracing::warn!(state = "failed", "every requested backend failed")
            }
            status => tracing::info!(
                state = "done",
                ?status,
                produced_by = ?response.produced_by,
                "answer merged"
            ),
        }
        Ok(response)
    }

    async fn run_backend(&self, name: &str, query: &str, plan: &PromptPlan) -> BackendOutcome {
        let started = Instant::now();
        let Some(backend) = self.backends.get(name) else {
            return BackendOutcome {
                backend: name.to_string(),
                model: String::new(),
                elapsed_ms: 0,
                outcome: Outcome::Failed(BackendError::unavailable(format!(
                    "backend '{}' is not enabled",
                    name
                ))),
            };
        };

        let result = call_with_timeout(backend, plan, self.timeout).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok(raw) => {
                let parsed = parse_model_output(&raw.text);
                let citations = resolve_citations(&parsed.cited_labels, &plan.included);
                let next_steps = if parsed.next_steps.is_empty() {
                    suggest_next_steps(query, &parsed.answer, &parsed.key_points)
                } else {
                    parsed.next_steps
                };
                tracing::debug!(backend = name, elapsed_ms, format = ?parsed.format, "backend answered");
                Outcome::Answered(SynthesizedAnswer {
                    answer: parsed.answer,
                    key_points: parsed.key_points,
                    next_steps,
                    citations,
                    format: parsed.format,
                    raw_output: raw.text,
                })
            }
            Err(err) => {
                tracing::warn!(backend = name, elapsed_ms, error = %err, "backend failed");
                Outcome::Failed(err)
            }
        };

        BackendOutcome {
            backend: name.to_string(),
            model: backend.model().to_string(),
            elapsed_ms,
            outcome,
        }
    }
}

async fn call_with_timeout(
    backend: &Arc<dyn GenerationBackend>,
    plan: &PromptPlan,
    timeout: Duration,
) -> std::result::Result<finance_rag_core::backend::RawModelOutput, BackendError> {
    match tokio::time::timeout(timeout, backend.generate(&plan.instructions, &plan.passages)).await
    {
        Ok(result) => result,
        Err(_) => Err(BackendError::unavailable(format!(
            "{} backend timed out after {}s",
            backend.name(),
            timeout.as_secs_f32()
        ))),
    }
}

fn merge(query: &str, considered: usize, outcomes: Vec<BackendOutcome>) -> ChatResponse {
    let produced_by: Vec<String> = outcomes
        .iter()
        .filter(|o| o.answer().is_some())
        .map(|o| o.backend.clone())
        .collect();

    let status = if produced_by.len() == outcomes.len() {
        ResponseStatus::Complete
    } else if produced_by.is_empty() {
        ResponseStatus::Failed
    } else {
        ResponseStatus::Partial
    };

    let primary = outcomes.iter().find_map(|o| o.answer()).cloned();
    let (answer, key_points, next_steps, citations) = match primary {
        Some(a) => (a.answer, a.key_points, a.next_steps, a.citations),
        None => {
            let reasons: Vec<String> = outcomes
                .iter()
                .filter_map(|o| o.error().map(|e| format!("{}: {}", o.backend, e)))
                .collect();
            (
                format!("No backend could answer the question ({}).", reasons.join("; ")),
                Vec::new(),
                vec!["Check backend status and try again".to_string()],
                Vec::new(),
            )
        }
    };

    ChatResponse {
        id: new_response_id(),
        query: query.to_string(),
        status,
        answer,
        key_points,
        next_steps,
        citations,
        produced_by,
        backends: outcomes,
        passages_considered: considered,
    }
}

fn no_context_response(query: &str) -> ChatResponse {
    ChatResponse {
        id: new_response_id(),
        query: query.to_string(),
        status: ResponseStatus::NoContext,
        answer: NO_CONTEXT_ANSWER.to_string(),
        key_points: Vec::new(),
        next_steps: no_context_next_steps(),
        citations: Vec::new(),
        produced_by: Vec::new(),
        backends: Vec::new(),
        passages_considered: 0,
    }
}
