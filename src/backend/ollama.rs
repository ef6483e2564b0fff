//! Local backend: Ollama `/api/generate`.
//!
//! Sends the whole prompt as one string with `stream: false`. No retries:
//! a local daemon that refuses a connection is reported as `unavailable`
//! right away.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use finance_rag_core::backend::{
    BackendStatus, Configuration, GenerationBackend, RawModelOutput, Reachability, LOCAL,
};
use finance_rag_core::prompt::{render_prompt, PromptPassage};
use finance_rag_core::BackendError;

use super::{status_error, transport_error};
use crate::config::LocalBackendConfig;

const SERVICE: &str = "Ollama";

pub struct OllamaBackend {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    model: Option<String>,
}

impl OllamaBackend {
    pub fn from_config(config: &LocalBackendConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    /// Which required setting is blank, if any.
    fn missing_setting(&self) -> Option<&'static str> {
        if self.url.trim().is_empty() {
            Some("Ollama URL not set")
        } else if self.model.trim().is_empty() {
            Some("Ollama model not set")
        } else {
            None
        }
    }
}

fn parse_response(body: &str, configured_model: &str) -> Result<RawModelOutput, BackendError> {
    let parsed: GenerateResponse = serde_json::from_str(body).map_err(|e| {
        BackendError::invalid_response(format!("failed to parse Ollama response: {}", e))
    })?;
    if parsed.response.trim().is_empty() {
        return Err(BackendError::invalid_response("Ollama returned an empty response"));
    }
    Ok(RawModelOutput {
        text: parsed.response,
        model: parsed.model.unwrap_or_else(|| configured_model.to_string()),
    })
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    fn name(&self) -> &str {
        LOCAL
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        instructions: &str,
        context: &[PromptPassage],
    ) -> Result<RawModelOutput, BackendError> {
        if let Some(missing) = self.missing_setting() {
            return Err(BackendError::unavailable(format!(
                "local backend is not configured ({})",
                missing
            )));
        }
        let request = GenerateRequest {
            model: &self.model,
            prompt: render_prompt(instructions, context),
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
            },
        };

        tracing::debug!(backend = LOCAL, model = %self.model, "calling Ollama");
        let response = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, &e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(SERVICE, &e))?;
        if !status.is_success() {
            return Err(status_error(SERVICE, status.as_u16(), &body));
        }
        parse_response(&body, &self.model)
    }

    async fn status(&self) -> BackendStatus {
        let mut status = BackendStatus {
            backend: LOCAL.to_string(),
            model: self.model.clone(),
            configuration: Configuration::NotConfigured,
            reachability: Reachability::Unreachable,
            detail: None,
        };
        if let Some(missing) = self.missing_setting() {
            status.detail = Some(missing.to_string());
            return status;
        }
        status.configuration = Configuration::Configured;

        match self.client.get(format!("{}/api/tags", self.url)).send().await {
            Ok(resp) if resp.status().is_success() => {
                status.reachability = Reachability::Reachable;
            }
            Ok(resp) => status.detail = Some(format!("HTTP {}", resp.status())),
            Err(e) => status.detail = Some(transport_error(SERVICE, &e).message),
        }
        status
    }
}
