//! Hosted backend: Google Gemini `generateContent`.
//!
//! The instructions and each passage are sent as separate parts of one
//! user turn. The API key is read once from the environment variable named
//! by `backends.hosted.api_key_env`; without it the backend reports
//! itself as not configured and every call fails with `unavailable`.
//!
//! A transient failure (connection error, timeout, HTTP 5xx) is retried
//! once. HTTP 429 maps to `rate_limited` and is not retried.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use finance_rag_core::backend::{
    BackendStatus, Configuration, GenerationBackend, RawModelOutput, Reachability, HOSTED,
};
use finance_rag_core::prompt::PromptPassage;
use finance_rag_core::BackendError;

use super::{status_error, transport_error};
use crate::config::HostedBackendConfig;

const SERVICE: &str = "Gemini";
const MAX_ATTEMPTS: u32 = 2;
const RETRY_DELAY: Duration = Duration::from_millis(500);

pub struct GeminiBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    #[serde(rename = "responseMimeType")]
    response_mime_type: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "modelVersion", default)]
    model_version: Option<String>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiBackend {
    pub fn from_config(config: &HostedBackendConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        Self::new(config, api_key)
    }

    /// Build with an explicit key instead of reading the environment.
    pub fn new(config: &HostedBackendConfig, api_key: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    fn build_request(&self, instructions: &str, context: &[PromptPassage]) -> GenerateRequest {
        let mut parts = vec![Part {
            text: instructions.to_string(),
        }];
        if !context.is_empty() {
            parts.push(Part {
                text: "PASSAGES:".to_string(),
            });
            parts.extend(context.iter().map(|p| Part { text: p.render() }));
        }
        GenerateRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts,
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
                response_mime_type: "application/json".to_string(),
            },
        }
    }

    /// One request. The flag is set for failures worth a retry.
    async fn send_once(
        &self,
        api_key: &str,
        request: &GenerateRequest,
    ) -> Result<RawModelOutput, (BackendError, bool)> {
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| (transport_error(SERVICE, &e), e.is_connect() || e.is_timeout()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| (transport_error(SERVICE, &e), e.is_timeout()))?;
        if !status.is_success() {
            return Err((
                status_error(SERVICE, status.as_u16(), &body),
                status.is_server_error(),
            ));
        }
        parse_response(&body, &self.model).map_err(|e| (e, false))
    }
}

/// Concatenate the text parts of the first candidate.
fn parse_response(body: &str, configured_model: &str) -> Result<RawModelOutput, BackendError> {
    let parsed: GenerateResponse = serde_json::from_str(body).map_err(|e| {
        BackendError::invalid_response(format!("failed to parse Gemini response: {}", e))
    })?;

    let text: String = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| {
            c.parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(BackendError::invalid_response("no text in Gemini response"));
    }
    Ok(RawModelOutput {
        text,
        model: parsed
            .model_version
            .unwrap_or_else(|| configured_model.to_string()),
    })
}

#[async_trait]
impl GenerationBackend for GeminiBackend {
    fn name(&self) -> &str {
        HOSTED
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        instructions: &str,
        context: &[PromptPassage],
    ) -> Result<RawModelOutput, BackendError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| BackendError::unavailable("hosted backend is not configured (no API key)"))?;
        let request = self.build_request(instructions, context);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.send_once(api_key, &request).await {
                Ok(output) => return Ok(output),
                Err((err, true)) if attempt < MAX_ATTEMPTS => {
                    tracing::warn!(
                        backend = HOSTED,
                        attempt,
                        error = %err,
                        "transient Gemini failure, retrying"
                    );
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err((err, _)) => return Err(err),
            }
        }
    }

    async fn status(&self) -> BackendStatus {
        let mut status = BackendStatus {
            backend: HOSTED.to_string(),
            model: self.model.clone(),
            configuration: Configuration::NotConfigured,
            reachability: Reachability::Unreachable,
            detail: None,
        };
        let Some(api_key) = self.api_key.as_deref() else {
            status.detail = Some("API key not set".to_string());
            return status;
        };
        status.configuration = Configuration::Configured;

        let url = format!("{}/models/{}", self.base_url, self.model);
        match self
            .client
            .get(&url)
            .header("x-goog-api-key", api_key)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                status.reachability = Reachability::Reachable;
            }
            Ok(resp) => {
                status.detail = Some(format!("HTTP {}", resp.status()));
            }
            Err(e) => {
                status.detail = Some(transport_error(SERVICE, &e).message);
            }
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finance_rag_core::BackendErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Read one HTTP request: headers, then `Content-Length` bytes of body.
    async fn read_request(socket: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            buf.extend_from_slice(&chunk[..n]);
            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let headers = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let body_len = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + body_len {
                return;
            }
        }
    }

    /// Serve every request with the same HTTP status, counting requests.
    async fn serve_status(code: u16, reason: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                read_request(&mut socket).await;
                counter.fetch_add(1, Ordering::SeqCst);
                let body = r#"{"error":{"message":"try later"}}"#;
                let response = format!(
                    "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    code,
                    reason,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{}/v1beta", addr), hits)
    }

    fn backend_at(base_url: String) -> GeminiBackend {
        let config = HostedBackendConfig {
            base_url,
            timeout_secs: 5,
            ..Default::default()
        };
        GeminiBackend::new(&config, Some("k".to_string())).unwrap()
    }

    fn backend(api_key: Option<&str>) -> GeminiBackend {
        let config = HostedBackendConfig {
            base_url: "http://127.0.0.1:1/v1beta".to_string(),
            timeout_secs: 2,
            ..Default::default()
        };
        GeminiBackend::new(&config, api_key.map(String::from)).unwrap()
    }

    #[test]
    fn test_request_has_one_part_per_passage() {
        let b = backend(Some("k"));
        let passages = vec![
            PromptPassage {
                label: "P1".into(),
                source: "rates.txt".into(),
                text: "APR is 19.9%".into(),
            },
            PromptPassage {
                label: "P2".into(),
                source: "fees.txt".into(),
                text: "Annual fee is $95".into(),
            },
        ];
        let req = b.build_request("Answer the question.", &passages);
        let json = serde_json::to_value(&req).unwrap();
        let parts = json["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0]["text"], "Answer the question.");
        assert!(parts[2]["text"].as_str().unwrap().starts_with("[P1] (source: rates.txt)"));
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 2048);
        assert_eq!(
            b.endpoint(),
            "http://127.0.0.1:1/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn test_parse_response_joins_parts() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"{\"answer\":"},{"text":"\"ok\"}"}]}}],"modelVersion":"gemini-2.5-flash-001"}"#;
        let out = parse_response(body, "gemini-2.5-flash").unwrap();
        assert_eq!(out.text, r#"{"answer":"ok"}"#);
        assert_eq!(out.model, "gemini-2.5-flash-001");
    }

    #[test]
    fn test_parse_response_rejects_empty_and_malformed() {
        let empty = parse_response(r#"{"candidates":[]}"#, "m").unwrap_err();
        assert_eq!(empty.kind, BackendErrorKind::InvalidResponse);
        let bad = parse_response("<html>", "m").unwrap_err();
        assert_eq!(bad.kind, BackendErrorKind::InvalidResponse);
    }

    #[tokio::test]
    async fn test_missing_key_is_unavailable_and_not_configured() {
        let b = backend(None);
        let err = b.generate("q", &[]).await.unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::Unavailable);
        let status = b.status().await;
        assert_eq!(status.configuration, Configuration::NotConfigured);
        assert!(!status.is_available());
    }

    #[tokio::test]
    async fn test_server_error_is_retried_once() {
        let (url, hits) = serve_status(503, "Service Unavailable").await;
        let err = backend_at(url).generate("q", &[]).await.unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::Unavailable);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_is_not_retried() {
        let (url, hits) = serve_status(429, "Too Many Requests").await;
        let err = backend_at(url).generate("q", &[]).await.unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::RateLimited);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_unavailable() {
        let b = backend(Some("k"));
        let err = b.generate("q", &[]).await.unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::Unavailable);
        let status = b.status().await;
        assert_eq!(status.configuration, Configuration::Configured);
        assert_eq!(status.reachability, Reachability::Unreachable);
    }
}
