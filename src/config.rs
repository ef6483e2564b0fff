//! TOML configuration.
//!
//! Every section except `[db]` may be omitted and falls back to defaults.
//! Secrets never live in the file: backends and embedding providers read
//! API keys from the environment variables named here.
//!
//! A handful of environment variables override file values so that a
//! deployment can swap models without editing config:
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `GOOGLE_API_MODEL` | `backends.hosted.model` |
//! | `OLLAMA_API_URL` | `backends.local.url` |
//! | `OLLAMA_MODEL` | `backends.local.model` |

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use finance_rag_core::chunk::ChunkingConfig;
use finance_rag_core::prompt::PromptBudget;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    #[serde(default)]
    pub backends: BackendsConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    /// Collection new chunks are written to.
    #[serde(default = "default_collection")]
    pub collection: String,
}

fn default_collection() -> String {
    "finance_documents".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub min_score: Option<f64>,
    /// Weight of upload recency in `[0, 1]`; `0` disables re-ranking.
    #[serde(default)]
    pub recency_weight: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: None,
            recency_weight: 0.0,
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SynthesisConfig {
    /// Per-backend deadline for one generation call.
    #[serde(default = "default_backend_timeout_secs")]
    pub backend_timeout_secs: u64,
    #[serde(default)]
    pub prompt: PromptBudget,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            backend_timeout_secs: default_backend_timeout_secs(),
            prompt: PromptBudget::default(),
        }
    }
}

fn default_backend_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BackendsConfig {
    #[serde(default)]
    pub hosted: HostedBackendConfig,
    #[serde(default)]
    pub local: LocalBackendConfig,
}

/// Google Gemini (`generativelanguage.googleapis.com`).
#[derive(Debug, Deserialize, Clone)]
pub struct HostedBackendConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_hosted_model")]
    pub model: String,
    #[serde(default = "default_hosted_base_url")]
    pub base_url: String,
    #[serde(default = "default_hosted_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_hosted_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

impl Default for HostedBackendConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: default_hosted_model(),
            base_url: default_hosted_base_url(),
            api_key_env: default_hosted_api_key_env(),
            timeout_secs: default_hosted_timeout_secs(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_hosted_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_hosted_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_hosted_api_key_env() -> String {
    "GOOGLE_API_KEY".to_string()
}
fn default_hosted_timeout_secs() -> u64 {
    40
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_output_tokens() -> u32 {
    2048
}

/// Ollama (`/api/generate`).
#[derive(Debug, Deserialize, Clone)]
pub struct LocalBackendConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_ollama_url")]
    pub url: String,
    #[serde(default = "default_local_model")]
    pub model: String,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for LocalBackendConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: default_ollama_url(),
            model: default_local_model(),
            timeout_secs: default_generation_timeout_secs(),
            temperature: default_temperature(),
        }
    }
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_local_model() -> String {
    "llama3.2:latest".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Documents processed concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Files above this size are reported as failures without being read.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_workers() -> usize {
    4
}
fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.txt".to_string(),
        "**/*.md".to_string(),
        "**/*.csv".to_string(),
    ]
}
fn default_max_file_bytes() -> u64 {
    20 * 1024 * 1024
}

/// Read, parse, apply environment overrides, and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let mut config = parse_config(&content)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate(&config)?;
    Ok(config)
}

/// Parse and validate a config from a TOML string, without environment
/// overrides.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(model) = var("GOOGLE_API_MODEL").filter(|v| !v.is_empty()) {
        config.backends.hosted.model = model;
    }
    if let Some(url) = var("OLLAMA_API_URL").filter(|v| !v.is_empty()) {
        config.backends.local.url = url;
    }
    if let Some(model) = var("OLLAMA_MODEL").filter(|v| !v.is_empty()) {
        config.backends.local.model = model;
    }
}

fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        bail!(
            "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.chunk_overlap,
            config.chunking.chunk_size
        );
    }

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.recency_weight) {
        bail!("retrieval.recency_weight must be in [0.0, 1.0]");
    }
    if let Some(min) = config.retrieval.min_score {
        if !(0.0..=1.0).contains(&min) {
            bail!("retrieval.min_score must be in [0.0, 1.0]");
        }
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "local" | "hash" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, local, hash, openai, or ollama.",
            other
        ),
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    // Validate synthesis
    if config.synthesis.backend_timeout_secs == 0 {
        bail!("synthesis.backend_timeout_secs must be > 0");
    }
    if config.synthesis.prompt.max_chars == 0 || config.synthesis.prompt.max_passages == 0 {
        bail!("synthesis.prompt.max_chars and max_passages must be > 0");
    }

    if config.ingest.workers == 0 {
        bail!("ingest.workers must be >= 1");
    }

    Ok(())
}
