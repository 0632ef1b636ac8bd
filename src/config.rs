//! YAML configuration.
//!
//! One file drives a deployment: pipeline tuning, retry policy, embedding
//! backend, export location, per-provider credentials, and the ordered list
//! of requests a run executes. Every section has defaults, so an empty file
//! is a valid (if idle) configuration.
//!
//! ```yaml
//! pipeline:
//!   workers: 4
//!   dedup_threshold: 0.95
//! providers:
//!   gnews: { api_key: "...", priority: 1 }
//! requests:
//!   - provider: gnews
//!     parameters: { query: "ai", language: "en", limit: "20" }
//! ```
//!
//! API keys left out of the file are read from `<PROVIDER>_API_KEY`
//! (`GNEWS_API_KEY`, `NEWSAPI_API_KEY`, ...). The request list is re-read at
//! the start of every run through [`RequestSource`].

use crate::error::ConfigError;
use crate::models::RequestSpec;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub retry: RetryConfig,
    pub embedding: EmbeddingConfig,
    pub export: ExportConfig,
    pub providers: BTreeMap<String, ProviderConfig>,
    pub requests: Vec<RequestSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Provider requests in flight at once.
    pub workers: usize,
    /// Cosine similarity above which two articles are the same story.
    pub dedup_threshold: f32,
    /// Merged articles kept for dedup; the rest are dropped in merge order.
    pub max_articles: usize,
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            dedup_threshold: 0.95,
            max_articles: 200,
            request_timeout_secs: 30,
            user_agent: concat!("news_sift/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub jitter_ms: u64,
    /// Cap on any single wait, including provider retry-after hints.
    pub max_wait_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            multiplier: 2.0,
            jitter_ms: 250,
            max_wait_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Offline feature hashing. No network, no key.
    #[default]
    Hash,
    /// An OpenAI-compatible `/embeddings` endpoint.
    OpenAi,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    pub base_url: String,
    pub model: String,
    /// Falls back to `OPENAI_API_KEY`.
    pub api_key: Option<String>,
    /// Vector length for the hash backend.
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Hash,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key: None,
            dimension: 384,
        }
    }
}

impl EmbeddingConfig {
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExportConfig {
    pub output_dir: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: "./out".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub page_size: u32,
    pub max_pages: u32,
    /// Lower sorts first when ranking ties.
    pub priority: u32,
    pub enabled: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            page_size: 25,
            max_pages: 3,
            priority: crate::providers::DEFAULT_PRIORITY,
            enabled: true,
        }
    }
}

impl ProviderConfig {
    /// The configured key, or `<NAME>_API_KEY` from the environment.
    pub fn resolved_api_key(&self, provider: &str) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(env_key(provider)).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

/// Environment variable holding a provider's key.
pub fn env_key(provider: &str) -> String {
    format!("{}_API_KEY", provider.to_uppercase())
}

impl AppConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        // serde_yaml reads an empty document as null
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: AppConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    #[instrument(level = "debug", skip_all)]
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).await.map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_yaml_str(&text)?;
        debug!(
            path = %path.display(),
            requests = config.requests.len(),
            providers = config.providers.len(),
            "Loaded config"
        );
        Ok(config)
    }

    /// Settings for `name`, falling back to defaults when the section is absent.
    pub fn provider(&self, name: &str) -> ProviderConfig {
        self.providers.get(name).cloned().unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.pipeline;
        if p.workers == 0 {
            return Err(ConfigError::Invalid("pipeline.workers must be at least 1".into()));
        }
        if !(p.dedup_threshold > 0.0 && p.dedup_threshold <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "pipeline.dedup_threshold must be in (0, 1], got {}",
                p.dedup_threshold
            )));
        }
        if p.max_articles == 0 {
            return Err(ConfigError::Invalid("pipeline.max_articles must be at least 1".into()));
        }
        if p.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.request_timeout_secs must be at least 1".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry.multiplier must be >= 1.0, got {}",
                self.retry.multiplier
            )));
        }
        if self.embedding.backend == EmbeddingBackend::Hash && self.embedding.dimension == 0 {
            return Err(ConfigError::Invalid("embedding.dimension must be at least 1".into()));
        }
        if let Some(bad) = self.requests.iter().find(|r| r.provider.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "request with parameters {:?} has no provider",
                bad.parameters
            )));
        }
        Ok(())
    }
}

/// Supplies the ordered request list at the start of each run.
#[async_trait]
pub trait RequestSource: Send + Sync {
    async fn load_requests(&self) -> Result<Vec<RequestSpec>, ConfigError>;
}

/// Re-reads the `requests` section of a config file on every call.
#[derive(Debug, Clone)]
pub struct FileRequestSource {
    path: PathBuf,
}

impl FileRequestSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RequestSource for FileRequestSource {
    async fn load_requests(&self) -> Result<Vec<RequestSpec>, ConfigError> {
        Ok(AppConfig::load(&self.path).await?.requests)
    }
}

/// A fixed request list, for callers that build requests in code.
#[derive(Debug, Clone, Default)]
pub struct StaticRequestSource {
    requests: Vec<RequestSpec>,
}

impl StaticRequestSource {
    pub fn new(requests: Vec<RequestSpec>) -> Self {
        Self { requests }
    }
}

#[async_trait]
impl RequestSource for StaticRequestSource {
    async fn load_requests(&self) -> Result<Vec<RequestSpec>, ConfigError> {
        Ok(self.requests.clone())
    }
}
