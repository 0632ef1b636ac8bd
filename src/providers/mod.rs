//! News provider clients.
//!
//! Every provider implements [`NewsProvider`]: one validated
//! [`ProviderRequest`] in, one [`FetchOutcome`] out. Clients handle their own
//! pagination, translate HTTP statuses and body-level error codes into the
//! shared [`crate::error::ErrorKind`] taxonomy, and normalize items through
//! [`crate::models::ArticleDraft`].
//!
//! # Supported Providers
//!
//! | Name | Service | Pagination |
//! |------|---------|------------|
//! | `gnews` | gnews.io v4 | page number |
//! | `newsapi` | newsapi.org v2 | page number |
//! | `mediastack` | mediastack.com v1 | offset |
//! | `newsdata` | newsdata.io v1 | next-page token |
//! | `thenewsapi` | thenewsapi.com v1 | page number |

use crate::config::ProviderConfig;
use crate::error::FetchError;
use crate::models::{FetchOutcome, ProviderRequest};
use async_trait::async_trait;
use reqwest::Client;

pub mod gnews;
pub mod http;
pub mod mediastack;
pub mod newsapi;
pub mod newsdata;
pub mod registry;
pub mod schema;
pub mod thenewsapi;

pub use registry::{ProviderKind, ProviderRegistry};
pub use schema::{FieldKind, FieldSpec, ParamSchema};

/// Priority assigned to providers that do not configure one.
pub const DEFAULT_PRIORITY: u32 = 100;

/// Articles requested when a request sets no `limit`.
pub const DEFAULT_LIMIT: usize = 50;

/// A news source that can execute validated requests.
#[async_trait]
pub trait NewsProvider: Send + Sync {
    /// Registry key, e.g. `"gnews"`.
    fn name(&self) -> &str;

    /// Parameters this provider accepts.
    fn schema(&self) -> &ParamSchema;

    /// Ranking tie-break; lower sorts first.
    fn priority(&self) -> u32 {
        DEFAULT_PRIORITY
    }

    /// Perform the request, following pagination as needed.
    ///
    /// Must not panic and must not return partial results: either every
    /// article collected for the request or a typed failure.
    async fn fetch(&self, request: &ProviderRequest) -> FetchOutcome;
}

/// Connection settings shared by the HTTP-backed clients.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub client: Client,
    pub base_url: String,
    pub api_key: Option<String>,
    pub page_size: u32,
    pub max_pages: u32,
    pub priority: u32,
}

impl Endpoint {
    pub fn new(client: Client, name: &str, default_base_url: &str, config: &ProviderConfig) -> Self {
        Self {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| default_base_url.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: config.resolved_api_key(name),
            page_size: config.page_size.max(1),
            max_pages: config.max_pages.max(1),
            priority: config.priority,
        }
    }

    /// The API key, or an authentication failure raised without a network call.
    pub fn require_key(&self, provider: &str) -> Result<&str, FetchError> {
        self.api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| FetchError::authentication(provider, "no API key configured"))
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Total articles wanted for `request`.
    pub fn limit_for(&self, request: &ProviderRequest) -> usize {
        request.limit().unwrap_or(DEFAULT_LIMIT).max(1)
    }

    /// Items per page, never above `cap` or the requested total.
    pub fn per_page(&self, limit: usize, cap: usize) -> usize {
        limit.min(self.page_size as usize).min(cap).max(1)
    }
}
