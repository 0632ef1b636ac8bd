//! Provider registry: the closed set of built-in clients, keyed by name.
//!
//! Configuration names a provider by string; the registry resolves that name
//! to a shared client and validates the request parameters against the
//! client's schema. Nothing reaches the network until both steps pass.

use super::{
    Endpoint, NewsProvider, gnews, mediastack, newsapi, newsdata, schema::ParamSchema,
    thenewsapi,
};
use crate::config::{AppConfig, ProviderConfig};
use crate::error::{ConfigError, FetchError};
use crate::models::{ProviderRequest, RequestSpec};
use reqwest::Client;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Built-in provider variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    GNews,
    NewsApi,
    Mediastack,
    NewsData,
    TheNewsApi,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::GNews,
        ProviderKind::NewsApi,
        ProviderKind::Mediastack,
        ProviderKind::NewsData,
        ProviderKind::TheNewsApi,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ProviderKind::GNews => gnews::NAME,
            ProviderKind::NewsApi => newsapi::NAME,
            ProviderKind::Mediastack => mediastack::NAME,
            ProviderKind::NewsData => newsdata::NAME,
            ProviderKind::TheNewsApi => thenewsapi::NAME,
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderKind::GNews => gnews::DEFAULT_BASE_URL,
            ProviderKind::NewsApi => newsapi::DEFAULT_BASE_URL,
            ProviderKind::Mediastack => mediastack::DEFAULT_BASE_URL,
            ProviderKind::NewsData => newsdata::DEFAULT_BASE_URL,
            ProviderKind::TheNewsApi => thenewsapi::DEFAULT_BASE_URL,
        }
    }

    pub fn schema(self) -> &'static ParamSchema {
        match self {
            ProviderKind::GNews => gnews::schema(),
            ProviderKind::NewsApi => newsapi::schema(),
            ProviderKind::Mediastack => mediastack::schema(),
            ProviderKind::NewsData => newsdata::schema(),
            ProviderKind::TheNewsApi => thenewsapi::schema(),
        }
    }

    /// Construct the client for this variant.
    pub fn build(self, client: Client, config: &ProviderConfig) -> Arc<dyn NewsProvider> {
        let endpoint = Endpoint::new(client, self.name(), self.default_base_url(), config);
        match self {
            ProviderKind::GNews => Arc::new(gnews::GNews::new(endpoint)),
            ProviderKind::NewsApi => Arc::new(newsapi::NewsApi::new(endpoint)),
            ProviderKind::Mediastack => Arc::new(mediastack::Mediastack::new(endpoint)),
            ProviderKind::NewsData => Arc::new(newsdata::NewsData::new(endpoint)),
            ProviderKind::TheNewsApi => Arc::new(thenewsapi::TheNewsApi::new(endpoint)),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        ProviderKind::ALL
            .into_iter()
            .find(|k| k.name() == wanted)
            .ok_or_else(|| format!("unknown provider `{s}`"))
    }
}

/// Clients available to a run, keyed by provider name.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn NewsProvider>>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every enabled built-in provider, sharing one HTTP client.
    ///
    /// The client carries the per-call timeout, so a hung provider surfaces
    /// as a transient failure instead of stalling the run.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.pipeline.request_timeout_secs))
            .user_agent(config.pipeline.user_agent.clone())
            .build()
            .map_err(|e| ConfigError::Invalid(format!("failed to build HTTP client: {e}")))?;

        for name in config.providers.keys() {
            if ProviderKind::from_str(name).is_err() {
                return Err(ConfigError::Invalid(format!(
                    "providers section names unknown provider `{name}`"
                )));
            }
        }

        let mut registry = Self::new();
        for kind in ProviderKind::ALL {
            let provider_config = config.provider(kind.name());
            if !provider_config.enabled {
                debug!(provider = %kind, "Provider disabled");
                continue;
            }
            registry.register(kind.build(client.clone(), &provider_config));
        }
        info!(providers = ?registry.names(), "Provider registry ready");
        Ok(registry)
    }

    /// Add or replace a provider under its own name.
    pub fn register(&mut self, provider: Arc<dyn NewsProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn NewsProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Configured priority for every registered provider.
    pub fn priorities(&self) -> BTreeMap<String, u32> {
        self.providers
            .iter()
            .map(|(name, p)| (name.clone(), p.priority()))
            .collect()
    }

    /// Resolve a configured request to its client and validated parameters.
    ///
    /// Unknown providers and schema violations both come back as
    /// [`crate::error::ErrorKind::Validation`].
    pub fn prepare(
        &self,
        spec: &RequestSpec,
    ) -> Result<(Arc<dyn NewsProvider>, ProviderRequest), FetchError> {
        let provider = self.get(&spec.provider).ok_or_else(|| {
            FetchError::validation(
                spec.provider.as_str(),
                format!("no provider named `{}` is registered", spec.provider),
            )
        })?;
        let request = provider.schema().validate(&spec.parameters)?;
        Ok((provider, request))
    }
}
