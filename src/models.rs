//! Data models for normalized articles, provider requests, and the final feed.
//!
//! - [`Article`]: one normalized item produced by a provider client
//! - [`ArticleDraft`]: the loosely-typed intermediate every client fills in
//! - [`RequestSpec`] / [`ProviderRequest`]: a configured fetch before and
//!   after schema validation
//! - [`RankedArticle`] / [`Edition`]: the ordered feed handed to export

use crate::error::{ErrorKind, FetchError};
use crate::utils::{clean_text, parse_timestamp, source_domain};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;
use uuid::Uuid;

/// A normalized news article.
///
/// Title and publication timestamp are always present; drafts missing
/// either never become an `Article`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    /// Name of the provider that returned the article.
    pub provider: String,
    /// Provider-scoped identifier. Not unique across providers.
    pub external_id: String,
    pub title: String,
    /// Description or snippet. May be empty.
    pub body: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    /// Publisher domain, e.g. `reuters.com`.
    pub source_domain: String,
    pub language: Option<String>,
    pub categories: Vec<String>,
    /// The provider's item exactly as received, kept for export.
    pub raw: serde_json::Value,
}

impl Article {
    /// Text fed to the embedder: title, then body on the next line.
    pub fn embedding_text(&self) -> String {
        if self.body.is_empty() {
            self.title.clone()
        } else {
            format!("{}\n{}", self.title, self.body)
        }
    }
}

/// Partially parsed article as read off a provider response.
///
/// Clients fill in whatever their wire format offers and call
/// [`ArticleDraft::finish`], which applies the shared cleanup and rejects
/// items without a title or a parseable timestamp.
#[derive(Debug, Default, Clone)]
pub struct ArticleDraft {
    pub provider: String,
    pub external_id: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub url: Option<String>,
    pub published: Option<String>,
    pub source: Option<String>,
    pub language: Option<String>,
    pub categories: Vec<String>,
    pub raw: serde_json::Value,
}

impl ArticleDraft {
    pub fn new(provider: &str, raw: serde_json::Value) -> Self {
        Self {
            provider: provider.to_string(),
            raw,
            ..Self::default()
        }
    }

    /// Normalize into an [`Article`], or `None` if the item is unusable.
    pub fn finish(self) -> Option<Article> {
        let title = self.title.as_deref().map(clean_text).unwrap_or_default();
        if title.is_empty() {
            debug!(provider = %self.provider, "Dropping item without title");
            return None;
        }
        let Some(published_at) = self.published.as_deref().and_then(parse_timestamp) else {
            debug!(provider = %self.provider, %title, "Dropping item without usable timestamp");
            return None;
        };

        let url = self.url.unwrap_or_default().trim().to_string();
        let source_domain = self
            .source
            .as_deref()
            .and_then(source_domain)
            .or_else(|| source_domain(&url))
            .unwrap_or_else(|| self.provider.clone());
        let external_id = self
            .external_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| if url.is_empty() { title.clone() } else { url.clone() });

        Some(Article {
            provider: self.provider,
            external_id,
            title,
            body: self.body.as_deref().map(clean_text).unwrap_or_default(),
            url,
            published_at,
            source_domain,
            language: self
                .language
                .map(|l| l.trim().to_lowercase())
                .filter(|l| !l.is_empty()),
            categories: self
                .categories
                .into_iter()
                .map(|c| c.trim().to_lowercase())
                .filter(|c| !c.is_empty())
                .collect(),
            raw: self.raw,
        })
    }
}

/// One configured fetch as it arrives from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSpec {
    pub provider: String,
    /// Raw values; YAML numbers and booleans are read as their text.
    #[serde(default, deserialize_with = "scalar_params")]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

fn scalar_params<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, Scalar>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .map(|(name, value)| {
            let value = match value {
                Scalar::Text(s) => s,
                Scalar::Integer(n) => n.to_string(),
                Scalar::Float(x) => x.to_string(),
                Scalar::Bool(b) => b.to_string(),
            };
            (name, value)
        })
        .collect())
}

impl RequestSpec {
    pub fn new(provider: &str, parameters: &[(&str, &str)]) -> Self {
        Self {
            provider: provider.to_string(),
            parameters: parameters
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

/// A typed parameter value after schema validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Integer(i64),
    Date(NaiveDate),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Text(s) => f.write_str(s),
            ParamValue::Integer(n) => write!(f, "{n}"),
            ParamValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

/// A validated, immutable fetch unit.
///
/// Only produced by [`crate::providers::schema::ParamSchema::validate`], so
/// every value present has already been checked against the provider's
/// declared schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    provider: String,
    params: BTreeMap<String, ParamValue>,
}

impl ProviderRequest {
    pub(crate) fn new(provider: &str, params: BTreeMap<String, ParamValue>) -> Self {
        Self {
            provider: provider.to_string(),
            params,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn params(&self) -> &BTreeMap<String, ParamValue> {
        &self.params
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.params.get(name) {
            Some(ParamValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.params.get(name) {
            Some(ParamValue::Integer(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn date(&self, name: &str) -> Option<NaiveDate> {
        match self.params.get(name) {
            Some(ParamValue::Date(d)) => Some(*d),
            _ => None,
        }
    }

    pub fn query(&self) -> Option<&str> {
        self.text("query")
    }

    /// Result limit, if one was configured. Always positive.
    pub fn limit(&self) -> Option<usize> {
        self.integer("limit").map(|n| n as usize)
    }
}

/// Result of executing one [`ProviderRequest`]: every article the provider
/// returned, or a typed failure. Never partially valid.
pub type FetchOutcome = Result<Vec<Article>, FetchError>;

/// A provider request that contributed no articles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderFailure {
    pub provider: String,
    pub kind: ErrorKind,
    pub message: String,
    pub attempts: u32,
}

impl From<&FetchError> for ProviderFailure {
    fn from(err: &FetchError) -> Self {
        Self {
            provider: err.provider.clone(),
            kind: err.kind,
            message: err.message.clone(),
            attempts: err.attempts,
        }
    }
}

/// An article with its final position in the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedArticle {
    /// 1-based position.
    pub rank: usize,
    /// Number of query keyword hits in title and body.
    pub relevance: usize,
    #[serde(flatten)]
    pub article: Article,
}

/// The consolidated feed produced by one completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edition {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub article_count: usize,
    pub duplicates_removed: usize,
    pub failures: Vec<ProviderFailure>,
    pub articles: Vec<RankedArticle>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn draft() -> ArticleDraft {
        ArticleDraft {
            title: Some("Rates <b>hold</b>".to_string()),
            body: Some("The central bank kept rates.".to_string()),
            url: Some("https://www.example.com/rates".to_string()),
            published: Some("2025-05-06T12:00:00Z".to_string()),
            ..ArticleDraft::new("gnews", json!({"id": 1}))
        }
    }

    #[test]
    fn test_finish_normalizes_fields() {
        let article = draft().finish().unwrap();
        assert_eq!(article.title, "Rates hold");
        assert_eq!(article.source_domain, "example.com");
        assert_eq!(article.external_id, "https://www.example.com/rates");
        assert_eq!(article.raw, json!({"id": 1}));
    }

    #[test]
    fn test_finish_rejects_missing_title() {
        let mut d = draft();
        d.title = Some("   ".to_string());
        assert!(d.finish().is_none());
    }

    #[test]
    fn test_finish_rejects_missing_timestamp() {
        let mut d = draft();
        d.published = Some("not a date".to_string());
        assert!(d.finish().is_none());
        let mut d = draft();
        d.published = None;
        assert!(d.finish().is_none());
    }

    #[test]
    fn test_finish_prefers_declared_source() {
        let mut d = draft();
        d.source = Some("https://reuters.com".to_string());
        let article = d.finish().unwrap();
        assert_eq!(article.source_domain, "reuters.com");
    }

    #[test]
    fn test_embedding_text() {
        let article = draft().finish().unwrap();
        assert_eq!(article.embedding_text(), "Rates hold\nThe central bank kept rates.");
    }

    #[test]
    fn test_request_spec_deserialization() {
        let yaml = "provider: gnews\nparameters:\n  query: ai\n  limit: '10'\n";
        let spec: RequestSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec, RequestSpec::new("gnews", &[("query", "ai"), ("limit", "10")]));
    }

    #[test]
    fn test_ranked_article_flattens() {
        let ranked = RankedArticle {
            rank: 1,
            relevance: 2,
            article: draft().finish().unwrap(),
        };
        let value = serde_json::to_value(&ranked).unwrap();
        assert_eq!(value["rank"], 1);
        assert_eq!(value["title"], "Rates hold");
    }
}
