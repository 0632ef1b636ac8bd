//! NewsData (newsdata.io, API v1).
//!
//! Reads `/latest`; pages are chained through the opaque `nextPage` token.
//! Timestamps come as naive `YYYY-MM-DD HH:MM:SS` in UTC. Failures are
//! reported as `{"status":"error","results":{"code","message"}}`.

use super::http::{self, Cursor, Page, Reply};
use super::schema::{CATEGORY_ALIASES, FieldSpec, ParamSchema};
use super::{Endpoint, NewsProvider};
use crate::error::{ErrorKind, FetchError};
use crate::models::{ArticleDraft, FetchOutcome, ProviderRequest};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

/// Provider name used in requests, logs and failures.
pub const NAME: &str = "newsdata";
pub const DEFAULT_BASE_URL: &str = "https://newsdata.io/api/1";
const MAX_PER_PAGE: usize = 50;

const CATEGORIES: &[&str] = &[
    "business",
    "crime",
    "domestic",
    "education",
    "entertainment",
    "environment",
    "food",
    "health",
    "lifestyle",
    "other",
    "politics",
    "science",
    "sports",
    "technology",
    "top",
    "tourism",
    "world",
];

static SCHEMA: Lazy<ParamSchema> = Lazy::new(|| {
    ParamSchema::new(
        NAME,
        vec![
            FieldSpec::text("query"),
            FieldSpec::text("language"),
            FieldSpec::text("country"),
            FieldSpec::one_of("category", CATEGORIES, CATEGORY_ALIASES),
            FieldSpec::text("domains"),
            FieldSpec::integer("timeframe", 1, 48),
            FieldSpec::integer("limit", 1, 1000),
        ],
    )
});

/// Accepted request parameters.
///
/// Pages hold at most 50 items, so a `limit` above that always costs more
/// than one call.
pub fn schema() -> &'static ParamSchema {
    &SCHEMA
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Response {
    status: Option<String>,
    results: Option<Value>,
    next_page: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: Option<String>,
    message: Option<String>,
}

/// One entry of `results`. Field names are snake_case on the wire except
/// `pubDate`.
#[derive(Debug, Deserialize)]
struct Item {
    article_id: Option<String>,
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    content: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    source_url: Option<String>,
    language: Option<String>,
    #[serde(default)]
    category: Option<Vec<String>>,
}

fn kind_for_code(code: &str) -> Option<ErrorKind> {
    let code = code.to_lowercase();
    if code.contains("unauthorized") || code.contains("apikey") || code.contains("forbidden") {
        Some(ErrorKind::Authentication)
    } else if code.contains("ratelimit") || code.contains("toomanyrequests") || code.contains("quota") {
        Some(ErrorKind::RateLimit)
    } else if code.contains("unsupported") || code.contains("invalid") || code.contains("parameter") {
        Some(ErrorKind::Validation)
    } else if code.contains("server") || code.contains("internal") {
        Some(ErrorKind::TransientServer)
    } else {
        None
    }
}

/// Client for the NewsData v1 API.
///
/// Pages are chained through the `nextPage` token. The client stops as soon
/// as the token is missing, even if fewer than `limit` articles arrived.
#[derive(Debug)]
pub struct NewsData {
    endpoint: Endpoint,
}

impl NewsData {
    /// Create a client.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - Connection settings; the key is sent as `apikey`
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let client = NewsData::new(Endpoint::new(http, NAME, DEFAULT_BASE_URL, &config));
    /// let articles = client.fetch(&request).await?;
    /// ```
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }

    async fn fetch_page(
        &self,
        request: &ProviderRequest,
        api_key: &str,
        per_page: usize,
        cursor: Cursor,
    ) -> Result<Page, FetchError> {
        let token = match cursor {
            Cursor::Token(t) => Some(t),
            _ => None,
        };
        let query = build_query(request, api_key, per_page, token);
        let builder = self.endpoint.client.get(self.endpoint.url("latest")).query(&query);
        let reply = http::send(NAME, builder).await?;
        interpret(&reply)
    }
}

fn build_query(
    request: &ProviderRequest,
    api_key: &str,
    per_page: usize,
    token: Option<String>,
) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("apikey", api_key.to_string()),
        ("size", per_page.to_string()),
    ];
    if let Some(q) = request.query() {
        query.push(("q", q.to_string()));
    }
    if let Some(lang) = request.text("language") {
        query.push(("language", lang.to_lowercase()));
    }
    if let Some(country) = request.text("country") {
        query.push(("country", country.to_lowercase()));
    }
    if let Some(category) = request.text("category") {
        query.push(("category", category.to_string()));
    }
    if let Some(domains) = request.text("domains") {
        query.push(("domainurl", domains.to_string()));
    }
    if let Some(hours) = request.integer("timeframe") {
        query.push(("timeframe", hours.to_string()));
    }
    if let Some(token) = token {
        query.push(("page", token));
    }
    query
}

fn interpret(reply: &Reply) -> Result<Page, FetchError> {
    let body: Option<Response> = serde_json::from_str(&reply.body).ok();

    let is_error = !reply.is_success()
        || body
            .as_ref()
            .is_some_and(|b| b.status.as_deref() == Some("error"));
    if is_error {
        let detail = body
            .as_ref()
            .and_then(|b| b.results.clone())
            .and_then(|r| serde_json::from_value::<ApiError>(r).ok());
        let (code_kind, message) = match detail {
            Some(d) => (d.code.as_deref().and_then(kind_for_code), d.message),
            None => (None, None),
        };
        return Err(reply.failure(NAME, code_kind, message));
    }

    let body: Response = match body {
        Some(b) => b,
        None => reply.decode(NAME)?,
    };
    let Some(Value::Array(items)) = body.results else {
        return Err(FetchError::malformed(NAME, "response has no results array"));
    };

    let received = items.len();
    let articles = items
        .into_iter()
        .filter_map(|raw| match serde_json::from_value::<Item>(raw.clone()) {
            Ok(item) => Some(draft(item, raw)),
            Err(e) => {
                debug!(error = %e, "Skipping undecodable newsdata item");
                None
            }
        })
        .filter_map(ArticleDraft::finish)
        .collect();

    Ok(Page {
        articles,
        received,
        next: body
            .next_page
            .filter(|t| !t.is_empty())
            .map(Cursor::Token),
    })
}

fn draft(item: Item, raw: Value) -> ArticleDraft {
    ArticleDraft {
        external_id: item.article_id,
        title: item.title,
        body: item.description.or(item.content),
        url: item.link,
        published: item.pub_date,
        source: item.source_url,
        language: item.language,
        categories: item.category.unwrap_or_default(),
        ..ArticleDraft::new(NAME, raw)
    }
}

#[async_trait]
impl NewsProvider for NewsData {
    fn name(&self) -> &str {
        NAME
    }

    fn schema(&self) -> &ParamSchema {
        schema()
    }

    fn priority(&self) -> u32 {
        self.endpoint.priority
    }

    #[instrument(level = "info", skip_all, fields(provider = NAME))]
    async fn fetch(&self, request: &ProviderRequest) -> FetchOutcome {
        let api_key = self.endpoint.require_key(NAME)?;
        let limit = self.endpoint.limit_for(request);
        let per_page = self.endpoint.per_page(limit, MAX_PER_PAGE);

        let articles = http::collect_pages(limit, self.endpoint.max_pages, |cursor| {
            self.fetch_page(request, api_key, per_page, cursor)
        })
        .await?;

        info!(count = articles.len(), "Fetched newsdata articles");
        Ok(articles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::reply;
    use chrono::Timelike;

    const FIXTURE: &str = r#"{
        "status": "success",
        "totalResults": 120,
        "results": [
            {
                "article_id": "9f1c2",
                "title": "Parliament passes budget",
                "link": "https://www.theguardian.com/politics/budget",
                "creator": ["Jane Doe"],
                "description": "The vote was close.",
                "content": "ONLY AVAILABLE IN PAID PLANS",
                "pubDate": "2025-05-06 14:03:00",
                "source_id": "theguardian",
                "source_url": "https://www.theguardian.com",
                "language": "english",
                "country": ["united kingdom"],
                "category": ["politics", "top"]
            }
        ],
        "nextPage": "1746540000123456789"
    }"#;

    #[test]
    fn test_interpret_fixture() {
        let page = interpret(&reply(200, FIXTURE)).unwrap();
        assert_eq!(page.articles.len(), 1);
        let a = &page.articles[0];
        assert_eq!(a.external_id, "9f1c2");
        assert_eq!(a.source_domain, "theguardian.com");
        assert_eq!(a.published_at.hour(), 14);
        assert_eq!(a.categories, vec!["politics".to_string(), "top".to_string()]);
        assert_eq!(page.next, Some(Cursor::Token("1746540000123456789".into())));
    }

    #[test]
    fn test_error_results_object() {
        let body = r#"{"status":"error","results":{"message":"API key is invalid","code":"Unauthorized"}}"#;
        let err = interpret(&reply(401, body)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Authentication);
        assert_eq!(err.message, "API key is invalid");

        let body = r#"{"status":"error","results":{"message":"Too many","code":"RateLimitExceeded"}}"#;
        let err = interpret(&reply(200, body)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::RateLimit);
    }

    #[test]
    fn test_results_must_be_array() {
        let err = interpret(&reply(200, r#"{"status":"success","results":"none"}"#)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedResponse);
    }

    #[test]
    fn test_kind_for_code() {
        assert_eq!(kind_for_code("UnsupportedFilter"), Some(ErrorKind::Validation));
        assert_eq!(kind_for_code("ServerError"), Some(ErrorKind::TransientServer));
        assert_eq!(kind_for_code("Mystery"), None);
    }
}
