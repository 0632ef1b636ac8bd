//! GNews (gnews.io, API v4).
//!
//! `query` selects `/search`; without it the client reads `/top-headlines`.
//! The key travels as the `apikey` query parameter. GNews answers 403 when
//! the daily quota is spent, which is a rate limit rather than a credential
//! problem.

use super::http::{self, Cursor, Page, Reply};
use super::schema::{FieldSpec, ParamSchema};
use super::{Endpoint, NewsProvider};
use crate::error::{ErrorKind, FetchError};
use crate::models::{ArticleDraft, FetchOutcome, ProviderRequest};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

/// Provider name used in requests, logs and failures.
pub const NAME: &str = "gnews";
pub const DEFAULT_BASE_URL: &str = "https://gnews.io/api/v4";
const MAX_PER_PAGE: usize = 100;

const CATEGORIES: &[&str] = &[
    "general",
    "world",
    "nation",
    "business",
    "technology",
    "entertainment",
    "sports",
    "science",
    "health",
];

const ALIASES: &[(&str, &str)] = &[
    ("tech", "technology"),
    ("sport", "sports"),
    ("finance", "business"),
    ("economy", "business"),
    ("medical", "health"),
    ("healthcare", "health"),
    ("politics", "nation"),
    ("national", "nation"),
    ("international", "world"),
    ("global", "world"),
];

const LANGUAGES: &[&str] = &[
    "ar", "zh", "nl", "en", "fr", "de", "el", "he", "hi", "it", "ja", "ml", "mr", "no", "pt",
    "ro", "ru", "es", "sv", "ta", "te", "uk",
];

static SCHEMA: Lazy<ParamSchema> = Lazy::new(|| {
    ParamSchema::new(
        NAME,
        vec![
            FieldSpec::text("query"),
            FieldSpec::one_of("language", LANGUAGES, &[]),
            FieldSpec::text("country"),
            FieldSpec::one_of("category", CATEGORIES, ALIASES),
            FieldSpec::date("from_date"),
            FieldSpec::date("to_date"),
            FieldSpec::integer("limit", 1, 1000),
        ],
    )
});

/// Accepted request parameters.
///
/// `category` takes the GNews names plus a few common aliases
/// (`tech` → `technology`, `politics` → `nation`). `limit` is the total
/// wanted across pages, not the page size.
pub fn schema() -> &'static ParamSchema {
    &SCHEMA
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Response {
    #[serde(default)]
    total_articles: Option<u64>,
    articles: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Item {
    id: Option<String>,
    title: Option<String>,
    description: Option<String>,
    content: Option<String>,
    url: Option<String>,
    published_at: Option<String>,
    source: Option<Source>,
    lang: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Source {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    errors: Value,
}

/// Client for the GNews v4 API.
///
/// Stateless apart from its [`Endpoint`]; one instance serves every gnews
/// request in a run and may be called concurrently.
#[derive(Debug)]
pub struct GNews {
    endpoint: Endpoint,
}

impl GNews {
    /// Create a client.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - Connection settings: HTTP client, base URL, key and
    ///   paging limits
    ///
    /// # Returns
    ///
    /// A client ready to register. A missing key is not an error here; each
    /// fetch fails with an authentication error instead.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let endpoint = Endpoint::new(client, NAME, DEFAULT_BASE_URL, &config);
    /// registry.register(Arc::new(GNews::new(endpoint)));
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
        let page = match cursor {
            Cursor::Page(n) => n,
            _ => 1,
        };
        let (path, query) = build_query(request, api_key, per_page, page);
        let builder = self.endpoint.client.get(self.endpoint.url(path)).query(&query);
        let reply = http::send(NAME, builder).await?;
        interpret(&reply, page, per_page, headline_category(request))
    }
}

/// Endpoint path and query pairs for one page.
fn build_query(
    request: &ProviderRequest,
    api_key: &str,
    per_page: usize,
    page: u32,
) -> (&'static str, Vec<(&'static str, String)>) {
    let mut query = vec![
        ("apikey", api_key.to_string()),
        ("max", per_page.to_string()),
        ("page", page.to_string()),
    ];
    let path = match request.query() {
        Some(q) => {
            query.push(("q", q.to_string()));
            "search"
        }
        None => {
            if let Some(category) = headline_category(request) {
                query.push(("category", category.to_string()));
            }
            "top-headlines"
        }
    };
    if let Some(lang) = request.text("language") {
        query.push(("lang", lang.to_string()));
    }
    if let Some(country) = request.text("country") {
        query.push(("country", country.to_lowercase()));
    }
    if let Some(from) = request.date("from_date") {
        query.push(("from", format!("{}T00:00:00Z", from.format("%Y-%m-%d"))));
    }
    if let Some(to) = request.date("to_date") {
        query.push(("to", format!("{}T23:59:59Z", to.format("%Y-%m-%d"))));
    }
    (path, query)
}

/// The category filter actually sent. Search ignores it, so only headline
/// requests carry one.
fn headline_category(request: &ProviderRequest) -> Option<&str> {
    match request.query() {
        Some(_) => None,
        None => request.text("category"),
    }
}

fn error_for(reply: &Reply) -> FetchError {
    let message = serde_json::from_str::<ErrorBody>(&reply.body)
        .ok()
        .map(|b| match b.errors {
            Value::Array(items) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                .collect::<Vec<_>>()
                .join("; "),
            other => other.to_string(),
        });
    let code_kind = (reply.status.as_u16() == 403).then_some(ErrorKind::RateLimit);
    reply.failure(NAME, code_kind, message)
}

fn interpret(
    reply: &Reply,
    page: u32,
    per_page: usize,
    category: Option<&str>,
) -> Result<Page, FetchError> {
    if !reply.is_success() {
        return Err(error_for(reply));
    }
    let body: Response = reply.decode(NAME)?;
    let Some(items) = body.articles else {
        return Err(error_for(reply));
    };

    let received = items.len();
    let articles = items
        .into_iter()
        .filter_map(|raw| match serde_json::from_value::<Item>(raw.clone()) {
            Ok(item) => Some(draft(item, raw, category)),
            Err(e) => {
                debug!(error = %e, "Skipping undecodable gnews item");
                None
            }
        })
        .filter_map(ArticleDraft::finish)
        .collect();

    let seen = page as u64 * per_page as u64;
    let more = received == per_page && body.total_articles.is_some_and(|total| total > seen);
    Ok(Page {
        articles,
        received,
        next: more.then(|| Cursor::Page(page + 1)),
    })
}

fn draft(item: Item, raw: Value, category: Option<&str>) -> ArticleDraft {
    ArticleDraft {
        external_id: item.id.or_else(|| item.url.clone()),
        title: item.title,
        body: item.description.or(item.content),
        url: item.url,
        published: item.published_at,
        source: item.source.and_then(|s| s.url),
        language: item.lang,
        categories: category.map(str::to_string).into_iter().collect(),
        ..ArticleDraft::new(NAME, raw)
    }
}

#[async_trait]
impl NewsProvider for GNews {
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

        info!(count = articles.len(), "Fetched gnews articles");
        Ok(articles)
    }
}
