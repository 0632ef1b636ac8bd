//! Mediastack (mediastack.com, API v1).
//!
//! Single `/news` endpoint, key in `access_key`, offset pagination driven by
//! the `pagination` block. Errors arrive as `{"error":{"code","message"}}`,
//! sometimes with a 200 status.

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
pub const NAME: &str = "mediastack";
pub const DEFAULT_BASE_URL: &str = "http://api.mediastack.com/v1";
const MAX_PER_PAGE: usize = 100;

const CATEGORIES: &[&str] = &[
    "general",
    "business",
    "entertainment",
    "health",
    "science",
    "sports",
    "technology",
];

const LANGUAGES: &[&str] = &[
    "ar", "de", "en", "es", "fr", "he", "it", "nl", "no", "pt", "ru", "se", "zh",
];

static SCHEMA: Lazy<ParamSchema> = Lazy::new(|| {
    ParamSchema::new(
        NAME,
        vec![
            FieldSpec::text("query"),
            FieldSpec::one_of("language", LANGUAGES, &[]),
            FieldSpec::text("country"),
            FieldSpec::one_of("category", CATEGORIES, CATEGORY_ALIASES),
            FieldSpec::text("sources"),
            FieldSpec::date("from_date"),
            FieldSpec::date("to_date"),
            FieldSpec::integer("limit", 1, 1000),
        ],
    )
});

/// Accepted request parameters.
pub fn schema() -> &'static ParamSchema {
    &SCHEMA
}

#[derive(Debug, Deserialize)]
struct Response {
    pagination: Option<Pagination>,
    data: Option<Vec<Value>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    offset: u32,
    count: u32,
    total: u32,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
    source: Option<String>,
    category: Option<String>,
    language: Option<String>,
    published_at: Option<String>,
}

fn kind_for_code(code: &str) -> Option<ErrorKind> {
    match code {
        "invalid_access_key" | "missing_access_key" | "inactive_user"
        | "https_access_restricted" | "function_access_restricted" => {
            Some(ErrorKind::Authentication)
        }
        "usage_limit_reached" | "rate_limit_reached" => Some(ErrorKind::RateLimit),
        "invalid_api_function" | "404_not_found" | "validation_error" => {
            Some(ErrorKind::Validation)
        }
        "internal_error" => Some(ErrorKind::TransientServer),
        _ => None,
    }
}

/// Client for the Mediastack v1 API.
///
/// The free tier only serves plain HTTP, hence the default base URL.
/// Pagination follows the offset the service reports, not the one we sent.
#[derive(Debug)]
pub struct Mediastack {
    endpoint: Endpoint,
}

impl Mediastack {
    /// Create a client from its connection settings.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - HTTP client, base URL, `access_key` and paging limits
    ///
    /// # Returns
    ///
    /// A client that reads `/news`.
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
        let offset = match cursor {
            Cursor::Offset(n) => n,
            _ => 0,
        };
        let query = build_query(request, api_key, per_page, offset);
        let builder = self.endpoint.client.get(self.endpoint.url("news")).query(&query);
        let reply = http::send(NAME, builder).await?;
        interpret(&reply)
    }
}

fn build_query(
    request: &ProviderRequest,
    api_key: &str,
    per_page: usize,
    offset: u32,
) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("access_key", api_key.to_string()),
        ("limit", per_page.to_string()),
        ("offset", offset.to_string()),
        ("sort", "published_desc".to_string()),
    ];
    if let Some(q) = request.query() {
        query.push(("keywords", q.to_string()));
    }
    if let Some(category) = request.text("category") {
        query.push(("categories", category.to_string()));
    }
    if let Some(lang) = request.text("language") {
        query.push(("languages", lang.to_string()));
    }
    if let Some(country) = request.text("country") {
        query.push(("countries", country.to_lowercase()));
    }
    if let Some(sources) = request.text("sources") {
        query.push(("sources", sources.to_string()));
    }
    match (request.date("from_date"), request.date("to_date")) {
        (Some(from), Some(to)) => query.push((
            "date",
            format!("{},{}", from.format("%Y-%m-%d"), to.format("%Y-%m-%d")),
        )),
        (Some(day), None) | (None, Some(day)) => {
            query.push(("date", day.format("%Y-%m-%d").to_string()))
        }
        (None, None) => {}
    }
    query
}

fn interpret(reply: &Reply) -> Result<Page, FetchError> {
    let body: Option<Response> = serde_json::from_str(&reply.body).ok();

    if let Some(err) = body.as_ref().and_then(|b| b.error.as_ref()) {
        let code_kind = err.code.as_deref().and_then(kind_for_code);
        return Err(reply.failure(NAME, code_kind, err.message.clone()));
    }
    if !reply.is_success() {
        return Err(reply.failure(NAME, None, None));
    }

    let body: Response = match body {
        Some(b) => b,
        None => reply.decode(NAME)?,
    };
    let Some(items) = body.data else {
        return Err(FetchError::malformed(NAME, "response has no data array"));
    };

    let received = items.len();
    let articles = items
        .into_iter()
        .filter_map(|raw| match serde_json::from_value::<Item>(raw.clone()) {
            Ok(item) => Some(draft(item, raw)),
            Err(e) => {
                debug!(error = %e, "Skipping undecodable mediastack item");
                None
            }
        })
        .filter_map(ArticleDraft::finish)
        .collect();

    let next = body.pagination.and_then(|p| {
        let next = p.offset.checked_add(p.count)?;
        (p.count > 0 && next < p.total).then_some(Cursor::Offset(next))
    });
    Ok(Page {
        articles,
        received,
        next,
    })
}

fn draft(item: Item, raw: Value) -> ArticleDraft {
    ArticleDraft {
        external_id: item.url.clone(),
        title: item.title,
        body: item.description,
        url: item.url,
        published: item.published_at,
        source: item.source,
        language: item.language,
        categories: item.category.into_iter().collect(),
        ..ArticleDraft::new(NAME, raw)
    }
}

#[async_trait]
impl NewsProvider for Mediastack {
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

        info!(count = articles.len(), "Fetched mediastack articles");
        Ok(articles)
    }
}
