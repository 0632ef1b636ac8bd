//! TheNewsAPI (thenewsapi.com, API v1).
//!
//! `/news/all` when searching, `/news/top` otherwise. Page-number pagination
//! with totals in the `meta` block. Note this provider spells its technology
//! category `tech`.

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
pub const NAME: &str = "thenewsapi";
pub const DEFAULT_BASE_URL: &str = "https://api.thenewsapi.com/v1";
const MAX_PER_PAGE: usize = 50;

const CATEGORIES: &[&str] = &[
    "general",
    "science",
    "sports",
    "business",
    "health",
    "entertainment",
    "tech",
    "politics",
    "food",
    "travel",
];

const ALIASES: &[(&str, &str)] = &[
    ("technology", "tech"),
    ("sport", "sports"),
    ("finance", "business"),
    ("economy", "business"),
    ("medical", "health"),
    ("healthcare", "health"),
    ("national", "politics"),
];

static SCHEMA: Lazy<ParamSchema> = Lazy::new(|| {
    ParamSchema::new(
        NAME,
        vec![
            FieldSpec::text("query"),
            FieldSpec::text("language"),
            FieldSpec::text("country"),
            FieldSpec::one_of("category", CATEGORIES, ALIASES),
            FieldSpec::text("domains"),
            FieldSpec::date("from_date"),
            FieldSpec::date("to_date"),
            FieldSpec::integer("limit", 1, 1000),
        ],
    )
});

/// Accepted request parameters. `category` accepts `technology` as an
/// alias for this provider's `tech`.
pub fn schema() -> &'static ParamSchema {
    &SCHEMA
}

#[derive(Debug, Deserialize)]
struct Response {
    meta: Option<Meta>,
    data: Option<Vec<Value>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Meta {
    found: u64,
    returned: u64,
    page: u32,
    limit: u64,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Item {
    uuid: Option<String>,
    title: Option<String>,
    description: Option<String>,
    snippet: Option<String>,
    url: Option<String>,
    language: Option<String>,
    published_at: Option<String>,
    source: Option<String>,
    #[serde(default)]
    categories: Vec<String>,
}

fn kind_for_code(code: &str) -> Option<ErrorKind> {
    match code {
        "invalid_api_token" | "endpoint_access_restricted" => Some(ErrorKind::Authentication),
        "usage_limit_reached" | "rate_limit_reached" => Some(ErrorKind::RateLimit),
        "malformed_parameters" | "invalid_parameters" | "resource_not_found" => {
            Some(ErrorKind::Validation)
        }
        "server_error" | "maintenance_mode" => Some(ErrorKind::TransientServer),
        _ => None,
    }
}

/// Client for the TheNewsAPI v1 API.
///
/// Searches go to `/news/all`, everything else to `/news/top`. Paging stops
/// once the `meta` totals say nothing is left, or when they stop making
/// arithmetic sense.
#[derive(Debug)]
pub struct TheNewsApi {
    endpoint: Endpoint,
}

impl TheNewsApi {
    /// Create a client.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - Connection settings; the key is sent as `api_token`
    ///
    /// # Returns
    ///
    /// A client for one provider slot in the registry.
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
        interpret(&reply)
    }
}

fn build_query(
    request: &ProviderRequest,
    api_key: &str,
    per_page: usize,
    page: u32,
) -> (&'static str, Vec<(&'static str, String)>) {
    let mut query = vec![
        ("api_token", api_key.to_string()),
        ("limit", per_page.to_string()),
        ("page", page.to_string()),
    ];
    let path = match request.query() {
        Some(q) => {
            query.push(("search", q.to_string()));
            "news/all"
        }
        None => "news/top",
    };
    if let Some(lang) = request.text("language") {
        query.push(("language", lang.to_lowercase()));
    }
    if let Some(country) = request.text("country") {
        query.push(("locale", country.to_lowercase()));
    }
    if let Some(category) = request.text("category") {
        query.push(("categories", category.to_string()));
    }
    if let Some(domains) = request.text("domains") {
        query.push(("domains", domains.to_string()));
    }
    if let Some(from) = request.date("from_date") {
        query.push(("published_after", from.format("%Y-%m-%d").to_string()));
    }
    if let Some(to) = request.date("to_date") {
        query.push(("published_before", to.format("%Y-%m-%d").to_string()));
    }
    (path, query)
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
                debug!(error = %e, "Skipping undecodable thenewsapi item");
                None
            }
        })
        .filter_map(ArticleDraft::finish)
        .collect();

    let next = body.meta.and_then(|m| {
        let seen = u64::from(m.page.saturating_sub(1))
            .checked_mul(m.limit)?
            .checked_add(m.returned)?;
        let page = m.page.checked_add(1)?;
        (m.returned > 0 && seen < m.found).then_some(Cursor::Page(page))
    });
    Ok(Page {
        articles,
        received,
        next,
    })
}

fn draft(item: Item, raw: Value) -> ArticleDraft {
    ArticleDraft {
        external_id: item.uuid,
        title: item.title,
        body: item.description.or(item.snippet),
        url: item.url,
        published: item.published_at,
        source: item.source,
        language: item.language,
        categories: item.categories,
        ..ArticleDraft::new(NAME, raw)
    }
}

#[async_trait]
impl NewsProvider for TheNewsApi {
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

        info!(count = articles.len(), "Fetched thenewsapi articles");
        Ok(articles)
    }
}
