//! NewsAPI (newsapi.org, API v2).
//!
//! `/everything` when a `query` is given, `/top-headlines` otherwise. The key
//! goes in the `X-Api-Key` header. Errors come back as
//! `{"status":"error","code":"...","message":"..."}` and the code is more
//! precise than the status, so it wins.

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
pub const NAME: &str = "newsapi";
pub const DEFAULT_BASE_URL: &str = "https://newsapi.org/v2";
const MAX_PER_PAGE: usize = 100;

/// Placeholder title NewsAPI uses for articles pulled by the publisher.
const REMOVED: &str = "[Removed]";

const CATEGORIES: &[&str] = &[
    "business",
    "entertainment",
    "general",
    "health",
    "science",
    "sports",
    "technology",
];

const LANGUAGES: &[&str] = &[
    "ar", "de", "en", "es", "fr", "he", "it", "nl", "no", "pt", "ru", "sv", "ud", "zh",
];

static SCHEMA: Lazy<ParamSchema> = Lazy::new(|| {
    ParamSchema::new(
        NAME,
        vec![
            FieldSpec::text("query"),
            FieldSpec::one_of("language", LANGUAGES, &[]),
            FieldSpec::text("country"),
            FieldSpec::one_of("category", CATEGORIES, CATEGORY_ALIASES),
            FieldSpec::text("domains"),
            FieldSpec::text("sources"),
            FieldSpec::date("from_date"),
            FieldSpec::date("to_date"),
            FieldSpec::integer("limit", 1, 500),
        ],
    )
});

/// Accepted request parameters. `sources` cannot be combined with
/// `country` or `category`; when both are given `sources` wins.
pub fn schema() -> &'static ParamSchema {
    &SCHEMA
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Response {
    status: Option<String>,
    total_results: Option<u64>,
    articles: Option<Vec<Value>>,
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Item {
    title: Option<String>,
    description: Option<String>,
    content: Option<String>,
    url: Option<String>,
    published_at: Option<String>,
}

fn kind_for_code(code: &str) -> Option<ErrorKind> {
    match code {
        "apiKeyDisabled" | "apiKeyInvalid" | "apiKeyMissing" => Some(ErrorKind::Authentication),
        "apiKeyExhausted" | "rateLimited" => Some(ErrorKind::RateLimit),
        "parameterInvalid" | "parametersMissing" | "sourcesTooMany" | "sourceDoesNotExist"
        | "parametersIncompatible" => Some(ErrorKind::Validation),
        "unexpectedError" => Some(ErrorKind::TransientServer),
        _ => None,
    }
}

/// Client for the NewsAPI v2 API.
///
/// Articles the publisher withdrew come back titled `[Removed]`; they are
/// counted towards the page but never emitted.
#[derive(Debug)]
pub struct NewsApi {
    endpoint: Endpoint,
}

impl NewsApi {
    /// Create a client.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - Connection settings; the key is sent as `X-Api-Key`
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
        let (path, query) = build_query(request, per_page, page);
        let builder = self
            .endpoint
            .client
            .get(self.endpoint.url(path))
            .header("X-Api-Key", api_key)
            .query(&query);
        let reply = http::send(NAME, builder).await?;
        interpret(&reply, page, per_page, headline_category(request))
    }
}

/// Requests with any of these go to `/everything`.
fn is_everything(request: &ProviderRequest) -> bool {
    request.query().is_some()
        || request.text("domains").is_some()
        || request.date("from_date").is_some()
}

/// The category filter actually sent: headlines only, and never together
/// with `sources`.
fn headline_category(request: &ProviderRequest) -> Option<&str> {
    if is_everything(request) || request.text("sources").is_some() {
        return None;
    }
    request.text("category")
}

fn build_query(
    request: &ProviderRequest,
    per_page: usize,
    page: u32,
) -> (&'static str, Vec<(&'static str, String)>) {
    let mut query = vec![
        ("pageSize", per_page.to_string()),
        ("page", page.to_string()),
    ];
    let everything = is_everything(request);

    if let Some(q) = request.query() {
        query.push(("q", q.to_string()));
    }
    if let Some(sources) = request.text("sources") {
        query.push(("sources", sources.to_string()));
    }

    let path = if everything {
        if let Some(lang) = request.text("language") {
            query.push(("language", lang.to_string()));
        }
        if let Some(domains) = request.text("domains") {
            query.push(("domains", domains.to_string()));
        }
        if let Some(from) = request.date("from_date") {
            query.push(("from", from.format("%Y-%m-%d").to_string()));
        }
        if let Some(to) = request.date("to_date") {
            query.push(("to", to.format("%Y-%m-%d").to_string()));
        }
        query.push(("sortBy", "publishedAt".to_string()));
        "everything"
    } else {
        // sources cannot be mixed with country or category on this endpoint
        if request.text("sources").is_none() {
            if let Some(country) = request.text("country") {
                query.push(("country", country.to_lowercase()));
            }
            if let Some(category) = headline_category(request) {
                query.push(("category", category.to_string()));
            }
        }
        "top-headlines"
    };
    (path, query)
}

fn interpret(
    reply: &Reply,
    page: u32,
    per_page: usize,
    category: Option<&str>,
) -> Result<Page, FetchError> {
    let body: Option<Response> = serde_json::from_str(&reply.body).ok();

    let is_error = !reply.is_success()
        || body
            .as_ref()
            .is_some_and(|b| b.status.as_deref() == Some("error"));
    if is_error {
        let (code_kind, message) = match &body {
            Some(b) => (
                b.code.as_deref().and_then(kind_for_code),
                b.message.clone(),
            ),
            None => (None, None),
        };
        return Err(reply.failure(NAME, code_kind, message));
    }

    let body: Response = match body {
        Some(b) => b,
        None => reply.decode(NAME)?,
    };
    let Some(items) = body.articles else {
        return Err(FetchError::malformed(NAME, "response has no articles array"));
    };

    let received = items.len();
    let articles = items
        .into_iter()
        .filter_map(|raw| match serde_json::from_value::<Item>(raw.clone()) {
            Ok(item) if item.title.as_deref() == Some(REMOVED) => None,
            Ok(item) => Some(draft(item, raw, category)),
            Err(e) => {
                debug!(error = %e, "Skipping undecodable newsapi item");
                None
            }
        })
        .filter_map(ArticleDraft::finish)
        .collect();

    let seen = page as u64 * per_page as u64;
    let more = received == per_page && body.total_results.is_some_and(|total| total > seen);
    Ok(Page {
        articles,
        received,
        next: more.then(|| Cursor::Page(page + 1)),
    })
}

fn draft(item: Item, raw: Value, category: Option<&str>) -> ArticleDraft {
    ArticleDraft {
        external_id: item.url.clone(),
        title: item.title,
        body: item.description.or(item.content),
        url: item.url,
        published: item.published_at,
        categories: category.map(str::to_string).into_iter().collect(),
        ..ArticleDraft::new(NAME, raw)
    }
}

#[async_trait]
impl NewsProvider for NewsApi {
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

        info!(count = articles.len(), "Fetched newsapi articles");
        Ok(articles)
    }
}
