//! HTTP plumbing shared by every provider client.
//!
//! A client builds its `reqwest::RequestBuilder`, hands it to [`send`], and
//! gets back the raw status, body and retry-after hint. Status codes map onto
//! the shared taxonomy through [`kind_for_status`]; providers that report
//! errors in the body refine that with their own code tables before calling
//! [`Reply::failure`]. Multi-page fetches go through [`collect_pages`].

use crate::error::{ErrorKind, FetchError};
use crate::models::{Article, FetchOutcome};
use crate::utils::truncate_for_log;
use chrono::{DateTime, Utc};
use reqwest::header::RETRY_AFTER;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Map an HTTP status onto an [`ErrorKind`].
///
/// 401/403 are credential problems, 429 is rate limiting, 408 and 5xx are
/// transient, any other 4xx means the request itself was wrong. A 2xx that
/// still ended up here carried an error body we could not make sense of.
pub fn kind_for_status(status: u16) -> ErrorKind {
    match status {
        401 | 403 => ErrorKind::Authentication,
        429 => ErrorKind::RateLimit,
        408 => ErrorKind::TransientServer,
        500..=599 => ErrorKind::TransientServer,
        400..=499 => ErrorKind::Validation,
        _ => ErrorKind::MalformedResponse,
    }
}

/// Parse a `Retry-After` header: either delta-seconds or an HTTP-date.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((when - now).to_std().unwrap_or(Duration::ZERO))
}

/// A completed HTTP exchange.
#[derive(Debug)]
pub struct Reply {
    pub status: StatusCode,
    pub retry_after: Option<Duration>,
    pub body: String,
}

impl Reply {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Decode the body, classifying failure as a malformed response.
    pub fn decode<T: DeserializeOwned>(&self, provider: &str) -> Result<T, FetchError> {
        serde_json::from_str(&self.body).map_err(|e| {
            warn!(
                provider,
                error = %e,
                body_preview = %truncate_for_log(&self.body, 300),
                "Undecodable provider response"
            );
            FetchError::malformed(provider, format!("undecodable response: {e}"))
                .with_status(self.status.as_u16())
        })
    }

    /// Build the failure for this reply.
    ///
    /// `code_kind` is the provider's reading of its own error code and wins
    /// over the status mapping when present.
    pub fn failure(
        &self,
        provider: &str,
        code_kind: Option<ErrorKind>,
        message: Option<String>,
    ) -> FetchError {
        let status = self.status.as_u16();
        let kind = code_kind.unwrap_or_else(|| kind_for_status(status));
        let message = message.unwrap_or_else(|| {
            format!("HTTP {status}: {}", truncate_for_log(self.body.trim(), 200))
        });
        FetchError::new(kind, provider, message)
            .with_status(status)
            .with_retry_after(self.retry_after)
    }
}

/// Send a request and read the whole body.
///
/// Only transport problems are errors here; a non-2xx status still comes
/// back as a [`Reply`] so the caller can read the provider's error body.
pub async fn send(provider: &str, request: RequestBuilder) -> Result<Reply, FetchError> {
    let t0 = Instant::now();
    let response = request
        .send()
        .await
        .map_err(|e| FetchError::from_transport(provider, &e))?;

    let status = response.status();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_retry_after(v, Utc::now()));
    let body = response
        .text()
        .await
        .map_err(|e| FetchError::from_transport(provider, &e))?;

    debug!(
        provider,
        status = status.as_u16(),
        bytes = body.len(),
        elapsed_ms = t0.elapsed().as_millis() as u64,
        "Provider responded"
    );
    Ok(Reply {
        status,
        retry_after,
        body,
    })
}

/// Position of the next page to request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    Start,
    Page(u32),
    Offset(u32),
    Token(String),
}

/// One page of normalized results.
#[derive(Debug, Default)]
pub struct Page {
    pub articles: Vec<Article>,
    /// Items on the wire before normalization dropped any.
    pub received: usize,
    pub next: Option<Cursor>,
}

/// Walk pages until `limit` articles are collected, the provider runs dry,
/// or `max_pages` requests have been made.
///
/// Any failing page fails the whole outcome; articles from earlier pages
/// are discarded with it.
pub async fn collect_pages<F, Fut>(limit: usize, max_pages: u32, mut fetch_page: F) -> FetchOutcome
where
    F: FnMut(Cursor) -> Fut,
    Fut: Future<Output = Result<Page, FetchError>>,
{
    let mut articles = Vec::new();
    let mut cursor = Cursor::Start;

    for _ in 0..max_pages.max(1) {
        let page = fetch_page(cursor).await?;
        let exhausted = page.received == 0;
        articles.extend(page.articles);
        if exhausted || articles.len() >= limit {
            break;
        }
        match page.next {
            Some(next) => cursor = next,
            None => break,
        }
    }

    articles.truncate(limit);
    Ok(articles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ArticleDraft;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn article(n: usize) -> Article {
        ArticleDraft {
            title: Some(format!("Story {n}")),
            published: Some("2025-05-06T00:00:00Z".to_string()),
            ..ArticleDraft::new("test", json!({}))
        }
        .finish()
        .unwrap()
    }

    fn reply(status: u16, body: &str) -> Reply {
        Reply {
            status: StatusCode::from_u16(status).unwrap(),
            retry_after: None,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_kind_for_status() {
        assert_eq!(kind_for_status(401), ErrorKind::Authentication);
        assert_eq!(kind_for_status(403), ErrorKind::Authentication);
        assert_eq!(kind_for_status(429), ErrorKind::RateLimit);
        assert_eq!(kind_for_status(408), ErrorKind::TransientServer);
        assert_eq!(kind_for_status(503), ErrorKind::TransientServer);
        assert_eq!(kind_for_status(400), ErrorKind::Validation);
        assert_eq!(kind_for_status(422), ErrorKind::Validation);
        assert_eq!(kind_for_status(200), ErrorKind::MalformedResponse);
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(
            parse_retry_after("120", Utc::now()),
            Some(Duration::from_secs(120))
        );
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 27, 30).unwrap();
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT", now),
            Some(Duration::from_secs(30))
        );
        let later = Utc.with_ymd_and_hms(2015, 10, 21, 8, 0, 0).unwrap();
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT", later),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("soon", now), None);
    }

    #[test]
    fn test_reply_failure_prefers_code_kind() {
        let r = reply(400, "{}");
        let err = r.failure("p", Some(ErrorKind::RateLimit), Some("slow down".into()));
        assert_eq!(err.kind, ErrorKind::RateLimit);
        assert_eq!(err.status, Some(400));
        assert_eq!(err.message, "slow down");

        let err = reply(502, "bad gateway").failure("p", None, None);
        assert_eq!(err.kind, ErrorKind::TransientServer);
        assert!(err.message.contains("bad gateway"));
    }

    #[test]
    fn test_reply_decode_malformed() {
        #[derive(serde::Deserialize, Debug)]
        #[allow(dead_code)]
        struct Body {
            items: Vec<String>,
        }
        let err = reply(200, "<html>oops</html>").decode::<Body>("p").unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedResponse);
    }

    #[tokio::test]
    async fn test_collect_pages_stops_at_limit() {
        let calls = AtomicU32::new(0);
        let out = collect_pages(5, 10, |cursor| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                let expected = if n == 0 { Cursor::Start } else { Cursor::Page(n + 1) };
                assert_eq!(cursor, expected);
                Ok(Page {
                    articles: (0..3).map(article).collect(),
                    received: 3,
                    next: Some(Cursor::Page(n + 2)),
                })
            }
        })
        .await
        .unwrap();
        assert_eq!(out.len(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_collect_pages_stops_when_exhausted() {
        let calls = AtomicU32::new(0);
        let out = collect_pages(50, 10, |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                let received = if n == 0 { 2 } else { 0 };
                Ok(Page {
                    articles: (0..received).map(article).collect(),
                    received,
                    next: Some(Cursor::Offset(2)),
                })
            }
        })
        .await
        .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_collect_pages_failure_discards_earlier_pages() {
        let calls = AtomicU32::new(0);
        let outcome = collect_pages(50, 10, |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Ok(Page {
                        articles: vec![article(0)],
                        received: 1,
                        next: Some(Cursor::Page(2)),
                    })
                } else {
                    Err(FetchError::transient("p", "boom"))
                }
            }
        })
        .await;
        assert_eq!(outcome.unwrap_err().kind, ErrorKind::TransientServer);
    }

    fn short_timeout_client() -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(Duration::from_millis(50))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_send_timeout_is_transient() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept and hold every connection without ever writing a response.
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client = short_timeout_client();
        let err = send("slowpoke", client.get(format!("http://{addr}/news")))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::TransientServer);
        assert_eq!(err.provider, "slowpoke");
        assert_eq!(err.status, None);
        server.abort();
    }

    #[tokio::test]
    async fn test_send_refused_connection_is_transient() {
        let addr = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let client = short_timeout_client();
        let err = send("gone", client.get(format!("http://{addr}/news")))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::TransientServer);
        assert!(err.kind.is_retryable_by_default());
    }
}
