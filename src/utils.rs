//! Helpers for text cleanup, timestamp parsing, and log formatting.
//!
//! Providers disagree on almost every surface detail: some send HTML in
//! their descriptions, timestamps arrive as RFC 3339, naive `YYYY-MM-DD
//! HH:MM:SS` or bare dates, and source domains come with or without `www.`.
//! The functions here smooth those differences over before an article is
//! admitted into a run.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use scraper::Html;
use std::fs as stdfs;
use tokio::fs;
use tracing::{info, instrument};

/// Truncate a string for logging purposes.
///
/// Long strings are cut to at most `max` bytes (backing off to the nearest
/// character boundary) with an ellipsis and byte count appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…(+{} bytes)", &s[..end], s.len() - end)
}

/// Strip markup and collapse whitespace.
///
/// Text containing tags or entities goes through an HTML fragment parse so
/// `<p>Fed &amp; banks</p>` becomes `Fed & banks`. Plain text only gets its
/// whitespace normalised.
pub fn clean_text(raw: &str) -> String {
    let text = if raw.contains('<') || raw.contains('&') {
        let fragment = Html::parse_fragment(raw);
        fragment.root_element().text().collect::<Vec<_>>().join(" ")
    } else {
        raw.to_string()
    };
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse a provider timestamp into UTC.
///
/// Accepts RFC 3339 (`2025-05-06T14:03:00Z`, `+00:00` offsets), the naive
/// `2025-05-06 14:03:00` form (assumed UTC), naive ISO with fractional
/// seconds, and bare dates (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Extract the host of a URL without a leading `www.`.
///
/// `https://www.reuters.com/world/x` yields `reuters.com`; a string that is
/// not an absolute URL but looks like a bare domain is returned lowercased.
pub fn source_domain(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let host = match url::Url::parse(raw) {
        Ok(parsed) => parsed.host_str()?.to_lowercase(),
        Err(_) if raw.contains('.') && !raw.contains(' ') => raw.to_lowercase(),
        Err(_) => return None,
    };
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then writes and removes a scratch file.
#[instrument(level = "info", skip_all, fields(path = %path))]
pub async fn ensure_writable_dir(path: &str) -> Result<(), std::io::Error> {
    fs::create_dir_all(path).await?;
    let scratch_path = format!("{}/..__write_check__", path.trim_end_matches('/'));
    stdfs::File::create(&scratch_path)?;
    let _ = stdfs::remove_file(&scratch_path);
    info!("Output directory is writable");
    Ok(())
}
