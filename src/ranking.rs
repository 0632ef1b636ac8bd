//! Deterministic ordering of the deduplicated feed.
//!
//! Sort keys, in order:
//! 1. query relevance: keyword hits in title and body, more first
//! 2. publication time, newer first
//! 3. provider priority, lower first
//! 4. position in the merged input, earlier first
//!
//! The last key makes the order total, so `rank` is a pure function of its
//! input.

use crate::models::{Article, RankedArticle};
use crate::providers::DEFAULT_PRIORITY;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Reverse;
use std::collections::BTreeMap;

static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("valid token regex"));

/// Split a query into unique lowercase keywords.
pub fn keywords(query: &str) -> Vec<String> {
    TOKEN
        .find_iter(&query.to_lowercase())
        .map(|m| m.as_str().to_string())
        .unique()
        .collect()
}

/// Orders one run's articles. Holds the run's keywords and the provider
/// priorities; cheap to build per run.
#[derive(Debug, Clone, Default)]
pub struct Ranker {
    keywords: Vec<String>,
    priorities: BTreeMap<String, u32>,
}

impl Ranker {
    /// `queries` are the query terms of every request in the run.
    pub fn new<'a>(
        queries: impl IntoIterator<Item = &'a str>,
        priorities: BTreeMap<String, u32>,
    ) -> Self {
        let keywords = queries
            .into_iter()
            .flat_map(keywords)
            .unique()
            .collect();
        Self {
            keywords,
            priorities,
        }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Keyword occurrences in the article's title and body.
    pub fn relevance(&self, article: &Article) -> usize {
        if self.keywords.is_empty() {
            return 0;
        }
        let haystack = format!("{}\n{}", article.title, article.body).to_lowercase();
        self.keywords
            .iter()
            .map(|kw| haystack.matches(kw.as_str()).count())
            .sum()
    }

    fn priority(&self, provider: &str) -> u32 {
        self.priorities
            .get(provider)
            .copied()
            .unwrap_or(DEFAULT_PRIORITY)
    }

    /// Sort `articles` by the module's key order and number them.
    ///
    /// # Arguments
    ///
    /// * `articles` - Deduplicated articles in merge order. The order matters
    ///   only as the final tie-break.
    ///
    /// # Returns
    ///
    /// The same articles, each wrapped with its 1-based `rank` and its
    /// `relevance` score.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let ranker = Ranker::new(["interest rates"], priorities);
    /// let ranked = ranker.rank(report.admitted);
    /// assert_eq!(ranked[0].rank, 1);
    /// ```
    pub fn rank(&self, articles: Vec<Article>) -> Vec<RankedArticle> {
        articles
            .into_iter()
            .enumerate()
            .map(|(idx, article)| {
                let relevance = self.relevance(&article);
                let priority = self.priority(&article.provider);
                (idx, relevance, priority, article)
            })
            .sorted_by_key(|(idx, relevance, priority, article)| {
                (Reverse(*relevance), Reverse(article.published_at), *priority, *idx)
            })
            .enumerate()
            .map(|(pos, (_, relevance, _, article))| RankedArticle {
                rank: pos + 1,
                relevance,
                article,
            })
            .collect()
    }
}
