//! # news_sift
//!
//! Pulls articles from several commercial news APIs, removes near-duplicate
//! stories by embedding similarity, ranks what is left and writes one
//! consolidated feed per run.
//!
//! ## Architecture
//!
//! 1. **Requests**: an ordered list of `(provider, parameters)` pairs, each
//!    validated against the provider's parameter schema
//! 2. **Fetching**: provider clients run concurrently under a bounded retry
//!    policy; one failing provider never sinks the run
//! 3. **Dedup**: articles are embedded and compared by cosine similarity,
//!    first seen wins
//! 4. **Ranking**: query relevance, recency, provider priority
//! 5. **Export**: a JSON feed grouped by date
//!
//! The [`pipeline::Orchestrator`] drives a run and publishes its status
//! through [`progress::ProgressStore`].

pub mod cli;
pub mod config;
pub mod dedup;
pub mod embedding;
pub mod error;
pub mod export;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod providers;
pub mod ranking;
pub mod retry;
pub mod utils;

pub use config::AppConfig;
pub use error::{ErrorKind, FetchError, PipelineError};
pub use models::{Article, FetchOutcome, RankedArticle, RequestSpec};
pub use pipeline::{Orchestrator, PipelineSettings, RunReport};
pub use progress::{RunState, RunStatus};
