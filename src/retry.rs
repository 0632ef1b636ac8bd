//! Bounded retry with exponential backoff for provider requests.
//!
//! [`RetryPolicy`] wraps a single [`NewsProvider::fetch`] call. Retryable
//! failures (transient server errors and rate limits by default) are retried
//! after a delay; anything else short-circuits on the first attempt.
//!
//! # Backoff Strategy
//!
//! ```text
//! delay = min(base_delay * multiplier^(attempt-1), max_wait) + random_jitter(0..=jitter)
//! ```
//!
//! A rate-limit failure that carries a retry-after hint waits for the hint
//! instead, capped at `max_wait`. The policy holds no state between calls.

use crate::config::RetryConfig;
use crate::error::ErrorKind;
use crate::models::{FetchOutcome, ProviderRequest};
use crate::providers::NewsProvider;
use rand::{Rng, rng};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    /// Upper bound of the random delay added to each computed backoff.
    pub jitter: Duration,
    /// Cap on any single wait.
    pub max_wait: Duration,
    pub retryable: Vec<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            multiplier: config.multiplier.max(1.0),
            jitter: Duration::from_millis(config.jitter_ms),
            max_wait: Duration::from_secs(config.max_wait_secs),
            retryable: vec![ErrorKind::TransientServer, ErrorKind::RateLimit],
        }
    }

    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.retryable.contains(&kind)
    }

    /// Computed backoff before retry number `attempt` (1-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exp);
        if !secs.is_finite() || secs >= self.max_wait.as_secs_f64() {
            self.max_wait
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    fn delay_for(&self, attempt: u32, kind: ErrorKind, retry_after: Option<Duration>) -> Duration {
        if kind == ErrorKind::RateLimit {
            if let Some(hint) = retry_after {
                return hint.min(self.max_wait);
            }
        }
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = Duration::from_millis(rng().random_range(0..=jitter_ms));
        self.backoff(attempt) + jitter
    }

    /// Run `provider.fetch(request)` under this policy.
    ///
    /// Returns the first success, the first non-retryable failure, or the
    /// last failure once attempts run out. The error's `attempts` field
    /// records how many calls were made. Cancellation stops the loop before
    /// the next sleep; an in-flight call is left to finish.
    #[instrument(level = "info", skip_all, fields(provider = %provider.name()))]
    pub async fn execute(
        &self,
        provider: &dyn NewsProvider,
        request: &ProviderRequest,
        cancel: &CancellationToken,
    ) -> FetchOutcome {
        let total_t0 = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let attempt_t0 = Instant::now();
            let mut err = match provider.fetch(request).await {
                Ok(articles) => {
                    if attempt > 1 {
                        info!(attempt, count = articles.len(), "Fetch succeeded after retry");
                    }
                    return Ok(articles);
                }
                Err(e) => e,
            };
            err.attempts = attempt;

            if !self.is_retryable(err.kind) {
                warn!(attempt, kind = %err.kind, error = %err.message, "Non-retryable failure");
                return Err(err);
            }
            if attempt >= self.max_attempts {
                error!(
                    attempt,
                    max = self.max_attempts,
                    elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                    kind = %err.kind,
                    error = %err.message,
                    "fetch() exhausted retries"
                );
                return Err(err);
            }
            if cancel.is_cancelled() {
                info!(attempt, "Run cancelled; not retrying");
                return Err(err);
            }

            let delay = self.delay_for(attempt, err.kind, err.retry_after);
            warn!(
                attempt,
                max = self.max_attempts,
                elapsed_ms_attempt = attempt_t0.elapsed().as_millis() as u64,
                ?delay,
                kind = %err.kind,
                error = %err.message,
                "fetch() attempt failed; backing off"
            );
            tokio::select! {
                _ = sleep(delay) => {}
                _ = cancel.cancelled() => {
                    info!(attempt, "Run cancelled during backoff");
                    return Err(err);
                }
            }
        }
    }
}
