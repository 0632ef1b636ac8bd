//! Run orchestration: fetch, merge, dedup, rank, export.
//!
//! An [`Orchestrator`] owns the collaborators of a run and exposes the
//! control surface: [`Orchestrator::trigger_run`], [`Orchestrator::get_status`]
//! and [`Orchestrator::cancel_run`]. At most one run is active at a time; the
//! claim on the run slot lives in the [`ProgressStore`].
//!
//! ## Run flow
//!
//! 1. **Load**: read the configured request list. A failure here fails the
//!    run before any provider is contacted.
//! 2. **Fetch**: resolve every request against the registry and execute it
//!    through the retry policy, at most `workers` at a time. Each request
//!    yields one outcome; a failed request never aborts the others.
//! 3. **Merge**: concatenate successful outcomes in configured request
//!    order, so the result does not depend on completion order, then apply
//!    the `max_articles` cap.
//! 4. **Dedup**: drop near-duplicates, first seen wins.
//! 5. **Rank**: order the survivors by relevance, recency and priority.
//! 6. **Export**: hand the edition to the exporter, unless this is a dry run.
//!
//! A run that reaches the end is `Completed`, even when every provider
//! failed or the export did not succeed; those are reported in the status.
//! Cancellation stops new requests from starting and fails the run. It is
//! honoured at every stage up to and including export; a cancel that lands
//! while the exporter is writing abandons the write.

use crate::config::{PipelineConfig, RequestSource};
use crate::dedup::{DedupEngine, DuplicateRecord};
use crate::embedding::Embedder;
use crate::error::{FetchError, PipelineError};
use crate::export::Exporter;
use crate::models::{Edition, FetchOutcome, ProviderFailure, RankedArticle, RequestSpec};
use crate::progress::{ProgressStore, RunState, RunStatus, Stage};
use crate::providers::ProviderRegistry;
use crate::ranking::Ranker;
use crate::retry::RetryPolicy;
use chrono::Utc;
use futures::FutureExt;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Tunables of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Provider requests in flight at once.
    pub workers: usize,
    pub dedup_threshold: f32,
    pub max_articles: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for PipelineSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            dedup_threshold: config.dedup_threshold,
            max_articles: config.max_articles,
        }
    }
}

/// The outcome of one configured request.
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    /// Position in the configured request list.
    pub index: usize,
    pub provider: String,
    pub outcome: FetchOutcome,
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub dry_run: bool,
    pub state: RunState,
    pub message: String,
    /// Collected outcomes in request order. After a cancel this holds only
    /// the requests that finished before it.
    pub outcomes: Vec<RequestOutcome>,
    pub failures: Vec<ProviderFailure>,
    pub duplicates: Vec<DuplicateRecord>,
    pub articles: Vec<RankedArticle>,
    pub export_location: Option<String>,
    pub export_error: Option<String>,
}

impl RunReport {
    fn new(run_id: Uuid, dry_run: bool) -> Self {
        Self {
            run_id,
            dry_run,
            state: RunState::Running,
            message: String::new(),
            outcomes: Vec::new(),
            failures: Vec::new(),
            duplicates: Vec::new(),
            articles: Vec::new(),
            export_location: None,
            export_error: None,
        }
    }
}

struct ActiveRun {
    run_id: Uuid,
    cancel: CancellationToken,
    handle: Option<JoinHandle<RunReport>>,
}

/// Drives ingestion runs and owns everything a run needs.
///
/// Share it behind an `Arc`: [`Orchestrator::trigger_run`] spawns the run on
/// a background task that holds its own clone, while the caller keeps
/// polling [`Orchestrator::get_status`] or calls
/// [`Orchestrator::cancel_run`].
pub struct Orchestrator {
    registry: ProviderRegistry,
    retry: RetryPolicy,
    embedder: Arc<dyn Embedder>,
    exporter: Arc<dyn Exporter>,
    source: Arc<dyn RequestSource>,
    progress: Arc<ProgressStore>,
    settings: PipelineSettings,
    active: Mutex<Option<ActiveRun>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("embedder", &self.embedder.id())
            .field("settings", &self.settings)
            .finish()
    }
}

impl Orchestrator {
    /// Assemble an orchestrator with default retry and pipeline settings.
    ///
    /// # Arguments
    ///
    /// * `registry` - Providers that requests may name
    /// * `embedder` - Backend used for duplicate detection
    /// * `exporter` - Destination for the finished edition
    /// * `source` - Where the request list is read at the start of each run
    ///
    /// # Returns
    ///
    /// An idle orchestrator. Adjust it with [`Orchestrator::with_retry`],
    /// [`Orchestrator::with_settings`] and [`Orchestrator::with_progress`]
    /// before wrapping it in an `Arc`.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let orchestrator = Arc::new(
    ///     Orchestrator::new(registry, embedder, exporter, source)
    ///         .with_retry(RetryPolicy::from_config(&config.retry))
    ///         .with_settings(PipelineSettings::from(&config.pipeline)),
    /// );
    /// ```
    pub fn new(
        registry: ProviderRegistry,
        embedder: Arc<dyn Embedder>,
        exporter: Arc<dyn Exporter>,
        source: Arc<dyn RequestSource>,
    ) -> Self {
        Self {
            registry,
            retry: RetryPolicy::default(),
            embedder,
            exporter,
            source,
            progress: Arc::new(ProgressStore::new()),
            settings: PipelineSettings::default(),
            active: Mutex::new(None),
        }
    }

    /// Replace the retry policy applied to every provider request.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Publish status into `progress` instead of a private store.
    pub fn with_progress(mut self, progress: Arc<ProgressStore>) -> Self {
        self.progress = progress;
        self
    }

    /// The store this orchestrator publishes into; subscribe to it for
    /// change notifications.
    pub fn progress(&self) -> Arc<ProgressStore> {
        Arc::clone(&self.progress)
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Snapshot of the current or most recent run.
    pub fn get_status(&self) -> RunStatus {
        self.progress.get()
    }

    fn active(&self) -> MutexGuard<'_, Option<ActiveRun>> {
        // A panic while holding the lock leaves plain data behind.
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a run in the background and return its id.
    ///
    /// The run is spawned on the current Tokio runtime. A panic inside it is
    /// caught and turns the run `Failed`, so the status never stays stuck at
    /// `Running`.
    ///
    /// # Arguments
    ///
    /// * `dry_run` - Run every stage except the export
    ///
    /// # Returns
    ///
    /// The new run id, already visible in [`Orchestrator::get_status`].
    ///
    /// # Errors
    ///
    /// [`PipelineError::AlreadyRunning`] while another run is active; the
    /// active run is left untouched.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let run_id = orchestrator.trigger_run(false)?;
    /// let report = orchestrator.wait().await?;
    /// assert_eq!(report.run_id, run_id);
    /// ```
    pub fn trigger_run(self: &Arc<Self>, dry_run: bool) -> Result<Uuid, PipelineError> {
        let run_id = Uuid::new_v4();
        let mut active = self.active();
        self.progress.begin(run_id, dry_run)?;
        info!(%run_id, dry_run, "Run triggered");

        let cancel = CancellationToken::new();
        let this = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let run = AssertUnwindSafe(this.execute(run_id, dry_run, token)).catch_unwind();
            match run.await {
                Ok(report) => report,
                Err(_) => {
                    error!(%run_id, "Run task panicked");
                    this.progress
                        .finish(RunState::Failed, "run aborted by an internal error", |_| {});
                    RunReport {
                        state: RunState::Failed,
                        message: "run aborted by an internal error".to_string(),
                        ..RunReport::new(run_id, dry_run)
                    }
                }
            }
        });

        *active = Some(ActiveRun {
            run_id,
            cancel,
            handle: Some(handle),
        });
        Ok(run_id)
    }

    /// Run to completion on the caller's task.
    ///
    /// Same stages and status updates as [`Orchestrator::trigger_run`], but
    /// awaited in place. [`Orchestrator::cancel_run`] still works from
    /// another task.
    ///
    /// # Returns
    ///
    /// The finished [`RunReport`], or [`PipelineError::AlreadyRunning`] if a
    /// run was already active.
    pub async fn run(&self, dry_run: bool) -> Result<RunReport, PipelineError> {
        let run_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        {
            let mut active = self.active();
            self.progress.begin(run_id, dry_run)?;
            *active = Some(ActiveRun {
                run_id,
                cancel: cancel.clone(),
                handle: None,
            });
        }
        Ok(self.execute(run_id, dry_run, cancel).await)
    }

    /// Wait for the run started by [`Orchestrator::trigger_run`] to finish.
    pub async fn wait(&self) -> Result<RunReport, PipelineError> {
        let handle = self
            .active()
            .as_mut()
            .and_then(|run| run.handle.take())
            .ok_or(PipelineError::NoActiveRun)?;
        handle
            .await
            .map_err(|e| PipelineError::Aborted(e.to_string()))
    }

    /// Ask the active run to stop.
    ///
    /// Requests not yet started never start; in-flight requests finish or
    /// time out on their own but their results are discarded. The run ends
    /// `Failed` with the message `cancelled`.
    pub fn cancel_run(&self) -> Result<(), PipelineError> {
        let status = self.progress.get();
        if status.state != RunState::Running {
            return Err(PipelineError::NoActiveRun);
        }
        let active = self.active();
        match active.as_ref() {
            Some(run) if Some(run.run_id) == status.run_id => {
                info!(run_id = %run.run_id, "Cancelling run");
                run.cancel.cancel();
                Ok(())
            }
            _ => Err(PipelineError::NoActiveRun),
        }
    }

    fn finish(&self, report: &mut RunReport, state: RunState, message: String) {
        match state {
            RunState::Failed => warn!(run_id = %report.run_id, %message, "Run failed"),
            _ => info!(run_id = %report.run_id, %message, "Run finished"),
        }
        report.state = state;
        report.message = message.clone();
        let articles = report.articles.len();
        let duplicates = report.duplicates.len();
        let export_error = report.export_error.clone();
        self.progress.finish(state, message, |s| {
            s.article_count = articles;
            s.duplicates_removed = duplicates;
            s.export_error = export_error;
        });
    }

    fn cancelled(&self, report: &mut RunReport) {
        self.finish(report, RunState::Failed, "cancelled".to_string());
    }

    /// Resolve one request and execute it through the retry policy.
    ///
    /// The provider call runs on its own task so that dropping this future
    /// on cancel lets the call finish naturally.
    fn start_request(
        &self,
        index: usize,
        spec: RequestSpec,
        cancel: CancellationToken,
    ) -> impl Future<Output = RequestOutcome> + Send {
        let prepared = self.registry.prepare(&spec);
        let retry = self.retry.clone();
        let progress = Arc::clone(&self.progress);
        let provider_name = spec.provider;

        async move {
            let outcome = match prepared {
                Err(e) => {
                    warn!(index, provider = %provider_name, error = %e.message, "Request rejected before fetch");
                    Err(e)
                }
                Ok((provider, request)) => {
                    progress.update(|s| s.current_provider = Some(provider_name.clone()));
                    debug!(index, provider = %provider_name, "Fetching");
                    let task = tokio::spawn(async move {
                        retry.execute(provider.as_ref(), &request, &cancel).await
                    });
                    match task.await {
                        Ok(outcome) => outcome,
                        Err(e) => Err(FetchError::transient(
                            provider_name.as_str(),
                            format!("request task failed: {e}"),
                        )),
                    }
                }
            };
            RequestOutcome {
                index,
                provider: provider_name,
                outcome,
            }
        }
    }

    #[instrument(level = "info", skip_all, fields(%run_id, dry_run))]
    async fn execute(&self, run_id: Uuid, dry_run: bool, cancel: CancellationToken) -> RunReport {
        let started = std::time::Instant::now();
        let mut report = RunReport::new(run_id, dry_run);

        // ---- Load requests ----
        let requests = match self.source.load_requests().await {
            Ok(requests) => requests,
            Err(e) => {
                error!(error = %e, "Failed to load requests");
                self.finish(&mut report, RunState::Failed, format!("configuration error: {e}"));
                return report;
            }
        };
        let total = requests.len();
        let queries: Vec<String> = requests
            .iter()
            .filter_map(|r| r.parameters.get("query"))
            .filter(|q| !q.trim().is_empty())
            .cloned()
            .collect();
        info!(requests = total, workers = self.settings.workers, "Requests loaded");

        // ---- Fetch ----
        self.progress.update(|s| {
            s.requests_total = total;
            s.stage = Stage::Fetching;
            s.message = format!("fetching {total} requests");
        });

        let mut slots: Vec<Option<RequestOutcome>> = (0..total).map(|_| None).collect();
        let mut pending = stream::iter(requests.into_iter().enumerate())
            .map(|(index, spec)| self.start_request(index, spec, cancel.clone()))
            .buffer_unordered(self.settings.workers.max(1));

        let mut was_cancelled = false;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    was_cancelled = true;
                    break;
                }
                next = pending.next() => match next {
                    Some(done) => {
                        let failure = done.outcome.as_ref().err().map(ProviderFailure::from);
                        match &done.outcome {
                            Ok(articles) => info!(
                                index = done.index,
                                provider = %done.provider,
                                count = articles.len(),
                                "Request succeeded"
                            ),
                            Err(e) => warn!(
                                index = done.index,
                                provider = %done.provider,
                                kind = %e.kind,
                                attempts = e.attempts,
                                error = %e.message,
                                "Request failed"
                            ),
                        }
                        self.progress.request_finished(done.index, &done.provider, failure);
                        let index = done.index;
                        slots[index] = Some(done);
                    }
                    None => break,
                }
            }
        }
        drop(pending);

        report.outcomes = slots.into_iter().flatten().collect();
        report.failures = report
            .outcomes
            .iter()
            .filter_map(|o| o.outcome.as_ref().err().map(ProviderFailure::from))
            .collect();

        if was_cancelled {
            info!(collected = report.outcomes.len(), total, "Fetch stage cancelled");
            self.cancelled(&mut report);
            return report;
        }

        // ---- Merge ----
        let mut merged: Vec<_> = report
            .outcomes
            .iter()
            .filter_map(|o| o.outcome.as_ref().ok())
            .flatten()
            .cloned()
            .collect();
        if merged.len() > self.settings.max_articles {
            info!(
                merged = merged.len(),
                cap = self.settings.max_articles,
                "Capping merged articles"
            );
            merged.truncate(self.settings.max_articles);
        }

        // ---- Dedup ----
        self.progress
            .stage(Stage::Deduplicating, format!("deduplicating {} articles", merged.len()));
        let engine = DedupEngine::new(Arc::clone(&self.embedder), self.settings.dedup_threshold);
        let dedup = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Dedup stage cancelled");
                self.cancelled(&mut report);
                return report;
            }
            dedup = engine.deduplicate(merged) => dedup,
        };
        report.duplicates = dedup.duplicates;

        // ---- Rank ----
        self.progress
            .stage(Stage::Ranking, format!("ranking {} articles", dedup.admitted.len()));
        let ranker = Ranker::new(queries.iter().map(String::as_str), self.registry.priorities());
        report.articles = ranker.rank(dedup.admitted);
        if cancel.is_cancelled() {
            self.cancelled(&mut report);
            return report;
        }

        // ---- Export ----
        if dry_run {
            info!(articles = report.articles.len(), "Dry run; skipping export");
        } else {
            self.progress.stage(Stage::Exporting, "exporting");
            let edition = Edition {
                run_id,
                generated_at: Utc::now(),
                article_count: report.articles.len(),
                duplicates_removed: report.duplicates.len(),
                failures: report.failures.clone(),
                articles: report.articles.clone(),
            };
            let exported = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("Export cancelled; the feed may be incomplete");
                    self.cancelled(&mut report);
                    return report;
                }
                exported = self.exporter.export(&edition) => exported,
            };
            match exported {
                Ok(location) => report.export_location = Some(location),
                Err(e) => {
                    error!(error = %e, "Export failed");
                    report.export_error = Some(e.to_string());
                }
            }
        }

        let succeeded = report.outcomes.iter().filter(|o| o.outcome.is_ok()).count();
        let mut message = format!(
            "{} articles from {succeeded}/{total} requests; {} duplicates removed",
            report.articles.len(),
            report.duplicates.len()
        );
        if dry_run {
            message.push_str("; dry run, export skipped");
        } else if report.export_error.is_some() {
            message.push_str("; export failed");
        }
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            articles = report.articles.len(),
            failures = report.failures.len(),
            "Run complete"
        );
        self.finish(&mut report, RunState::Completed, message);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticRequestSource;
    use crate::dedup::testing::TableEmbedder;
    use crate::embedding::Embedding;
    use crate::error::{ConfigError, EmbeddingError, ErrorKind, ExportError};
    use crate::models::{Article, ArticleDraft, ProviderRequest};
    use crate::providers::NewsProvider;
    use crate::providers::schema::{FieldSpec, ParamSchema};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Returns a fixed outcome after an optional delay.
    struct Canned {
        name: &'static str,
        schema: ParamSchema,
        outcome: FetchOutcome,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl Canned {
        fn ok(name: &'static str, titles: &[&str]) -> Self {
            let articles = titles.iter().map(|t| article(name, t)).collect();
            Self::with(name, Ok(articles))
        }

        fn failing(name: &'static str, err: FetchError) -> Self {
            Self::with(name, Err(err))
        }

        fn with(name: &'static str, outcome: FetchOutcome) -> Self {
            Self {
                name,
                schema: ParamSchema::new(name, vec![FieldSpec::text("query")]),
                outcome,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        fn delayed(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl NewsProvider for Canned {
        fn name(&self) -> &str {
            self.name
        }

        fn schema(&self) -> &ParamSchema {
            &self.schema
        }

        async fn fetch(&self, _request: &ProviderRequest) -> FetchOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.outcome.clone()
        }
    }

    #[derive(Default)]
    struct CountingExporter {
        calls: AtomicUsize,
        fail: bool,
        delay: Duration,
    }

    #[async_trait]
    impl Exporter for CountingExporter {
        async fn export(&self, edition: &Edition) -> Result<String, ExportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(ExportError::Io(std::io::Error::other("disk full")));
            }
            Ok(format!("memory://{}", edition.run_id))
        }
    }

    /// Sleeps before every embedding so a run sits in the dedup stage.
    struct SlowEmbedder {
        inner: Arc<TableEmbedder>,
        delay: Duration,
    }

    #[async_trait]
    impl Embedder for SlowEmbedder {
        fn id(&self) -> &str {
            "slow"
        }

        async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
            tokio::time::sleep(self.delay).await;
            self.inner.embed(text).await
        }
    }

    struct BrokenSource;

    #[async_trait]
    impl RequestSource for BrokenSource {
        async fn load_requests(&self) -> Result<Vec<RequestSpec>, ConfigError> {
            Err(ConfigError::Invalid("requests must be a list".into()))
        }
    }

    fn article(provider: &str, title: &str) -> Article {
        ArticleDraft {
            title: Some(title.to_string()),
            published: Some("2025-05-06T00:00:00Z".to_string()),
            ..ArticleDraft::new(provider, json!({}))
        }
        .finish()
        .unwrap()
    }

    fn embedder() -> Arc<TableEmbedder> {
        Arc::new(TableEmbedder::new(&[
            ("a1", vec![1.0, 0.0, 0.0, 0.0]),
            ("b1", vec![0.0, 1.0, 0.0, 0.0]),
            ("c1", vec![0.0, 0.0, 1.0, 0.0]),
            ("a1 again", vec![0.99, 0.01, 0.0, 0.0]),
            ("d1", vec![0.0, 0.0, 0.0, 1.0]),
        ]))
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(10),
            multiplier: 2.0,
            jitter: Duration::ZERO,
            max_wait: Duration::from_secs(1),
            retryable: vec![ErrorKind::TransientServer, ErrorKind::RateLimit],
        }
    }

    fn two_requests() -> Vec<RequestSpec> {
        vec![
            RequestSpec::new("A", &[("query", "a1")]),
            RequestSpec::new("B", &[]),
        ]
    }

    fn build(
        providers: Vec<Arc<Canned>>,
        requests: Vec<RequestSpec>,
        exporter: Arc<CountingExporter>,
    ) -> Orchestrator {
        let mut registry = ProviderRegistry::new();
        for p in providers {
            registry.register(p);
        }
        Orchestrator::new(
            registry,
            embedder(),
            exporter,
            Arc::new(StaticRequestSource::new(requests)),
        )
        .with_retry(fast_retry())
    }

    fn orchestrator(
        providers: Vec<Arc<Canned>>,
        requests: Vec<RequestSpec>,
        exporter: Arc<CountingExporter>,
    ) -> Arc<Orchestrator> {
        Arc::new(build(providers, requests, exporter))
    }

    fn scenario() -> (Arc<Canned>, Arc<Canned>) {
        (
            Arc::new(Canned::ok("A", &["a1", "b1", "c1"])),
            Arc::new(Canned::ok("B", &["a1 again", "d1"])),
        )
    }

    #[tokio::test]
    async fn test_merges_dedups_and_exports() {
        let (a, b) = scenario();
        let exporter = Arc::new(CountingExporter::default());
        let orch = orchestrator(vec![a, b], two_requests(), Arc::clone(&exporter));

        let report = orch.run(false).await.unwrap();
        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.articles.len(), 4);
        assert_eq!(report.duplicates.len(), 1);
        assert_eq!(report.duplicates[0].duplicate_of_title, "a1");
        assert_eq!(exporter.calls.load(Ordering::SeqCst), 1);
        assert!(report.export_location.is_some());
        // query "a1" lifts the matching article to the top
        assert_eq!(report.articles[0].article.title, "a1");

        let status = orch.get_status();
        assert_eq!(status.state, RunState::Completed);
        assert_eq!(status.percent, 100);
        assert_eq!(status.processed_providers, vec!["A", "B"]);
        assert_eq!(status.article_count, 4);
        assert_eq!(status.duplicates_removed, 1);
        assert!(status.failures.is_empty());
    }

    #[tokio::test]
    async fn test_auth_failure_is_isolated() {
        let a = Arc::new(Canned::failing("A", FetchError::authentication("A", "bad key")));
        let (_, b) = scenario();
        let orch = orchestrator(vec![Arc::clone(&a), b], two_requests(), Default::default());

        let report = orch.run(false).await.unwrap();
        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.articles.len(), 2);
        assert_eq!(a.calls.load(Ordering::SeqCst), 1, "auth errors are not retried");

        let status = orch.get_status();
        assert_eq!(status.processed_providers, vec!["A", "B"]);
        assert_eq!(status.failures.len(), 1);
        assert_eq!(status.failures[0].kind, ErrorKind::Authentication);
        assert_eq!(status.failures[0].provider, "A");
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_providers_failing_still_completes() {
        let a = Arc::new(Canned::failing("A", FetchError::transient("A", "503")));
        let b = Arc::new(Canned::failing("B", FetchError::malformed("B", "not json")));
        let orch = orchestrator(vec![Arc::clone(&a), b], two_requests(), Default::default());

        let report = orch.run(false).await.unwrap();
        assert_eq!(report.state, RunState::Completed);
        assert!(report.articles.is_empty());
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].attempts, 2);
        assert_eq!(a.calls.load(Ordering::SeqCst), 2);
        assert_eq!(orch.get_status().percent, 100);
    }

    #[tokio::test]
    async fn test_dry_run_skips_export() {
        let (a, b) = scenario();
        let exporter = Arc::new(CountingExporter::default());
        let orch = orchestrator(vec![a, b], two_requests(), Arc::clone(&exporter));

        let report = orch.run(true).await.unwrap();
        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.articles.len(), 4);
        assert_eq!(exporter.calls.load(Ordering::SeqCst), 0);
        assert!(orch.get_status().dry_run);
    }

    #[tokio::test]
    async fn test_export_failure_keeps_run_completed() {
        let (a, b) = scenario();
        let exporter = Arc::new(CountingExporter {
            fail: true,
            ..Default::default()
        });
        let orch = orchestrator(vec![a, b], two_requests(), exporter);

        let report = orch.run(false).await.unwrap();
        assert_eq!(report.state, RunState::Completed);
        let status = orch.get_status();
        assert!(status.export_error.unwrap().contains("disk full"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_trigger_is_rejected() {
        let a = Arc::new(Canned::ok("A", &["a1"]).delayed(Duration::from_secs(10)));
        let orch = orchestrator(
            vec![a],
            vec![RequestSpec::new("A", &[])],
            Default::default(),
        );

        let first = orch.trigger_run(false).unwrap();
        match orch.trigger_run(false) {
            Err(PipelineError::AlreadyRunning(id)) => assert_eq!(id, first),
            other => panic!("expected AlreadyRunning, got {other:?}"),
        }
        let report = orch.wait().await.unwrap();
        assert_eq!(report.run_id, first);
        assert_eq!(report.state, RunState::Completed);

        let second = orch.trigger_run(true).unwrap();
        assert_ne!(first, second);
        orch.wait().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_order_does_not_change_output() {
        let a = Arc::new(Canned::ok("A", &["a1", "b1", "c1"]).delayed(Duration::from_secs(5)));
        let (_, b) = scenario();
        let orch = orchestrator(vec![a, b], two_requests(), Default::default());

        let report = orch.run(false).await.unwrap();
        assert_eq!(report.outcomes[0].provider, "A");
        // B finished first, but A's copy is still the one kept
        assert_eq!(report.duplicates[0].title, "a1 again");
        assert_eq!(orch.get_status().processed_providers, vec!["A", "B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_fails_run_and_keeps_collected() {
        let a = Arc::new(Canned::ok("A", &["a1"]).delayed(Duration::from_secs(30)));
        let b = Arc::new(Canned::ok("B", &["d1"]));
        let c = Arc::new(Canned::ok("C", &["c1"]));
        let orch = build(
            vec![a, b, Arc::clone(&c)],
            vec![
                RequestSpec::new("A", &[]),
                RequestSpec::new("B", &[]),
                RequestSpec::new("A", &[]),
                RequestSpec::new("C", &[]),
            ],
            Default::default(),
        )
        .with_settings(PipelineSettings {
            workers: 2,
            ..Default::default()
        });
        let orch = Arc::new(orch);

        orch.trigger_run(false).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        orch.cancel_run().unwrap();
        let report = orch.wait().await.unwrap();

        assert_eq!(report.state, RunState::Failed);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].provider, "B");
        assert!(report.articles.is_empty());
        assert_eq!(c.calls.load(Ordering::SeqCst), 0, "queued requests never start");

        let status = orch.get_status();
        assert_eq!(status.state, RunState::Failed);
        assert_eq!(status.message, "cancelled");
        assert_eq!(status.percent, 100);
        assert!(matches!(orch.cancel_run(), Err(PipelineError::NoActiveRun)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_export_fails_run() {
        let (a, b) = scenario();
        let exporter = Arc::new(CountingExporter {
            delay: Duration::from_secs(10),
            ..Default::default()
        });
        let orch = orchestrator(vec![a, b], two_requests(), Arc::clone(&exporter));

        orch.trigger_run(false).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(exporter.calls.load(Ordering::SeqCst), 1, "run is inside export");
        orch.cancel_run().unwrap();
        let report = orch.wait().await.unwrap();

        assert_eq!(report.state, RunState::Failed);
        assert!(report.export_location.is_none());
        assert_eq!(report.articles.len(), 4, "ranked articles are kept");

        let status = orch.get_status();
        assert_eq!(status.state, RunState::Failed);
        assert_eq!(status.message, "cancelled");
        assert_eq!(status.percent, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_dedup_fails_run() {
        let (a, b) = scenario();
        let mut registry = ProviderRegistry::new();
        registry.register(a);
        registry.register(b);
        let exporter = Arc::new(CountingExporter::default());
        let orch = Arc::new(
            Orchestrator::new(
                registry,
                Arc::new(SlowEmbedder {
                    inner: embedder(),
                    delay: Duration::from_secs(5),
                }),
                Arc::clone(&exporter) as Arc<dyn Exporter>,
                Arc::new(StaticRequestSource::new(two_requests())),
            )
            .with_retry(fast_retry()),
        );

        orch.trigger_run(false).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        orch.cancel_run().unwrap();
        let report = orch.wait().await.unwrap();

        assert_eq!(report.state, RunState::Failed);
        assert_eq!(report.outcomes.len(), 2, "fetch had already finished");
        assert!(report.articles.is_empty());
        assert_eq!(exporter.calls.load(Ordering::SeqCst), 0);
        assert_eq!(orch.get_status().message, "cancelled");
    }

    #[tokio::test]
    async fn test_cancel_without_run() {
        let orch = orchestrator(vec![], vec![], Default::default());
        assert!(matches!(orch.cancel_run(), Err(PipelineError::NoActiveRun)));
        assert_eq!(orch.get_status().state, RunState::Idle);
    }

    #[tokio::test]
    async fn test_percent_is_monotonic() {
        let a = Arc::new(Canned::ok("A", &["a1"]));
        let b = Arc::new(Canned::ok("B", &["b1"]));
        let c = Arc::new(Canned::ok("C", &["c1"]));
        let orch = orchestrator(
            vec![a, b, c],
            vec![
                RequestSpec::new("A", &[]),
                RequestSpec::new("B", &[]),
                RequestSpec::new("C", &[]),
            ],
            Default::default(),
        );

        let mut rx = orch.progress().subscribe();
        let watcher = tokio::spawn(async move {
            let mut seen = Vec::new();
            while rx.changed().await.is_ok() {
                let status = rx.borrow_and_update().clone();
                seen.push(status.percent);
                if status.state.is_terminal() {
                    break;
                }
            }
            seen
        });

        orch.trigger_run(true).unwrap();
        orch.wait().await.unwrap();
        let seen = watcher.await.unwrap();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "percent went backwards: {seen:?}");
        assert_eq!(seen.last(), Some(&100));
    }

    #[tokio::test]
    async fn test_empty_request_list_completes() {
        let orch = orchestrator(vec![], vec![], Default::default());
        let report = orch.run(false).await.unwrap();
        assert_eq!(report.state, RunState::Completed);
        assert!(report.articles.is_empty());
        assert_eq!(orch.get_status().percent, 100);
    }

    #[tokio::test]
    async fn test_unknown_provider_and_bad_params_are_validation_failures() {
        let (a, _) = scenario();
        let orch = orchestrator(
            vec![Arc::clone(&a)],
            vec![
                RequestSpec::new("nope", &[]),
                RequestSpec::new("A", &[("query", "a1")]),
            ],
            Default::default(),
        );

        let report = orch.run(true).await.unwrap();
        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.articles.len(), 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, ErrorKind::Validation);
        assert_eq!(report.failures[0].provider, "nope");
        assert_eq!(orch.get_status().processed_providers, vec!["nope", "A"]);
    }

    #[tokio::test]
    async fn test_request_source_failure_fails_run() {
        let exporter = Arc::new(CountingExporter::default());
        let orch = Arc::new(Orchestrator::new(
            ProviderRegistry::new(),
            embedder(),
            exporter.clone(),
            Arc::new(BrokenSource),
        ));

        let report = orch.run(false).await.unwrap();
        assert_eq!(report.state, RunState::Failed);
        let status = orch.get_status();
        assert_eq!(status.state, RunState::Failed);
        assert!(status.message.starts_with("configuration error"));
        assert_eq!(exporter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_max_articles_caps_in_merge_order() {
        let (a, b) = scenario();
        let orch = build(vec![a, b], two_requests(), Default::default()).with_settings(PipelineSettings {
            max_articles: 2,
            ..Default::default()
        });

        let report = orch.run(true).await.unwrap();
        let mut titles: Vec<_> = report.articles.iter().map(|r| r.article.title.as_str()).collect();
        titles.sort();
        assert_eq!(titles, vec!["a1", "b1"]);
    }
}
