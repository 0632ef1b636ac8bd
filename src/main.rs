//! # news_sift
//!
//! Runs one ingestion pass: fetch from every configured request, drop
//! near-duplicates, rank and export.
//!
//! ## Usage
//!
//! ```sh
//! news_sift -c news_sift.yaml -o ./out
//! ```
//!
//! Ctrl-C cancels the run; requests already in flight are left to finish.

use clap::Parser;
use news_sift::cli::Cli;
use news_sift::config::{AppConfig, FileRequestSource};
use news_sift::embedding::build_embedder;
use news_sift::export::JsonExporter;
use news_sift::progress::RunState;
use news_sift::providers::{ProviderKind, ProviderRegistry};
use news_sift::retry::RetryPolicy;
use news_sift::utils::ensure_writable_dir;
use news_sift::{Orchestrator, PipelineSettings};
use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

#[tokio::main]
#[instrument]
async fn main() -> Result<ExitCode, Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    if args.list_providers {
        for kind in ProviderKind::ALL {
            print!("{}", kind.schema());
        }
        return Ok(ExitCode::SUCCESS);
    }

    info!(config = %args.config, "news_sift starting up");

    // ---- Config ----
    let mut config = match AppConfig::load(&args.config).await {
        Ok(config) => config,
        Err(e) => {
            error!(path = %args.config, error = %e, "Failed to load config");
            return Err(e.into());
        }
    };
    if let Some(dir) = &args.output_dir {
        config.export.output_dir = dir.clone();
    }
    if let Some(workers) = args.workers {
        config.pipeline.workers = workers;
    }
    if let Some(threshold) = args.threshold {
        config.pipeline.dedup_threshold = threshold;
    }
    config.validate()?;

    // Early check: ensure the export dir is writable
    if !args.dry_run {
        if let Err(e) = ensure_writable_dir(&config.export.output_dir).await {
            error!(
                path = %config.export.output_dir,
                error = %e,
                "Output directory is not writable (fix perms or choose a different path)"
            );
            return Err(e.into());
        }
    }

    // ---- Collaborators ----
    let registry = ProviderRegistry::from_config(&config)?;
    if registry.is_empty() {
        warn!("Every provider is disabled; the run will produce an empty feed");
    }
    let embed_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.pipeline.request_timeout_secs))
        .user_agent(config.pipeline.user_agent.clone())
        .build()?;
    let embedder = build_embedder(&config.embedding, embed_client)?;
    info!(embedder = embedder.id(), "Embedder ready");

    let orchestrator = Arc::new(
        Orchestrator::new(
            registry,
            embedder,
            Arc::new(JsonExporter::new(&config.export.output_dir)),
            Arc::new(FileRequestSource::new(&args.config)),
        )
        .with_retry(RetryPolicy::from_config(&config.retry))
        .with_settings(PipelineSettings::from(&config.pipeline)),
    );

    // ---- Status logging ----
    let mut status_rx = orchestrator.progress().subscribe();
    let status_logger = tokio::spawn(async move {
        let mut last_percent = None;
        while status_rx.changed().await.is_ok() {
            let status = status_rx.borrow_and_update().clone();
            if last_percent != Some(status.percent) {
                info!(
                    state = %status.state,
                    percent = status.percent,
                    stage = ?status.stage,
                    message = %status.message,
                    "Progress"
                );
                last_percent = Some(status.percent);
            }
            if status.state.is_terminal() {
                break;
            }
        }
    });

    // ---- Ctrl-C cancels ----
    let cancel_handle = Arc::clone(&orchestrator);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; cancelling run");
            if let Err(e) = cancel_handle.cancel_run() {
                debug!(error = %e, "Nothing to cancel");
            }
        }
    });

    // ---- Run ----
    let run_id = orchestrator.trigger_run(args.dry_run)?;
    let report = orchestrator.wait().await?;
    let _ = status_logger.await;

    let status = orchestrator.get_status();
    for failure in &status.failures {
        warn!(
            provider = %failure.provider,
            kind = %failure.kind,
            attempts = failure.attempts,
            error = %failure.message,
            "Provider request failed"
        );
    }
    if let Some(location) = &report.export_location {
        info!(path = %location, "Feed written");
    }
    if let Some(e) = &status.export_error {
        error!(error = %e, "Feed was not written");
    }

    info!(
        %run_id,
        state = %status.state,
        articles = status.article_count,
        duplicates = status.duplicates_removed,
        failures = status.failures.len(),
        elapsed_s = status.duration_secs.unwrap_or_default(),
        "news_sift finished"
    );

    Ok(match status.state {
        RunState::Completed if status.export_error.is_none() => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}
