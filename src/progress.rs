//! Externally readable record of the current run.
//!
//! The store holds exactly one [`RunStatus`], overwritten on every update.
//! Writes go through `tokio::sync::watch::Sender::send_if_modified`, which holds
//! the channel lock for the duration of the closure, so check-and-update
//! sequences (claiming the run slot, bumping the percent) are atomic with
//! respect to each other. Readers either poll [`ProgressStore::get`] or
//! subscribe and await changes.

use crate::error::PipelineError;
use crate::models::ProviderFailure;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Pipeline stage within a running run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pending,
    Fetching,
    Deduplicating,
    Ranking,
    Exporting,
    Done,
}

/// Snapshot of the current (or last) run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub run_id: Option<Uuid>,
    pub state: RunState,
    pub stage: Stage,
    /// 0..=100, never decreasing within a run.
    pub percent: u8,
    pub current_provider: Option<String>,
    /// Provider of every finished request, in configured request order.
    pub processed_providers: Vec<String>,
    pub failures: Vec<ProviderFailure>,
    /// Request indexes behind `processed_providers` and `failures`.
    #[serde(skip)]
    processed_order: Vec<usize>,
    #[serde(skip)]
    failure_order: Vec<usize>,
    pub message: String,
    pub dry_run: bool,
    pub requests_total: usize,
    pub requests_completed: usize,
    pub article_count: usize,
    pub duplicates_removed: usize,
    pub export_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub duration_secs: Option<f64>,
}

impl RunStatus {
    /// The state reported before any run has started.
    pub fn never_run() -> Self {
        Self {
            run_id: None,
            state: RunState::Idle,
            stage: Stage::Pending,
            percent: 0,
            current_provider: None,
            processed_providers: Vec::new(),
            failures: Vec::new(),
            processed_order: Vec::new(),
            failure_order: Vec::new(),
            message: "ready; no run has started".to_string(),
            dry_run: false,
            requests_total: 0,
            requests_completed: 0,
            article_count: 0,
            duplicates_removed: 0,
            export_error: None,
            started_at: None,
            finished_at: None,
            updated_at: Utc::now(),
            duration_secs: None,
        }
    }

    fn started(run_id: Uuid, dry_run: bool) -> Self {
        let now = Utc::now();
        Self {
            run_id: Some(run_id),
            state: RunState::Running,
            message: "starting".to_string(),
            dry_run,
            started_at: Some(now),
            updated_at: now,
            ..Self::never_run()
        }
    }
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::never_run()
    }
}

/// Shared holder of the current [`RunStatus`].
#[derive(Debug)]
pub struct ProgressStore {
    tx: watch::Sender<RunStatus>,
}

impl Default for ProgressStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressStore {
    pub fn new() -> Self {
        Self {
            tx: watch::Sender::new(RunStatus::never_run()),
        }
    }

    pub fn get(&self) -> RunStatus {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.tx.subscribe()
    }

    /// Replace the whole status.
    pub fn set(&self, status: RunStatus) {
        self.tx.send_replace(status);
    }

    /// Claim the run slot for `run_id`.
    ///
    /// Fails with [`PipelineError::AlreadyRunning`] if another run holds it.
    /// The check and the transition happen under one lock.
    pub fn begin(&self, run_id: Uuid, dry_run: bool) -> Result<(), PipelineError> {
        let mut conflict = None;
        self.tx.send_if_modified(|status| {
            if status.state == RunState::Running {
                conflict = status.run_id;
                return false;
            }
            *status = RunStatus::started(run_id, dry_run);
            true
        });
        match conflict {
            Some(active) => Err(PipelineError::AlreadyRunning(active)),
            None => Ok(()),
        }
    }

    /// Apply `f` to the current status and stamp `updated_at`.
    ///
    /// Ignored once the status is terminal, so a late writer cannot reopen a
    /// finished run.
    pub fn update(&self, f: impl FnOnce(&mut RunStatus)) {
        self.tx.send_if_modified(|status| {
            if status.state != RunState::Running {
                return false;
            }
            f(status);
            status.updated_at = Utc::now();
            true
        });
    }

    pub fn stage(&self, stage: Stage, message: impl Into<String>) {
        let message = message.into();
        self.update(|s| {
            s.stage = stage;
            s.message = message;
        });
    }

    /// Record request `index` as finished and recompute the percent.
    ///
    /// Requests may finish in any order; the provider and failure lists stay
    /// sorted by request index.
    pub fn request_finished(&self, index: usize, provider: &str, failure: Option<ProviderFailure>) {
        self.update(|s| {
            s.requests_completed += 1;
            let pos = s.processed_order.partition_point(|&i| i < index);
            s.processed_order.insert(pos, index);
            s.processed_providers.insert(pos, provider.to_string());
            if let Some(failure) = failure {
                let pos = s.failure_order.partition_point(|&i| i < index);
                s.failure_order.insert(pos, index);
                s.failures.insert(pos, failure);
            }
            let percent = if s.requests_total == 0 {
                100
            } else {
                (s.requests_completed * 100 / s.requests_total).min(100) as u8
            };
            s.percent = s.percent.max(percent);
            s.message = format!(
                "fetched {}/{} requests",
                s.requests_completed, s.requests_total
            );
        });
    }

    /// Move a running status to `state`, setting percent to 100 and timings.
    pub fn finish(&self, state: RunState, message: impl Into<String>, f: impl FnOnce(&mut RunStatus)) {
        debug_assert!(state.is_terminal());
        let message = message.into();
        self.update(|s| {
            f(s);
            let now = Utc::now();
            s.state = state;
            s.stage = Stage::Done;
            s.percent = 100;
            s.current_provider = None;
            s.message = message;
            s.finished_at = Some(now);
            s.duration_secs = s
                .started_at
                .map(|start| (now - start).num_milliseconds() as f64 / 1000.0);
        });
    }
}
