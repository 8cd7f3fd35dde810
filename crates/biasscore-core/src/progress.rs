//! Concurrency-safe progress tracking for in-flight rescore jobs (C8).
//!
//! One `tokio::sync::watch` channel per article id holds the latest
//! `ProgressState`; `Subscribe` wraps it in a stream that replays the
//! current state immediately, then every subsequent transition, and closes
//! once a terminal status is observed — including for a subscriber that
//! connects after the job has already finished.

use futures::Stream;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};

/// The lifecycle status of a rescore job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum JobStatus {
    /// The job is still running.
    InProgress,
    /// The job finished and produced a composite score.
    Success,
    /// The job failed fatally.
    Error,
    /// A terminal status distinct from `Success` used for non-scoring
    /// completions (reserved for future non-LLM score sources).
    Complete,
}

impl JobStatus {
    /// Whether this status is sticky/terminal (spec.md §4.8).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Complete)
    }
}

/// The observable snapshot of a rescore job's lifecycle (spec.md §3).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ProgressState {
    /// Free-form short tag naming the current step.
    pub step: String,
    /// Human-readable progress message.
    pub message: String,
    /// Progress percentage in `[0, 100]`.
    pub percent: u8,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Error code tag, set only on `Error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Structured error detail JSON, set only on `Error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<serde_json::Value>,
    /// The composite score, set only on `Success`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_score: Option<f64>,
    /// Unix seconds of this transition.
    pub last_updated: i64,
}

impl ProgressState {
    /// Construct an `InProgress` tick.
    pub fn in_progress(step: &str, message: &str, percent: u8, now: i64) -> Self {
        Self {
            step: step.to_string(),
            message: message.to_string(),
            percent,
            status: JobStatus::InProgress,
            error: None,
            error_details: None,
            final_score: None,
            last_updated: now,
        }
    }

    /// Construct the terminal `Success` state.
    pub fn success(final_score: f64, now: i64) -> Self {
        Self {
            step: "Done".to_string(),
            message: "rescore complete".to_string(),
            percent: 100,
            status: JobStatus::Success,
            error: None,
            error_details: None,
            final_score: Some(final_score),
            last_updated: now,
        }
    }

    /// Construct the terminal `Error` state.
    pub fn error(error_code: &str, details: serde_json::Value, now: i64) -> Self {
        Self {
            step: "Error".to_string(),
            message: format!("rescore failed: {error_code}"),
            percent: 100,
            status: JobStatus::Error,
            error: Some(error_code.to_string()),
            error_details: Some(details),
            final_score: None,
            last_updated: now,
        }
    }
}

struct TrackedJob {
    sender: watch::Sender<ProgressState>,
    terminal_since: Option<Instant>,
}

/// A concurrency-safe map of article id -> progress state, with TTL-based
/// eviction of terminal entries.
#[derive(Clone)]
pub struct ProgressTracker {
    jobs: Arc<RwLock<HashMap<i64, TrackedJob>>>,
    ttl: Duration,
}

impl ProgressTracker {
    /// Create a tracker with the given terminal-entry TTL (spec default 1h).
    pub fn new(ttl: Duration) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Record a progress transition for `article_id`.
    ///
    /// A later `Set` with non-increasing `percent` and a non-terminal status
    /// is silently dropped; terminal statuses always win and are sticky
    /// (spec.md §4.8). Creates the entry if this is the first `Set`.
    pub async fn set(&self, article_id: i64, state: ProgressState) {
        let mut jobs = self.jobs.write().await;

        match jobs.get(&article_id) {
            None => {
                let terminal_since = state.status.is_terminal().then(Instant::now);
                let (sender, _) = watch::channel(state);
                jobs.insert(article_id, TrackedJob { sender, terminal_since });
            }
            Some(existing) => {
                let current = existing.sender.borrow().clone();
                if current.status.is_terminal() {
                    return;
                }
                if !state.status.is_terminal() && state.percent <= current.percent {
                    return;
                }
                let terminal_since = state.status.is_terminal().then(Instant::now);
                let _ = existing.sender.send(state);
                if let Some(job) = jobs.get_mut(&article_id) {
                    job.terminal_since = terminal_since;
                }
            }
        }
    }

    /// Fetch the current progress state for an article, if one exists.
    pub async fn get(&self, article_id: i64) -> Option<ProgressState> {
        let jobs = self.jobs.read().await;
        jobs.get(&article_id).map(|job| job.sender.borrow().clone())
    }

    /// Subscribe to the progress stream for an article: the current state
    /// immediately, then every subsequent transition, closing after a
    /// terminal status is observed.
    pub async fn subscribe(
        &self,
        article_id: i64,
    ) -> Option<impl Stream<Item = ProgressState> + Send + 'static> {
        let mut receiver = {
            let jobs = self.jobs.read().await;
            jobs.get(&article_id)?.sender.subscribe()
        };

        Some(async_stream::stream! {
            let current = receiver.borrow().clone();
            let mut terminal = current.status.is_terminal();
            yield current;

            while !terminal {
                if receiver.changed().await.is_err() {
                    break;
                }
                let state = receiver.borrow().clone();
                terminal = state.status.is_terminal();
                yield state;
            }
        })
    }

    /// Evict every terminal entry whose TTL has elapsed. Intended to be
    /// called periodically by a background sweeper task.
    pub async fn sweep(&self) {
        let now = Instant::now();
        let mut jobs = self.jobs.write().await;
        jobs.retain(|_, job| match job.terminal_since {
            Some(since) => now.duration_since(since) < self.ttl,
            None => true,
        });
    }

    /// Run the sweep loop until `shutdown` is cancelled.
    pub async fn run_sweeper(self, interval: Duration, shutdown: tokio_util::sync::CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep().await,
                _ = shutdown.cancelled() => break,
            }
        }
    }
}
