//! Shared application state for the bias-scoring API server.

use std::collections::HashSet;
use std::sync::Arc;

use biasscore_core::cache::{ArticleCache, ResponseCache};
use biasscore_core::config::EnsembleConfig;
use biasscore_core::progress::ProgressTracker;
use biasscore_core::score_manager::ScoreManager;
use biasscore_core::storage::DbPool;
use tokio::sync::{Mutex, RwLock};

/// Shared application state accessible by all route handlers.
pub struct AppState {
    /// SQLite connection pool.
    pub db: DbPool,
    /// The end-to-end rescore orchestrator (C9).
    pub score_manager: ScoreManager,
    /// Progress tracker shared with `score_manager` (so routes can subscribe
    /// without going through a rescore call).
    pub progress: ProgressTracker,
    /// TTL cache for article list/detail reads (C11).
    pub article_cache: ArticleCache,
    /// Content-addressed LLM response cache (C3), exposed for diagnostics.
    pub response_cache: ResponseCache,
    /// The currently loaded ensemble configuration. Reloadable without a
    /// server restart; protected by a read-mostly lock.
    pub ensemble_config: RwLock<EnsembleConfig>,
    /// Article ids with an in-flight rescore job (I5: at most one per id).
    /// Acquisition is a non-blocking compare-and-swap under a short-lived lock.
    pub in_flight: Mutex<HashSet<i64>>,
    /// When true, ingestion must not auto-trigger a rescore (§6 config surface).
    /// Not enforced by this crate directly — the RSS collector reads it.
    pub auto_analyse_disabled: bool,
}

impl AppState {
    /// Attempt to claim the in-flight slot for `article_id`.
    ///
    /// Returns `true` if this caller claimed it (no job was already
    /// running), `false` if a job is already in flight and this request
    /// should coalesce onto it.
    pub async fn try_claim_in_flight(&self, article_id: i64) -> bool {
        let mut guard = self.in_flight.lock().await;
        guard.insert(article_id)
    }

    /// Release the in-flight slot for `article_id` once its job has reached
    /// a terminal state.
    pub async fn release_in_flight(&self, article_id: i64) {
        let mut guard = self.in_flight.lock().await;
        guard.remove(&article_id);
    }
}

/// Convenience alias used throughout route handlers.
pub type SharedState = Arc<AppState>;
