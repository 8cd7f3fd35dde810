//! End-to-end rescore orchestration (C9).
//!
//! `ScoreManager::rescore` is the single entry point the HTTP layer drives:
//! load the article, run the ensemble, combine the result, persist the
//! composite, invalidate both caches, and keep `ProgressTracker` in sync at
//! every step. A per-job deadline (default 5 min, spec.md §5) wraps the
//! ensemble call so a stalled model roster can't hang a rescore forever.

use crate::cache::{ArticleCache, ResponseCache};
use crate::calculator;
use crate::config::EnsembleConfig;
use crate::ensemble;
use crate::error::{ScoreManagerError, StoreError};
use crate::llm::Transport;
use crate::progress::{ProgressState, ProgressTracker};
use crate::storage::articles;
use crate::storage::DbPool;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Everything one `Rescore` needs, bundled for injection into a background
/// task. Cheap to clone: every field is itself `Clone` over an `Arc`.
#[derive(Clone)]
pub struct ScoreManager {
    pool: DbPool,
    transport: Arc<Transport>,
    response_cache: ResponseCache,
    article_cache: ArticleCache,
    progress: ProgressTracker,
    job_timeout: Duration,
}

impl ScoreManager {
    /// Construct a score manager from its collaborators.
    pub fn new(
        pool: DbPool,
        transport: Transport,
        response_cache: ResponseCache,
        article_cache: ArticleCache,
        progress: ProgressTracker,
        job_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            transport: Arc::new(transport),
            response_cache,
            article_cache,
            progress,
            job_timeout,
        }
    }

    /// Run the end-to-end rescore flow for one article (spec.md §4.7).
    ///
    /// Returns once the job reaches a terminal progress state; callers
    /// driving this from the API should spawn it as a detached task and let
    /// the caller observe completion through `ProgressTracker::subscribe`.
    pub async fn rescore(&self, article_id: i64, cfg: EnsembleConfig) -> Result<(), ScoreManagerError> {
        let article = articles::get_article(&self.pool, article_id)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => ScoreManagerError::NotFound(article_id),
                other => ScoreManagerError::Store(other),
            })?;

        self.progress
            .set(
                article_id,
                ProgressState::in_progress("Starting", "queued for scoring", 0, now()),
            )
            .await;

        let ensemble_result = tokio::time::timeout(
            self.job_timeout,
            ensemble::analyze_article(
                &self.pool,
                &self.transport,
                &self.response_cache,
                &self.progress,
                &article,
                &cfg,
            ),
        )
        .await;

        let scored = match ensemble_result {
            Err(_elapsed) => {
                self.progress
                    .set(
                        article_id,
                        ProgressState::error("timeout", json!({"kind": "timeout"}), now()),
                    )
                    .await;
                return Err(ScoreManagerError::Timeout);
            }
            Ok(Err(crate::error::EnsembleError::AllPerspectivesInvalid)) => {
                self.progress
                    .set(
                        article_id,
                        ProgressState::error(
                            "llm_all_perspectives_invalid",
                            json!({"kind": "all_perspectives_invalid"}),
                            now(),
                        ),
                    )
                    .await;
                return Err(ScoreManagerError::AllPerspectivesInvalid);
            }
            Ok(Err(crate::error::EnsembleError::Transport(err))) => {
                self.progress
                    .set(
                        article_id,
                        ProgressState::error(
                            code_tag(err.code()),
                            json!({
                                "kind": code_tag(err.code()),
                                "recommended_action": recommended_action(&err),
                            }),
                            now(),
                        ),
                    )
                    .await;
                return Err(ScoreManagerError::Transport(err));
            }
            Ok(Err(crate::error::EnsembleError::Timeout)) => {
                self.progress
                    .set(
                        article_id,
                        ProgressState::error("timeout", json!({"kind": "timeout"}), now()),
                    )
                    .await;
                return Err(ScoreManagerError::Timeout);
            }
            Ok(Ok(scored)) => scored,
        };

        let combined = match calculator::combine(&scored, &cfg) {
            Ok(combined) => combined,
            Err(_all_invalid) => {
                self.progress
                    .set(
                        article_id,
                        ProgressState::error(
                            "llm_all_perspectives_invalid",
                            json!({"kind": "all_perspectives_invalid"}),
                            now(),
                        ),
                    )
                    .await;
                return Err(ScoreManagerError::AllPerspectivesInvalid);
            }
        };

        articles::set_article_composite(
            &self.pool,
            article_id,
            combined.composite,
            combined.confidence,
            "llm",
        )
        .await?;

        self.response_cache.invalidate_for_article(article_id).await;
        self.article_cache.invalidate_for_article(article_id).await;

        self.progress
            .set(
                article_id,
                ProgressState::success(combined.composite, now()),
            )
            .await;

        Ok(())
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn code_tag(code: crate::error::ErrorCode) -> &'static str {
    use crate::error::ErrorCode;
    match code {
        ErrorCode::LlmAuth => "llm_auth",
        ErrorCode::LlmPayment => "llm_payment",
        ErrorCode::LlmRateLimited => "llm_rate_limited",
        ErrorCode::LlmUnavailable => "llm_unavailable",
        ErrorCode::LlmStreaming => "llm_streaming",
        ErrorCode::LlmAllPerspectivesInvalid => "llm_all_perspectives_invalid",
        ErrorCode::Timeout => "timeout",
        ErrorCode::NotFound => "not_found",
        ErrorCode::Conflict => "conflict",
        ErrorCode::Validation => "validation",
        ErrorCode::Internal => "internal",
    }
}

fn recommended_action(err: &crate::error::TransportError) -> &'static str {
    use crate::error::TransportError;
    match err {
        TransportError::AuthFailed => "check the configured LLM credential",
        TransportError::PaymentRequired => "verify billing status with the LLM provider",
        TransportError::RateLimited { .. } => "retry after the indicated delay, or add a secondary credential",
        TransportError::Unavailable { .. } => "retry later; the LLM endpoint is unreachable",
        TransportError::Malformed(_) => "inspect the raw reply; the response envelope did not parse",
        TransportError::StreamingError(_) => "retry; the response stream closed prematurely",
        TransportError::Request(_) => "retry later; the transport request failed",
    }
}
