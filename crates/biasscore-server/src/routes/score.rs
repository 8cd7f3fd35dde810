//! Handlers for triggering a rescore, streaming its progress, setting a
//! manual override, and reading per-model scores (spec.md §4.10, §6).

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use biasscore_core::error::StoreError;
use biasscore_core::storage::articles;
use biasscore_core::storage::scores as score_store;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ok, ApiError};
use crate::state::AppState;

/// Parse and validate a path-carried article id (spec.md §4.10: positive integer, else 400).
fn parse_article_id(raw: &str) -> Result<i64, ApiError> {
    let id: i64 = raw
        .parse()
        .map_err(|_| ApiError::Validation(format!("invalid article id: {raw}")))?;
    if id <= 0 {
        return Err(ApiError::Validation(format!("invalid article id: {raw}")));
    }
    Ok(id)
}

/// `POST /api/llm/reanalyze/{id}` — start a rescore, or coalesce onto one
/// already in flight for this article (I5).
pub async fn reanalyze(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> Result<Response, ApiError> {
    let article_id = parse_article_id(&raw_id)?;

    articles::get_article(&state.db, article_id)
        .await
        .map_err(|e| match e {
            StoreError::NotFound(msg) => ApiError::NotFound(msg),
            other => ApiError::Internal(other.to_string()),
        })?;

    if !state.try_claim_in_flight(article_id).await {
        return Ok((
            axum::http::StatusCode::OK,
            ok(json!({ "article_id": article_id, "status": "already_in_progress" })),
        )
            .into_response());
    }

    let cfg = state.ensemble_config.read().await.clone();
    let manager = state.score_manager.clone();
    let background_state = state.clone();
    tokio::spawn(async move {
        let _ = manager.rescore(article_id, cfg).await;
        background_state.release_in_flight(article_id).await;
    });

    Ok((
        axum::http::StatusCode::ACCEPTED,
        ok(json!({ "article_id": article_id, "status": "started" })),
    )
        .into_response())
}

/// `GET /api/llm/score-progress/{id}` — SSE stream of `ProgressState` (spec.md §4.10).
pub async fn score_progress(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> Result<Sse<impl futures::Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let article_id = parse_article_id(&raw_id)?;

    articles::get_article(&state.db, article_id)
        .await
        .map_err(|e| match e {
            StoreError::NotFound(msg) => ApiError::NotFound(msg),
            other => ApiError::Internal(other.to_string()),
        })?;

    // I3: a progress entry exists iff a rescore job has been started.
    let stream = state
        .progress
        .subscribe(article_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("no rescore job in progress for article {article_id}")))?;

    let events = stream.map(|state| {
        let payload = serde_json::to_string(&state).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default().data(payload))
    });

    Ok(Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text(""),
    ))
}

/// Request body for `POST /api/manual-score/{id}`.
#[derive(Debug, Deserialize)]
pub struct ManualScoreRequest {
    /// The human-assigned composite score; must fall within `[-1, 1]`.
    pub score: f64,
}

/// `POST /api/manual-score/{id}` — set the composite score manually,
/// bypassing the ensemble. A subsequent rescore overwrites this only on
/// success (spec.md §8 scenario 6).
pub async fn manual_score(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
    Json(body): Json<ManualScoreRequest>,
) -> Result<Response, ApiError> {
    let article_id = parse_article_id(&raw_id)?;

    if !body.score.is_finite() || !(-1.0..=1.0).contains(&body.score) {
        return Err(ApiError::Validation(format!(
            "score {} outside [-1, 1]",
            body.score
        )));
    }

    articles::get_article(&state.db, article_id)
        .await
        .map_err(|e| match e {
            StoreError::NotFound(msg) => ApiError::NotFound(msg),
            other => ApiError::Internal(other.to_string()),
        })?;

    articles::set_article_composite(&state.db, article_id, body.score, 1.0, "manual")
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    state.article_cache.invalidate_for_article(article_id).await;

    let article = articles::get_article(&state.db, article_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok((axum::http::StatusCode::OK, ok(article)).into_response())
}

/// `GET /api/articles/{id}/ensemble` — per-model scores plus the composite.
///
/// Backed by `ArticleCache` (C11): a hit returns the cached detail payload
/// without touching the store; a miss populates the cache under the same
/// per-article key `ScoreManager`/`manual_score` invalidate on write.
pub async fn article_ensemble(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> Result<Response, ApiError> {
    let article_id = parse_article_id(&raw_id)?;
    let cache_key = format!("articles:detail:{article_id}");

    if let Some(cached) = state.article_cache.get(&cache_key).await {
        let data: serde_json::Value = serde_json::from_str(&cached).unwrap_or(Value::Null);
        return Ok((axum::http::StatusCode::OK, ok(data)).into_response());
    }

    let article = articles::get_article(&state.db, article_id)
        .await
        .map_err(|e| match e {
            StoreError::NotFound(msg) => ApiError::NotFound(msg),
            other => ApiError::Internal(other.to_string()),
        })?;

    let scores = score_store::list_scores(&state.db, article_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    if scores.is_empty() {
        return Err(ApiError::ScoreManager(
            biasscore_core::error::ScoreManagerError::AllPerspectivesInvalid,
        ));
    }

    let data = json!({
        "article_id": article.id,
        "composite_score": article.composite_score,
        "confidence": article.confidence,
        "score_source": article.score_source,
        "scores": scores,
    });

    state
        .article_cache
        .put(cache_key, &[article_id], data.to_string())
        .await;

    Ok((axum::http::StatusCode::OK, ok(data)).into_response())
}
