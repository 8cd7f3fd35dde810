//! Bias-scoring HTTP API server.
//!
//! Exposes `biasscore-core`'s ensemble + storage layer as a REST API:
//! triggering rescores, streaming their progress over SSE, recording manual
//! overrides, and reading per-model breakdowns.

pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the complete axum router with all API routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/health", get(routes::health::health))
        .route("/llm/reanalyze/{id}", post(routes::score::reanalyze))
        .route(
            "/llm/score-progress/{id}",
            get(routes::score::score_progress),
        )
        .route("/manual-score/{id}", post(routes::score::manual_score))
        .route(
            "/articles/{id}/ensemble",
            get(routes::score::article_ensemble),
        );

    Router::new()
        .nest("/api", api)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
