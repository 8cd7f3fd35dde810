//! Integration tests for the biasscore-server API routes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use biasscore_core::cache::{ArticleCache, ResponseCache};
use biasscore_core::config::{EnsembleConfig, Formula, HandleInvalid, ModelConfig, Perspective};
use biasscore_core::llm::Transport;
use biasscore_core::progress::ProgressTracker;
use biasscore_core::score_manager::ScoreManager;
use biasscore_core::storage::{self, articles};

use biasscore_server::state::AppState;

/// A one-model ensemble configuration cheap enough to construct by hand.
fn test_ensemble_config() -> EnsembleConfig {
    EnsembleConfig {
        models: vec![ModelConfig {
            name: "left-model".to_string(),
            perspective: Perspective::Left,
            url: None,
            role: None,
        }],
        min_score: -1.0,
        max_score: 1.0,
        default_missing: 0.0,
        handle_invalid: HandleInvalid::Ignore,
        formula: Formula::Average,
        weights: HashMap::new(),
        confidence_method: biasscore_core::config::ConfidenceMethod::Average,
        confidence_params: Default::default(),
        prompt_variants: vec!["default".to_string()],
    }
}

/// Build an `AppState` against an in-memory database, with a transport
/// pointed at nothing in particular (tests in this file never trigger a
/// real rescore; they exercise everything reachable without one).
async fn test_state() -> Arc<AppState> {
    let pool = storage::init_test_db().await.expect("init test db");
    let transport = Transport::new(biasscore_core::config::LlmConfig::default());
    let response_cache = ResponseCache::new();
    let article_cache = ArticleCache::new(Duration::from_secs(60));
    let progress = ProgressTracker::new(Duration::from_secs(60));

    let score_manager = ScoreManager::new(
        pool.clone(),
        transport,
        response_cache.clone(),
        article_cache.clone(),
        progress.clone(),
        Duration::from_secs(30),
    );

    Arc::new(AppState {
        db: pool,
        score_manager,
        progress,
        article_cache,
        response_cache,
        ensemble_config: tokio::sync::RwLock::new(test_ensemble_config()),
        in_flight: tokio::sync::Mutex::new(std::collections::HashSet::new()),
        auto_analyse_disabled: false,
    })
}

async fn get_json(router: axum::Router, path: &str) -> (StatusCode, serde_json::Value) {
    let req = Request::builder()
        .uri(path)
        .body(Body::empty())
        .expect("build request");

    let response = router.oneshot(req).await.expect("send request");
    let status = response.status();
    let body = response.into_body().collect().await.expect("read body");
    let json: serde_json::Value = serde_json::from_slice(&body.to_bytes()).expect("parse JSON");

    (status, json)
}

async fn post_json(
    router: axum::Router,
    path: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let req = Request::builder()
        .method("POST")
        .uri(path)
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .expect("build request");

    let response = router.oneshot(req).await.expect("send request");
    let status = response.status();
    let bytes = response.into_body().collect().await.expect("read body");
    let json: serde_json::Value = serde_json::from_slice(&bytes.to_bytes()).expect("parse JSON");

    (status, json)
}

#[tokio::test]
async fn health_reports_ok() {
    let router = biasscore_server::build_router(test_state().await);
    let (status, body) = get_json(router, "/api/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "ok");
}

#[tokio::test]
async fn reanalyze_404_for_missing_article() {
    let router = biasscore_server::build_router(test_state().await);
    let (status, body) = post_json(router, "/api/llm/reanalyze/999", serde_json::json!({})).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn reanalyze_rejects_non_positive_id() {
    let router = biasscore_server::build_router(test_state().await);
    let (status, body) = post_json(router, "/api/llm/reanalyze/0", serde_json::json!({})).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation");
}

#[tokio::test]
async fn reanalyze_accepts_existing_article_and_coalesces() {
    let state = test_state().await;
    articles::seed_for_test(&state.db, "wire", "https://example.com/a", "Title", "Body")
        .await
        .expect("seed article");

    let router = biasscore_server::build_router(state.clone());
    let (status, body) = post_json(
        router.clone(),
        "/api/llm/reanalyze/1",
        serde_json::json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["status"], "started");

    // The background rescore is still blocked on network I/O against an
    // unreachable transport, so the in-flight slot has not been released
    // yet; a second request for the same article coalesces onto it (I5).
    let (status, body) = post_json(router, "/api/llm/reanalyze/1", serde_json::json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "already_in_progress");
}

#[tokio::test]
async fn score_progress_404_without_a_started_job() {
    let state = test_state().await;
    articles::seed_for_test(&state.db, "wire", "https://example.com/b", "Title", "Body")
        .await
        .expect("seed article");

    let router = biasscore_server::build_router(state);
    let req = Request::builder()
        .uri("/api/llm/score-progress/1")
        .body(Body::empty())
        .expect("build request");
    let response = router.oneshot(req).await.expect("send request");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn manual_score_rejects_out_of_range() {
    let state = test_state().await;
    articles::seed_for_test(&state.db, "wire", "https://example.com/c", "Title", "Body")
        .await
        .expect("seed article");

    let router = biasscore_server::build_router(state);
    let (status, body) = post_json(
        router,
        "/api/manual-score/1",
        serde_json::json!({ "score": 2.0 }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation");
}

#[tokio::test]
async fn manual_score_sets_composite_and_invalidates_cache() {
    let state = test_state().await;
    articles::seed_for_test(&state.db, "wire", "https://example.com/d", "Title", "Body")
        .await
        .expect("seed article");
    state
        .article_cache
        .put("articles:list".to_string(), &[1], "stale".to_string())
        .await;

    let router = biasscore_server::build_router(state.clone());
    let (status, body) = post_json(
        router,
        "/api/manual-score/1",
        serde_json::json!({ "score": 0.5 }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["composite_score"], 0.5);
    assert_eq!(body["data"]["score_source"], "manual");
    assert!(state.article_cache.get("articles:list").await.is_none());
}

#[tokio::test]
async fn article_ensemble_422_when_unscored() {
    let state = test_state().await;
    articles::seed_for_test(&state.db, "wire", "https://example.com/e", "Title", "Body")
        .await
        .expect("seed article");

    let router = biasscore_server::build_router(state);
    let (status, body) = get_json(router, "/api/articles/1/ensemble").await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "llm_all_perspectives_invalid");
}

#[tokio::test]
async fn article_ensemble_404_for_missing_article() {
    let router = biasscore_server::build_router(test_state().await);
    let (status, _) = get_json(router, "/api/articles/1/ensemble").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}
