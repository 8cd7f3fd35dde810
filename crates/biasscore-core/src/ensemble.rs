//! Per-article orchestration across the configured model roster (C7).
//!
//! `analyze_article` calls Transport once per `(model, prompt_variant)`
//! pair (through `ResponseCache`), collapses prompt-variant duplicates per
//! model by averaging, persists a `ModelScore` row per model, and reports
//! progress. The `ParseOutcome`-tagged result for each model is returned to
//! the caller so `calculator::combine` can apply `handle_invalid` exactly
//! once (spec.md §9 Design Notes) rather than baking a substitution into
//! the persisted row's meaning.

use crate::cache::{CachedResponse, ResponseCache};
use crate::calculator::ScoredModel;
use crate::config::{EnsembleConfig, ModelConfig};
use crate::error::{EnsembleError, TransportError};
use crate::llm::Transport;
use crate::parser::{self, ParseOutcome};
use crate::progress::{ProgressState, ProgressTracker};
use crate::storage::articles::Article;
use crate::storage::{scores as score_store, DbPool};
use serde_json::json;

const DEFAULT_PROMPT_TEMPLATE: &str = "Read the following news article and rate its political \
bias on a scale from -1.0 (strongly left-leaning) to 1.0 (strongly right-leaning), with 0.0 being \
neutral. Respond as JSON: {{\"score\": <number>, \"confidence\": <0-1>, \"explanation\": \"<why>\"}}.\n\n\
Title: {title}\n\nContent: {content}";

/// Run the ensemble over one article, returning a tagged outcome per model
/// in the order the roster was configured (I/O and mutation side effects:
/// Transport calls, ResponseCache reads/writes, a per-model Store upsert,
/// and progress ticks).
pub async fn analyze_article(
    pool: &DbPool,
    transport: &Transport,
    cache: &ResponseCache,
    progress: &ProgressTracker,
    article: &Article,
    cfg: &EnsembleConfig,
) -> Result<Vec<ScoredModel>, EnsembleError> {
    let total = cfg.models.len().max(1);
    let mut results = Vec::with_capacity(cfg.models.len());

    for (index, model) in cfg.models.iter().enumerate() {
        let outcome = score_one_model(pool, transport, cache, article, model, cfg).await?;

        let percent = (((index + 1) * 100) / total) as u8;
        progress
            .set(
                article.id,
                ProgressState::in_progress(
                    "Scoring",
                    &format!("{:?}/{}", model.perspective, model.name),
                    percent,
                    chrono::Utc::now().timestamp(),
                ),
            )
            .await;

        results.push(ScoredModel {
            model: model.name.clone(),
            outcome,
        });
    }

    if results
        .iter()
        .all(|r| matches!(r.outcome, ParseOutcome::Invalid { .. }))
    {
        return Err(EnsembleError::AllPerspectivesInvalid);
    }

    Ok(results)
}

/// Run every configured prompt variant for a single model, collapse the
/// results by averaging (duplicate-score rule, spec.md §4.4 rule 2), and
/// persist the outcome.
async fn score_one_model(
    pool: &DbPool,
    transport: &Transport,
    cache: &ResponseCache,
    article: &Article,
    model: &ModelConfig,
    cfg: &EnsembleConfig,
) -> Result<ParseOutcome, EnsembleError> {
    let mut valid_scores = Vec::new();
    let mut valid_confidences = Vec::new();
    let mut last_explanation = None;
    let mut last_invalid_reason = None;
    let mut fatal: Option<TransportError> = None;

    for variant in &cfg.prompt_variants {
        let content = render_prompt(variant, article);

        let reply_text = match cache.get(&content, &model.name).await {
            Some(cached) => cached.text,
            None => match transport.score_content(&content, model, cfg).await {
                Ok(reply) => {
                    cache
                        .put(
                            article.id,
                            &content,
                            &model.name,
                            CachedResponse {
                                text: reply.text.clone(),
                                responding_model: reply.responding_model,
                            },
                        )
                        .await;
                    reply.text
                }
                Err(err) => {
                    fatal = Some(err);
                    continue;
                }
            },
        };

        match parser::parse(&reply_text, cfg.min_score, cfg.max_score) {
            ParseOutcome::Valid {
                score,
                confidence,
                explanation,
            } => {
                valid_scores.push(score);
                valid_confidences.push(confidence);
                last_explanation = explanation;
            }
            ParseOutcome::Invalid { reason } => {
                last_invalid_reason = Some(reason);
            }
        }
    }

    let outcome = if valid_scores.is_empty() {
        // Every variant either failed at the transport level or parsed as
        // invalid; prefer a parse-failure reason when one exists, otherwise
        // report (and persist) the transport error for diagnostics.
        let reason = match (last_invalid_reason, fatal) {
            (Some(reason), _) => reason,
            (None, Some(err)) => {
                persist_transport_failure(pool, article.id, &model.name, &err).await;
                err.to_string()
            }
            (None, None) => "no prompt variant produced a usable score".to_string(),
        };
        ParseOutcome::Invalid { reason }
    } else {
        let n = valid_scores.len() as f64;
        ParseOutcome::Valid {
            score: valid_scores.iter().sum::<f64>() / n,
            confidence: valid_confidences.iter().sum::<f64>() / n,
            explanation: last_explanation,
        }
    };

    persist_outcome(pool, article.id, &model.name, &outcome, cfg).await?;
    Ok(outcome)
}

/// Render a prompt-variant template against an article. A variant naming a
/// readable file is treated as a template path (`{title}`/`{content}`
/// placeholders); anything else (including the `"default"` sentinel) falls
/// back to the built-in template.
fn render_prompt(variant: &str, article: &Article) -> String {
    let template = std::fs::read_to_string(variant).unwrap_or_else(|_| DEFAULT_PROMPT_TEMPLATE.to_string());
    template
        .replace("{title}", &article.title)
        .replace("{content}", &article.content)
}

async fn persist_outcome(
    pool: &DbPool,
    article_id: i64,
    model: &str,
    outcome: &ParseOutcome,
    cfg: &EnsembleConfig,
) -> Result<(), EnsembleError> {
    let (score, metadata) = match outcome {
        ParseOutcome::Valid {
            score,
            confidence,
            explanation,
        } => (
            *score,
            json!({
                "confidence": confidence,
                "explanation": explanation,
                "valid": true,
            }),
        ),
        ParseOutcome::Invalid { reason } => (
            cfg.default_missing,
            json!({
                "confidence": 0.0,
                "explanation": serde_json::Value::Null,
                "valid": false,
                "invalid_reason": reason,
            }),
        ),
    };

    let version = next_version(pool, article_id, model).await;
    score_store::upsert_score(
        pool,
        article_id,
        model,
        score,
        &metadata.to_string(),
        version,
        &chrono::Utc::now().to_rfc3339(),
    )
    .await
    .map_err(|e| EnsembleError::Transport(TransportError::Unavailable {
        message: format!("failed to persist model score: {e}"),
    }))?;

    Ok(())
}

async fn persist_transport_failure(
    pool: &DbPool,
    article_id: i64,
    model: &str,
    err: &TransportError,
) {
    let metadata = json!({
        "confidence": 0.0,
        "explanation": serde_json::Value::Null,
        "valid": false,
        "transport_error": err.to_string(),
    });
    let version = next_version(pool, article_id, model).await;
    let _ = score_store::upsert_score(
        pool,
        article_id,
        model,
        0.0,
        &metadata.to_string(),
        version,
        &chrono::Utc::now().to_rfc3339(),
    )
    .await;
}

async fn next_version(pool: &DbPool, article_id: i64, model: &str) -> i64 {
    match score_store::list_scores(pool, article_id).await {
        Ok(scores) => scores
            .into_iter()
            .find(|s| s.model == model)
            .map(|s| s.version + 1)
            .unwrap_or(1),
        Err(_) => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HandleInvalid, Perspective};
    use crate::storage::init_test_db;
    use std::collections::HashMap;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn article() -> Article {
        Article {
            id: 1,
            source: "feed".into(),
            url: "https://example.test/a".into(),
            title: "Senate passes bill".into(),
            content: "Lawmakers voted today...".into(),
            published_at: "2024-01-01T00:00:00Z".into(),
            created_at: "2024-01-01T00:00:01Z".into(),
            composite_score: None,
            confidence: None,
            score_source: None,
        }
    }

    fn ensemble_cfg(models: Vec<ModelConfig>) -> EnsembleConfig {
        EnsembleConfig {
            models,
            min_score: -1.0,
            max_score: 1.0,
            default_missing: 0.0,
            handle_invalid: HandleInvalid::Ignore,
            formula: crate::config::Formula::Average,
            weights: HashMap::new(),
            confidence_method: crate::config::ConfidenceMethod::Average,
            confidence_params: Default::default(),
            prompt_variants: vec!["default".to_string()],
        }
    }

    async fn seed_article(pool: &DbPool) {
        sqlx::query(
            "INSERT INTO articles (id, source, url, title, content, published_at, created_at) \
             VALUES (1, 'feed', 'https://example.test/a', 'T', 'body', '2024-01-01T00:00:00Z', '2024-01-01T00:00:01Z')",
        )
        .execute(pool)
        .await
        .expect("seed article");
    }

    #[tokio::test]
    async fn analyze_article_persists_a_score_per_model() {
        let pool = init_test_db().await.expect("db");
        seed_article(&pool).await;

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "gpt-left",
                "choices": [{"message": {"content": "{\"score\": -0.4, \"confidence\": 0.8}"}}]
            })))
            .mount(&server)
            .await;

        let model = ModelConfig {
            name: "gpt-left".into(),
            perspective: Perspective::Left,
            url: Some(format!("{}/chat", server.uri())),
            role: None,
        };
        let cfg = ensemble_cfg(vec![model]);
        let transport = Transport::new(crate::config::LlmConfig {
            primary_key: None,
            secondary_key: None,
            base_url: format!("{}/chat", server.uri()),
            timeout_seconds: 5,
        });
        let cache = ResponseCache::new();
        let progress = ProgressTracker::new(std::time::Duration::from_secs(3600));

        let results = analyze_article(&pool, &transport, &cache, &progress, &article(), &cfg)
            .await
            .expect("analysis succeeds");

        assert_eq!(results.len(), 1);
        assert!(matches!(results[0].outcome, ParseOutcome::Valid { score, .. } if score == -0.4));

        let stored = score_store::list_scores(&pool, 1).await.expect("list scores");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].model, "gpt-left");
    }

    #[tokio::test]
    async fn analyze_article_fails_when_every_model_invalid() {
        let pool = init_test_db().await.expect("db");
        seed_article(&pool).await;

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "gpt-left",
                "choices": [{"message": {"content": "not a score at all"}}]
            })))
            .mount(&server)
            .await;

        let model = ModelConfig {
            name: "gpt-left".into(),
            perspective: Perspective::Left,
            url: Some(format!("{}/chat", server.uri())),
            role: None,
        };
        let cfg = ensemble_cfg(vec![model]);
        let transport = Transport::new(crate::config::LlmConfig {
            primary_key: None,
            secondary_key: None,
            base_url: format!("{}/chat", server.uri()),
            timeout_seconds: 5,
        });
        let cache = ResponseCache::new();
        let progress = ProgressTracker::new(std::time::Duration::from_secs(3600));

        let err = analyze_article(&pool, &transport, &cache, &progress, &article(), &cfg)
            .await
            .unwrap_err();
        assert!(matches!(err, EnsembleError::AllPerspectivesInvalid));
    }

    #[tokio::test]
    async fn repeated_analysis_overwrites_model_score_in_place() {
        let pool = init_test_db().await.expect("db");
        seed_article(&pool).await;

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "gpt-left",
                "choices": [{"message": {"content": "{\"score\": 0.1, \"confidence\": 0.5}"}}]
            })))
            .mount(&server)
            .await;

        let model = ModelConfig {
            name: "gpt-left".into(),
            perspective: Perspective::Left,
            url: Some(format!("{}/chat", server.uri())),
            role: None,
        };
        let cfg = ensemble_cfg(vec![model]);
        let transport = Transport::new(crate::config::LlmConfig {
            primary_key: None,
            secondary_key: None,
            base_url: format!("{}/chat", server.uri()),
            timeout_seconds: 5,
        });
        let cache = ResponseCache::new();
        let progress = ProgressTracker::new(std::time::Duration::from_secs(3600));

        analyze_article(&pool, &transport, &cache, &progress, &article(), &cfg)
            .await
            .expect("first run");
        analyze_article(&pool, &transport, &cache, &progress, &article(), &cfg)
            .await
            .expect("second run");

        let stored = score_store::list_scores(&pool, 1).await.expect("list scores");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].version, 2);
    }
}
