//! CRUD operations for per-(article, model) LLM scores.
//!
//! `(article_id, model)` is unique at the schema level (I1); `upsert_score`
//! relies on `ON CONFLICT ... DO UPDATE` to express "overwrite in place",
//! since a repeat write for the same key is the expected, common case (a
//! rescore) rather than something to silently ignore.

use super::DbPool;
use crate::error::StoreError;

/// A single model's scoring result for one article.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct ModelScore {
    /// Row id.
    pub id: i64,
    /// The article this score belongs to.
    pub article_id: i64,
    /// The model identifier that produced this score.
    pub model: String,
    /// The raw score in the configured `[min_score, max_score]` range.
    pub score: f64,
    /// Opaque JSON blob: `confidence`, `explanation`, and diagnostics.
    pub metadata: String,
    /// Monotone version counter, bumped on every upsert.
    pub version: i64,
    /// RFC3339 timestamp of the write.
    pub created_at: String,
}

/// Atomically upsert a model's score for an article, keyed by
/// `(article_id, model)`. An existing row is overwritten in place (I1).
pub async fn upsert_score(
    pool: &DbPool,
    article_id: i64,
    model: &str,
    score: f64,
    metadata: &str,
    version: i64,
    created_at: &str,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO llm_scores (article_id, model, score, metadata, version, created_at) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT(article_id, model) DO UPDATE SET \
           score = excluded.score, \
           metadata = excluded.metadata, \
           version = excluded.version, \
           created_at = excluded.created_at",
    )
    .bind(article_id)
    .bind(model)
    .bind(score)
    .bind(metadata)
    .bind(version)
    .bind(created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// List every model score recorded for an article, newest first.
pub async fn list_scores(pool: &DbPool, article_id: i64) -> Result<Vec<ModelScore>, StoreError> {
    sqlx::query_as::<_, ModelScore>(
        "SELECT * FROM llm_scores WHERE article_id = ? ORDER BY created_at DESC",
    )
    .bind(article_id)
    .fetch_all(pool)
    .await
    .map_err(StoreError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::init_test_db;

    async fn seed_article(pool: &DbPool) -> i64 {
        sqlx::query(
            "INSERT INTO articles (source, url, title, content, published_at, created_at) \
             VALUES ('feed', 'https://example.test/x', 'T', 'body', '2024-01-01T00:00:00Z', '2024-01-01T00:00:01Z')",
        )
        .execute(pool)
        .await
        .expect("insert article");
        sqlx::query_as::<_, (i64,)>("SELECT id FROM articles WHERE url = 'https://example.test/x'")
            .fetch_one(pool)
            .await
            .expect("fetch id")
            .0
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_row_for_same_key() {
        let pool = init_test_db().await.expect("db");
        let article_id = seed_article(&pool).await;

        upsert_score(&pool, article_id, "gpt-left", 0.2, "{}", 1, "2024-01-01T00:00:02Z")
            .await
            .expect("first upsert");
        upsert_score(&pool, article_id, "gpt-left", 0.4, "{}", 2, "2024-01-01T00:00:03Z")
            .await
            .expect("second upsert");

        let scores = list_scores(&pool, article_id).await.expect("list");
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].score, 0.4);
        assert_eq!(scores[0].version, 2);
    }

    #[tokio::test]
    async fn list_scores_orders_newest_first() {
        let pool = init_test_db().await.expect("db");
        let article_id = seed_article(&pool).await;

        upsert_score(&pool, article_id, "gpt-left", 0.1, "{}", 1, "2024-01-01T00:00:01Z")
            .await
            .expect("upsert left");
        upsert_score(&pool, article_id, "gpt-right", 0.1, "{}", 1, "2024-01-01T00:00:02Z")
            .await
            .expect("upsert right");

        let scores = list_scores(&pool, article_id).await.expect("list");
        assert_eq!(scores.len(), 2);
        assert_eq!(scores[0].model, "gpt-right");
        assert_eq!(scores[1].model, "gpt-left");
    }

    #[tokio::test]
    async fn distinct_models_both_persist() {
        let pool = init_test_db().await.expect("db");
        let article_id = seed_article(&pool).await;

        upsert_score(&pool, article_id, "gpt-left", 0.1, "{}", 1, "2024-01-01T00:00:01Z")
            .await
            .expect("upsert left");
        upsert_score(&pool, article_id, "gpt-center", 0.0, "{}", 1, "2024-01-01T00:00:01Z")
            .await
            .expect("upsert center");

        let scores = list_scores(&pool, article_id).await.expect("list");
        assert_eq!(scores.len(), 2);
    }
}
