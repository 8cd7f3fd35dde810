//! CRUD operations for articles.
//!
//! Articles are owned by the RSS collector (external to this crate); the
//! core only reads them and mutates their score fields (`composite_score`,
//! `confidence`, `score_source`).

use super::DbPool;
use crate::error::StoreError;

/// A news article, as ingested by the RSS collector and enriched with a
/// composite bias score by this crate.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct Article {
    /// Stable integer id.
    pub id: i64,
    /// The feed/outlet this article came from.
    pub source: String,
    /// Canonical article URL (unique).
    pub url: String,
    /// Article headline.
    pub title: String,
    /// Full article body text.
    pub content: String,
    /// RFC3339 publication timestamp, as supplied by the feed.
    pub published_at: String,
    /// RFC3339 ingestion timestamp.
    pub created_at: String,
    /// Composite bias score in `[-1, 1]`, or `None` if never scored.
    pub composite_score: Option<f64>,
    /// Confidence in `[0, 1]` paired with `composite_score`.
    pub confidence: Option<f64>,
    /// Tag identifying how the composite was produced (`"llm"` or `"manual"`).
    pub score_source: Option<String>,
}

/// Fetch a single article by id.
pub async fn get_article(pool: &DbPool, id: i64) -> Result<Article, StoreError> {
    sqlx::query_as::<_, Article>("SELECT * FROM articles WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("article {id}")))
}

/// Set the composite score, confidence, and score source for an article.
pub async fn set_article_composite(
    pool: &DbPool,
    id: i64,
    score: f64,
    confidence: f64,
    score_source: &str,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE articles SET composite_score = ?, confidence = ?, score_source = ? WHERE id = ?",
    )
    .bind(score)
    .bind(confidence)
    .bind(score_source)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(format!("article {id}")));
    }
    Ok(())
}

/// Whether an article with this exact URL already exists.
///
/// Part of the dedup rule the RSS ingestion contract relies on; documented
/// here because it encodes the uniqueness invariant Store owns.
pub async fn article_exists_by_url(pool: &DbPool, url: &str) -> Result<bool, StoreError> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM articles WHERE url = ? LIMIT 1")
        .bind(url)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

/// Whether an article with a case-folded, punctuation-stripped-identical
/// title already exists.
pub async fn article_exists_by_similar_title(
    pool: &DbPool,
    title: &str,
) -> Result<bool, StoreError> {
    let normalized = normalize_title(title);
    let titles: Vec<(String,)> = sqlx::query_as("SELECT title FROM articles")
        .fetch_all(pool)
        .await?;
    Ok(titles
        .iter()
        .any(|(existing,)| normalize_title(existing) == normalized))
}

/// List articles, most recently published first, with a limit/offset page.
pub async fn list_articles(
    pool: &DbPool,
    limit: i64,
    offset: i64,
) -> Result<Vec<Article>, StoreError> {
    sqlx::query_as::<_, Article>(
        "SELECT * FROM articles ORDER BY published_at DESC LIMIT ? OFFSET ?",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
    .map_err(StoreError::from)
}

/// Case-fold and strip punctuation, per the `similar` rule in spec §4.1.
fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Insert a minimal article row for tests run against another crate (the
/// HTTP server's integration tests in particular). Mirrors the fixture the
/// in-crate unit tests below build inline.
#[cfg(any(test, feature = "test-helpers"))]
pub async fn seed_for_test(
    pool: &DbPool,
    source: &str,
    url: &str,
    title: &str,
    content: &str,
) -> Result<i64, StoreError> {
    sqlx::query(
        "INSERT INTO articles (source, url, title, content, published_at, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(source)
    .bind(url)
    .bind(title)
    .bind(content)
    .bind("2024-01-01T00:00:00Z")
    .bind("2024-01-01T00:00:01Z")
    .execute(pool)
    .await?;

    sqlx::query_as::<_, (i64,)>("SELECT id FROM articles WHERE url = ?")
        .bind(url)
        .fetch_one(pool)
        .await
        .map(|(id,)| id)
        .map_err(StoreError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::init_test_db;

    async fn seed_article(pool: &DbPool, url: &str, title: &str) -> i64 {
        seed_for_test(pool, "feed-a", url, title, "body text")
            .await
            .expect("insert article")
    }

    #[tokio::test]
    async fn get_article_returns_not_found() {
        let pool = init_test_db().await.expect("db");
        let err = get_article(&pool, 999).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn set_article_composite_persists_fields() {
        let pool = init_test_db().await.expect("db");
        let id = seed_article(&pool, "https://example.test/a", "Headline One").await;

        set_article_composite(&pool, id, 0.5, 0.8, "llm")
            .await
            .expect("set composite");

        let article = get_article(&pool, id).await.expect("get article");
        assert_eq!(article.composite_score, Some(0.5));
        assert_eq!(article.confidence, Some(0.8));
        assert_eq!(article.score_source.as_deref(), Some("llm"));
    }

    #[tokio::test]
    async fn article_exists_by_url_detects_duplicates() {
        let pool = init_test_db().await.expect("db");
        seed_article(&pool, "https://example.test/dup", "Title").await;

        assert!(article_exists_by_url(&pool, "https://example.test/dup")
            .await
            .expect("query"));
        assert!(!article_exists_by_url(&pool, "https://example.test/other")
            .await
            .expect("query"));
    }

    #[tokio::test]
    async fn similar_title_match_is_case_and_punctuation_insensitive() {
        let pool = init_test_db().await.expect("db");
        seed_article(&pool, "https://example.test/a", "Senate Passes, The Big Bill!").await;

        assert!(
            article_exists_by_similar_title(&pool, "senate passes the big bill")
                .await
                .expect("query")
        );
        assert!(
            !article_exists_by_similar_title(&pool, "house rejects the big bill")
                .await
                .expect("query")
        );
    }
}
