//! In-memory caches (C3 `ResponseCache`, C11 `ArticleCache`).
//!
//! Both are process-wide, constructed once and shared behind an `Arc`: a
//! `tokio::sync::RwLock` over a plain `HashMap` rather than a lock-free map,
//! since contention here is low (one entry per scoring call, not per request).

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// A single model's cached scoring result (I4: semantically equivalent to a
/// fresh call for the same content+model).
#[derive(Debug, Clone)]
pub struct CachedResponse {
    /// The raw text reply Transport returned.
    pub text: String,
    /// The model that actually produced the reply (post-failover).
    pub responding_model: String,
}

/// Content-addressed memoisation of single-model LLM answers.
///
/// Keys are `sha256(normalised(content)) || "|" || model` (I4). No TTL by
/// default; entries are removed only by explicit per-article invalidation,
/// tracked through a secondary `article_id -> {keys}` index.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<RwLock<ResponseCacheInner>>,
}

#[derive(Default)]
struct ResponseCacheInner {
    entries: HashMap<String, CachedResponse>,
    by_article: HashMap<i64, Vec<String>>,
}

impl ResponseCache {
    /// Create an empty response cache.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(ResponseCacheInner::default())),
        }
    }

    /// Content-address a `(content, model)` pair per I4.
    pub fn key(content: &str, model: &str) -> String {
        let normalised = normalise(content);
        let mut hasher = Sha256::new();
        hasher.update(normalised.as_bytes());
        format!("{}|{}", hex::encode(hasher.finalize()), model)
    }

    /// Look up a cached response for `(content, model)`.
    pub async fn get(&self, content: &str, model: &str) -> Option<CachedResponse> {
        let key = Self::key(content, model);
        self.inner.read().await.entries.get(&key).cloned()
    }

    /// Record a response, associating it with `article_id` so it can be
    /// invalidated later.
    pub async fn put(&self, article_id: i64, content: &str, model: &str, response: CachedResponse) {
        let key = Self::key(content, model);
        let mut inner = self.inner.write().await;
        inner.entries.insert(key.clone(), response);
        inner.by_article.entry(article_id).or_default().push(key);
    }

    /// Remove every cache entry associated with an article.
    pub async fn invalidate_for_article(&self, article_id: i64) {
        let mut inner = self.inner.write().await;
        if let Some(keys) = inner.by_article.remove(&article_id) {
            for key in keys {
                inner.entries.remove(&key);
            }
        }
    }

    /// Number of distinct cached entries (for diagnostics/tests).
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercase and collapse whitespace, per spec.md §4.5.
fn normalise(content: &str) -> String {
    content.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A TTL cache entry wrapping an arbitrary JSON-serialisable payload.
#[derive(Debug, Clone)]
struct ArticleCacheEntry {
    payload: String,
    inserted_at: Instant,
}

/// TTL cache for article list/detail reads (C11), independent of
/// `ResponseCache`. Keyed by canonicalised query string plus article id.
#[derive(Clone)]
pub struct ArticleCache {
    inner: Arc<RwLock<ArticleCacheInner>>,
    ttl: Duration,
}

#[derive(Default)]
struct ArticleCacheInner {
    entries: HashMap<String, ArticleCacheEntry>,
    by_article: HashMap<i64, Vec<String>>,
}

impl ArticleCache {
    /// Create an article cache with the given TTL (spec default 30s).
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ArticleCacheInner::default())),
            ttl,
        }
    }

    /// Fetch a cached payload for `key` if present and not expired.
    pub async fn get(&self, key: &str) -> Option<String> {
        let inner = self.inner.read().await;
        let entry = inner.entries.get(key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.payload.clone())
    }

    /// Cache a serialised payload for `key`, associated with one or more
    /// article ids for later invalidation (empty for list-level queries with
    /// no single owning article).
    pub async fn put(&self, key: String, article_ids: &[i64], payload: String) {
        let mut inner = self.inner.write().await;
        inner.entries.insert(
            key.clone(),
            ArticleCacheEntry {
                payload,
                inserted_at: Instant::now(),
            },
        );
        for id in article_ids {
            inner.by_article.entry(*id).or_default().push(key.clone());
        }
    }

    /// Invalidate every cached entry that touched `article_id`.
    pub async fn invalidate_for_article(&self, article_id: i64) {
        let mut inner = self.inner.write().await;
        if let Some(keys) = inner.by_article.remove(&article_id) {
            for key in keys {
                inner.entries.remove(&key);
            }
        }
    }
}
