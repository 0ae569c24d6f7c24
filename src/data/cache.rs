//! In-memory caches
//!
//! Volatile, cleared on restart. Uses Moka for concurrent caching.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde_json::Value;

use crate::metrics;

/// Remote actor document cache
///
/// Keyed by the resolved actor URI. Entries expire after the configured
/// TTL (7 days by default) and are refetched on the next resolution;
/// a hit returns the raw cached JSON unconditionally.
pub struct ActorCache {
    documents: Cache<String, Arc<Value>>,
}

impl ActorCache {
    pub fn new(ttl: Duration) -> Self {
        let documents = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(ttl)
            .build();

        Self { documents }
    }

    /// Cached document for an actor URI, if fresh.
    pub async fn get(&self, actor_uri: &str) -> Option<Arc<Value>> {
        let result = self.documents.get(actor_uri).await;

        if result.is_some() {
            metrics::CACHE_HITS_TOTAL.with_label_values(&["actor"]).inc();
        } else {
            metrics::CACHE_MISSES_TOTAL
                .with_label_values(&["actor"])
                .inc();
        }

        result
    }

    /// Insert or refresh a document.
    pub async fn insert(&self, actor_uri: &str, document: Arc<Value>) {
        self.documents.insert(actor_uri.to_string(), document).await;
    }

    /// Drop a cached document (tombstone observed, key rotation).
    pub async fn invalidate(&self, actor_uri: &str) {
        self.documents.invalidate(actor_uri).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_expire_after_the_ttl() {
        let cache = ActorCache::new(Duration::from_millis(80));
        let document = Arc::new(serde_json::json!({"id": "https://remote.example/users/alice"}));

        cache
            .insert("https://remote.example/users/alice", document.clone())
            .await;
        assert!(
            cache
                .get("https://remote.example/users/alice")
                .await
                .is_some()
        );

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(
            cache
                .get("https://remote.example/users/alice")
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn invalidate_drops_the_entry() {
        let cache = ActorCache::new(Duration::from_secs(60));
        let document = Arc::new(serde_json::json!({"id": "https://remote.example/users/alice"}));

        cache
            .insert("https://remote.example/users/alice", document)
            .await;
        cache.invalidate("https://remote.example/users/alice").await;
        assert!(
            cache
                .get("https://remote.example/users/alice")
                .await
                .is_none()
        );
    }
}
