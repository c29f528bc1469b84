//! Persistent client cache.
//!
//! Versioned, TTL-checked JSON envelopes over durable device storage. The cache
//! fails open: whenever storage misbehaves the caller sees a miss or a no-op,
//! never an error.

use std::fmt;
use std::sync::Arc;

use metrics::counter;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::Duration;
use tracing::{debug, warn};

use crate::domain::ItemId;

use super::clock::{SharedClock, system_clock};
use super::config::ClientCacheConfig;
use super::storage::DurableStorage;

const METRIC_CLIENT_HIT: &str = "moodfeed_client_cache_hit_total";
const METRIC_CLIENT_MISS: &str = "moodfeed_client_cache_miss_total";

/// Stored form of every entry: `{"data": .., "timestamp": <epoch-ms>, "version": ".."}`.
#[derive(Debug, Serialize)]
struct EnvelopeRef<'a, T> {
    data: &'a T,
    timestamp: i64,
    version: &'a str,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    data: serde_json::Value,
    timestamp: i64,
    version: String,
}

/// Lifetimes for client-side reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStrategy {
    /// Frequently changing data.
    Short,
    Medium,
    Long,
    /// Static data.
    VeryLong,
}

impl CacheStrategy {
    pub fn ttl(self) -> Duration {
        match self {
            CacheStrategy::Short => Duration::seconds(30),
            CacheStrategy::Medium => Duration::minutes(5),
            CacheStrategy::Long => Duration::minutes(30),
            CacheStrategy::VeryLong => Duration::hours(24),
        }
    }
}

/// Client-side resource keys, rendered under the cache namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientKey {
    ComfortPosts {
        page: u32,
        filter: String,
        tag: Option<String>,
    },
    BestPosts {
        period: String,
    },
    MyRecentPosts,
    PostDetail {
        post_id: ItemId,
    },
    Comments {
        post_id: ItemId,
        page: u32,
    },
}

impl ClientKey {
    pub fn render_in(&self, namespace: &str) -> String {
        format!("{namespace}{}", Suffix(self))
    }
}

struct Suffix<'a>(&'a ClientKey);

impl fmt::Display for Suffix<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            ClientKey::ComfortPosts { page, filter, tag } => write!(
                f,
                "comfort_posts_{page}_{filter}_{}",
                tag.as_deref().unwrap_or("all")
            ),
            ClientKey::BestPosts { period } => write!(f, "best_posts_{period}"),
            ClientKey::MyRecentPosts => f.write_str("my_recent_posts"),
            ClientKey::PostDetail { post_id } => write!(f, "post_detail_{post_id}"),
            ClientKey::Comments { post_id, page } => write!(f, "comments_{post_id}_{page}"),
        }
    }
}

pub struct PersistentClientCache {
    storage: Arc<dyn DurableStorage>,
    config: ClientCacheConfig,
    clock: SharedClock,
}

impl PersistentClientCache {
    pub fn new(storage: Arc<dyn DurableStorage>, config: ClientCacheConfig) -> Self {
        Self::with_clock(storage, config, system_clock())
    }

    pub fn with_clock(
        storage: Arc<dyn DurableStorage>,
        config: ClientCacheConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            storage,
            config,
            clock,
        }
    }

    pub fn config(&self) -> &ClientCacheConfig {
        &self.config
    }

    pub fn key_for(&self, key: &ClientKey) -> String {
        key.render_in(&self.config.namespace)
    }

    /// Stores `value` stamped with the current time and cache version.
    ///
    /// Lifetime is decided by the reader, so no TTL is stored.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) {
        let envelope = EnvelopeRef {
            data: value,
            timestamp: self.clock.now_millis(),
            version: &self.config.version,
        };
        let encoded = match serde_json::to_string(&envelope) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(key, error = %err, "Client cache encode failed");
                return;
            }
        };
        match self.storage.set_item(key, &encoded).await {
            Ok(()) => debug!(key, bytes = encoded.len(), "Client cache stored"),
            Err(err) => warn!(key, error = %err, "Client cache write failed"),
        }
    }

    /// Reads `key` if it was written by this cache version no more than `ttl` ago.
    ///
    /// Version mismatches, expired entries and undecodable entries are purged.
    pub async fn get<T: DeserializeOwned>(&self, key: &str, ttl: Duration) -> Option<T> {
        let value = self.lookup(key, ttl).await;
        if value.is_some() {
            counter!(METRIC_CLIENT_HIT).increment(1);
        } else {
            counter!(METRIC_CLIENT_MISS).increment(1);
        }
        value
    }

    pub async fn get_default<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key, self.config.default_ttl()).await
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str, ttl: Duration) -> Option<T> {
        let raw = match self.storage.get_item(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(key, error = %err, "Client cache read failed");
                return None;
            }
        };

        let envelope: Envelope = match serde_json::from_str(&raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(key, error = %err, "Client cache entry undecodable");
                self.remove(key).await;
                return None;
            }
        };

        if envelope.version != self.config.version {
            debug!(
                key,
                stored = %envelope.version,
                current = %self.config.version,
                "Client cache version mismatch"
            );
            self.remove(key).await;
            return None;
        }

        let age_ms = self.clock.now_millis().saturating_sub(envelope.timestamp);
        if i128::from(age_ms) > ttl.whole_milliseconds() {
            debug!(key, age_ms, "Client cache entry expired");
            self.remove(key).await;
            return None;
        }

        match serde_json::from_value(envelope.data) {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(key, error = %err, "Client cache payload has unexpected shape");
                self.remove(key).await;
                None
            }
        }
    }

    pub async fn remove(&self, key: &str) {
        if let Err(err) = self.storage.remove_item(key).await {
            warn!(key, error = %err, "Client cache remove failed");
        }
    }

    /// Removes every key containing `fragment`. Returns how many were removed.
    pub async fn remove_by_pattern(&self, fragment: &str) -> usize {
        self.remove_where("remove_by_pattern", |key| key.contains(fragment))
            .await
    }

    /// Removes every key in the cache namespace. Other storage users are untouched.
    pub async fn clear(&self) -> usize {
        let namespace = self.config.namespace.clone();
        self.remove_where("clear", |key| key.starts_with(&namespace))
            .await
    }

    async fn remove_where<P>(&self, op: &'static str, predicate: P) -> usize
    where
        P: Fn(&str) -> bool,
    {
        let keys = match self.storage.all_keys().await {
            Ok(keys) => keys,
            Err(err) => {
                warn!(op, error = %err, "Client cache key listing failed");
                return 0;
            }
        };
        let matched: Vec<String> = keys.into_iter().filter(|key| predicate(key)).collect();
        if matched.is_empty() {
            return 0;
        }
        match self.storage.multi_remove(&matched).await {
            Ok(()) => {
                debug!(op, removed = matched.len(), "Client cache entries removed");
                matched.len()
            }
            Err(err) => {
                warn!(op, error = %err, "Client cache bulk remove failed");
                0
            }
        }
    }

    /// Total stored bytes of namespaced entries; 0 when storage is unavailable.
    pub async fn size(&self) -> usize {
        let keys = match self.storage.all_keys().await {
            Ok(keys) => keys,
            Err(err) => {
                warn!(error = %err, "Client cache key listing failed");
                return 0;
            }
        };
        let mut total = 0;
        for key in keys
            .iter()
            .filter(|key| key.starts_with(&self.config.namespace))
        {
            match self.storage.get_item(key).await {
                Ok(Some(value)) => total += value.len(),
                Ok(None) => {}
                Err(err) => {
                    warn!(key = %key, error = %err, "Client cache size read failed");
                    return 0;
                }
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::cache::clock::{Clock, ManualClock};
    use crate::cache::storage::MemoryStorage;

    fn setup() -> (PersistentClientCache, Arc<MemoryStorage>, Arc<ManualClock>) {
        let storage = Arc::new(MemoryStorage::new());
        let clock = Arc::new(ManualClock::new(datetime!(2026-05-01 08:00 UTC)));
        let cache = PersistentClientCache::with_clock(
            storage.clone(),
            ClientCacheConfig::default(),
            clock.clone(),
        );
        (cache, storage, clock)
    }

    #[tokio::test]
    async fn stores_versioned_envelope() {
        let (cache, storage, clock) = setup();
        cache.set("cache_best_posts_week", &vec![1, 2, 3]).await;

        let raw = storage
            .get_item("cache_best_posts_week")
            .await
            .expect("read raw")
            .expect("raw present");
        let json: serde_json::Value = serde_json::from_str(&raw).expect("raw json");
        assert_eq!(json["data"], serde_json::json!([1, 2, 3]));
        assert_eq!(json["version"], "1.0");
        assert_eq!(json["timestamp"], clock.now_millis());
    }

    #[tokio::test]
    async fn expires_only_after_ttl_elapsed() {
        let (cache, storage, clock) = setup();
        cache.set("cache_my_recent_posts", &"posts").await;

        clock.advance(Duration::seconds(30));
        let hit: Option<String> = cache.get("cache_my_recent_posts", Duration::seconds(30)).await;
        assert_eq!(hit.as_deref(), Some("posts"));

        clock.advance(Duration::milliseconds(1));
        let miss: Option<String> = cache.get("cache_my_recent_posts", Duration::seconds(30)).await;
        assert!(miss.is_none());
        assert!(storage.is_empty(), "expired entry is purged");
    }

    #[tokio::test]
    async fn version_mismatch_is_a_miss_and_purges() {
        let (cache, storage, clock) = setup();
        let stale = format!(
            r#"{{"data":[1],"timestamp":{},"version":"0.9"}}"#,
            clock.now_millis()
        );
        storage
            .set_item("cache_post_detail_1", &stale)
            .await
            .expect("seed");

        let value: Option<Vec<u32>> = cache.get_default("cache_post_detail_1").await;
        assert!(value.is_none());
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn garbage_and_wrong_shape_are_misses() {
        let (cache, storage, _clock) = setup();
        storage
            .set_item("cache_garbage", "not json")
            .await
            .expect("seed");
        cache.set("cache_number", &5_u32).await;

        let garbage: Option<u32> = cache.get_default("cache_garbage").await;
        let wrong: Option<Vec<String>> = cache.get_default("cache_number").await;
        assert!(garbage.is_none());
        assert!(wrong.is_none());
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn unavailable_storage_fails_open() {
        let (cache, storage, _clock) = setup();
        storage.set_available(false);

        cache.set("cache_my_recent_posts", &1_u32).await;
        let value: Option<u32> = cache.get_default("cache_my_recent_posts").await;
        assert!(value.is_none());
        assert_eq!(cache.remove_by_pattern("posts").await, 0);
        assert_eq!(cache.clear().await, 0);
        assert_eq!(cache.size().await, 0);
    }

    #[tokio::test]
    async fn pattern_and_namespace_removal() {
        let (cache, storage, _clock) = setup();
        cache.set("cache_best_posts_week", &1_u32).await;
        cache.set("cache_best_posts_month", &2_u32).await;
        cache.set("cache_my_recent_posts", &3_u32).await;
        storage
            .set_item("@affinity_profile:1", "{}")
            .await
            .expect("seed foreign key");

        assert_eq!(cache.remove_by_pattern("best_posts").await, 2);
        assert!(cache.size().await > 0);
        assert_eq!(cache.clear().await, 1);
        assert_eq!(cache.size().await, 0);
        assert_eq!(
            storage.all_keys().await.expect("keys"),
            vec!["@affinity_profile:1"]
        );
    }

    #[test]
    fn client_keys_render_under_namespace() {
        let ns = "cache_";
        assert_eq!(
            ClientKey::ComfortPosts {
                page: 1,
                filter: "latest".into(),
                tag: None
            }
            .render_in(ns),
            "cache_comfort_posts_1_latest_all"
        );
        assert_eq!(
            ClientKey::BestPosts {
                period: "weekly".into()
            }
            .render_in(ns),
            "cache_best_posts_weekly"
        );
        assert_eq!(ClientKey::MyRecentPosts.render_in(ns), "cache_my_recent_posts");
        assert_eq!(
            ClientKey::PostDetail { post_id: 8 }.render_in(ns),
            "cache_post_detail_8"
        );
        assert_eq!(
            ClientKey::Comments {
                post_id: 8,
                page: 2
            }
            .render_in(ns),
            "cache_comments_8_2"
        );
    }

    #[test]
    fn strategy_ttls() {
        assert_eq!(CacheStrategy::Short.ttl(), Duration::seconds(30));
        assert_eq!(CacheStrategy::Medium.ttl(), Duration::minutes(5));
        assert_eq!(CacheStrategy::Long.ttl(), Duration::minutes(30));
        assert_eq!(CacheStrategy::VeryLong.ttl(), Duration::days(1));
    }
}
