//! Cache configuration.
//!
//! Controls the server-side keyed cache and the persistent client cache via
//! `moodfeed.toml`.

use std::num::NonZeroUsize;

use serde::Deserialize;
use time::Duration;

// Default values for cache configuration
const DEFAULT_MAX_ENTRIES: usize = 1000;
const DEFAULT_CONSUME_BATCH_LIMIT: usize = 100;
const DEFAULT_QUEUE_LIMIT: usize = 10_000;
const DEFAULT_CLIENT_VERSION: &str = "1.0";
const DEFAULT_CLIENT_NAMESPACE: &str = "cache_";
const DEFAULT_CLIENT_TTL_MS: u64 = 10 * 60 * 1000;

/// Server-side keyed cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the keyed cache. When off, reads always miss and nothing is stored.
    pub enabled: bool,
    /// Maximum live entries before least-recently-used eviction.
    pub max_entries: usize,
    /// Maximum mutation events per consumption batch.
    pub consume_batch_limit: usize,
    /// Maximum queued mutation events; the oldest are dropped beyond this.
    pub queue_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: DEFAULT_MAX_ENTRIES,
            consume_batch_limit: DEFAULT_CONSUME_BATCH_LIMIT,
            queue_limit: DEFAULT_QUEUE_LIMIT,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            max_entries: settings.max_entries,
            consume_batch_limit: settings.consume_batch_limit,
            queue_limit: settings.queue_limit,
        }
    }
}

impl CacheConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the entry limit as NonZeroUsize, clamping to 1 if zero.
    pub fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the batch limit, clamping to 1 if zero.
    pub fn consume_batch_limit_non_zero(&self) -> usize {
        self.consume_batch_limit.max(1)
    }
}

/// Persistent client cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientCacheConfig {
    /// Schema version stamped on every entry; a mismatch reads as a miss.
    pub version: String,
    /// Prefix of every key this cache owns in the shared device storage.
    pub namespace: String,
    /// Lifetime used when a caller does not name one.
    pub default_ttl_ms: u64,
}

impl Default for ClientCacheConfig {
    fn default() -> Self {
        Self {
            version: DEFAULT_CLIENT_VERSION.to_string(),
            namespace: DEFAULT_CLIENT_NAMESPACE.to_string(),
            default_ttl_ms: DEFAULT_CLIENT_TTL_MS,
        }
    }
}

impl From<&crate::config::ClientCacheSettings> for ClientCacheConfig {
    fn from(settings: &crate::config::ClientCacheSettings) -> Self {
        Self {
            version: settings.version.clone(),
            namespace: settings.namespace.clone(),
            default_ttl_ms: settings.default_ttl_ms,
        }
    }
}

impl ClientCacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::milliseconds(i64::try_from(self.default_ttl_ms).unwrap_or(i64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.max_entries, 1000);
        assert_eq!(config.consume_batch_limit, 100);
        assert_eq!(config.queue_limit, 10_000);

        let client = ClientCacheConfig::default();
        assert_eq!(client.version, "1.0");
        assert_eq!(client.namespace, "cache_");
        assert_eq!(client.default_ttl(), Duration::minutes(10));
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            max_entries: 0,
            consume_batch_limit: 0,
            ..Default::default()
        };
        assert_eq!(config.max_entries_non_zero().get(), 1);
        assert_eq!(config.consume_batch_limit_non_zero(), 1);
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let config: CacheConfig =
            serde_json::from_str(r#"{"max_entries": 5}"#).expect("decode config");
        assert_eq!(config.max_entries, 5);
        assert!(config.enabled);
        assert_eq!(config.consume_batch_limit, 100);
    }
}
