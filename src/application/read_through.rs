//! Read-through access to the server cache.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{CacheKey, KeyedCache};

/// Serves typed values from the server cache, falling back to a fetch and
/// storing successful results under the key's TTL.
#[derive(Clone)]
pub struct CachedReader {
    cache: Arc<KeyedCache<Value>>,
}

impl CachedReader {
    pub fn new(cache: Arc<KeyedCache<Value>>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<KeyedCache<Value>> {
        &self.cache
    }

    /// Returns the cached value for `key` or runs `fetch`. Errors are never
    /// cached; a cached value that no longer decodes counts as a miss. A result
    /// whose fetch overlapped a purge is returned but not stored.
    pub async fn get_or_fetch<T, E, F, Fut>(&self, key: &CacheKey, fetch: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.cache.get_key(key) {
            match serde_json::from_value::<T>(cached) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(key = %key, error = %err, "Cached value no longer decodes, refetching");
                    self.cache.delete(&key.render());
                }
            }
        }

        let epoch = self.cache.invalidation_epoch();
        let value = fetch().await?;
        match serde_json::to_value(&value) {
            Ok(encoded) => {
                if self
                    .cache
                    .set_if_unchanged(key.render(), encoded, key.ttl(), epoch)
                {
                    debug!(key = %key, "Cached fetched value");
                }
            }
            Err(err) => warn!(key = %key, error = %err, "Fetched value not cacheable"),
        }
        Ok(value)
    }
}
