//! Client-side fetch path: persistent cache first, then one deduplicated
//! network fetch whose result is written back.
//!
//! Every key carries an invalidation generation. A write-back whose fetch
//! started under an older generation is dropped, and one that lands while an
//! invalidation is in progress removes itself again.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::cache::{CacheStrategy, ClientKey, DedupeError, PersistentClientCache, RequestDeduplicator};

type Generations = Arc<DashMap<String, u64>>;

fn generation_of(generations: &Generations, key: &str) -> u64 {
    generations.get(key).map_or(0, |entry| *entry)
}

pub struct ClientFetcher<T, E> {
    cache: Arc<PersistentClientCache>,
    inflight: RequestDeduplicator<T, E>,
    generations: Generations,
}

impl<T, E> ClientFetcher<T, E>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    pub fn new(name: &'static str, cache: Arc<PersistentClientCache>) -> Self {
        Self {
            cache,
            inflight: RequestDeduplicator::new(name),
            generations: Arc::new(DashMap::new()),
        }
    }

    pub fn cache(&self) -> &Arc<PersistentClientCache> {
        &self.cache
    }

    pub fn inflight(&self) -> &RequestDeduplicator<T, E> {
        &self.inflight
    }

    /// Returns a fresh cached value for `key`, otherwise joins or starts the
    /// fetch. Successful results are written back in the background.
    pub async fn fetch<F, Fut>(
        &self,
        key: &ClientKey,
        strategy: CacheStrategy,
        fetch: F,
    ) -> Result<T, DedupeError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let rendered = self.cache.key_for(key);
        if let Some(cached) = self.cache.get::<T>(&rendered, strategy.ttl()).await {
            return Ok(cached);
        }

        let cache = Arc::clone(&self.cache);
        let generations = Arc::clone(&self.generations);
        let write_key = rendered.clone();
        self.inflight
            .dedupe(&rendered, move || {
                let started = generation_of(&generations, &write_key);
                let request = fetch();
                async move {
                    let value = request.await?;
                    let stored = value.clone();
                    tokio::spawn(write_back(cache, generations, write_key, started, stored));
                    Ok(value)
                }
            })
            .await
    }

    /// Drops the cached copy so the next `fetch` goes to the network. Fetches
    /// already in flight still answer their callers but are not written back.
    pub async fn invalidate(&self, key: &ClientKey) {
        let rendered = self.cache.key_for(key);
        *self.generations.entry(rendered.clone()).or_insert(0) += 1;
        self.inflight.invalidate(&rendered);
        self.cache.remove(&rendered).await;
    }

    /// Current invalidation generation of `key`.
    pub fn generation(&self, key: &ClientKey) -> u64 {
        generation_of(&self.generations, &self.cache.key_for(key))
    }
}

async fn write_back<T: Serialize>(
    cache: Arc<PersistentClientCache>,
    generations: Generations,
    key: String,
    started: u64,
    value: T,
) {
    if generation_of(&generations, &key) != started {
        debug!(key = %key, "Fetched value invalidated before write-back");
        return;
    }
    cache.set(&key, &value).await;
    // `invalidate` bumps before it removes, so a bump seen here may have
    // removed the key before this write landed.
    if generation_of(&generations, &key) != started {
        debug!(key = %key, "Write-back raced an invalidation, removing");
        cache.remove(&key).await;
        return;
    }
    debug!(key = %key, "Client cache refreshed from fetch");
}
