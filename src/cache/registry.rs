//! Cache wiring and process-wide instances.
//!
//! `CacheRegistry` owns the server cache together with the queue, router,
//! consumer and trigger that keep it coherent. Binaries install one instance at
//! startup; library callers that never install get a default on first use.
//! Tests build their own registries and never touch the globals.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde_json::Value;
use tracing::{info, warn};

use super::client::PersistentClientCache;
use super::clock::{SharedClock, system_clock};
use super::config::CacheConfig;
use super::consumer::InvalidationConsumer;
use super::events::EventQueue;
use super::router::{InvalidationRouter, InvalidationTarget};
use super::store::KeyedCache;
use super::trigger::CacheTrigger;

static SERVER: OnceCell<Arc<CacheRegistry>> = OnceCell::new();
static CLIENT: OnceCell<Arc<PersistentClientCache>> = OnceCell::new();

pub struct CacheRegistry {
    config: CacheConfig,
    server: Arc<KeyedCache<Value>>,
    router: Arc<InvalidationRouter>,
    trigger: Arc<CacheTrigger>,
}

impl CacheRegistry {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: CacheConfig, clock: SharedClock) -> Self {
        Self::with_targets(config, clock, Vec::new())
    }

    /// Builds the registry; `extra_targets` are purged alongside the server cache.
    pub fn with_targets(
        config: CacheConfig,
        clock: SharedClock,
        extra_targets: Vec<Arc<dyn InvalidationTarget>>,
    ) -> Self {
        let server = Arc::new(KeyedCache::with_clock("server", &config, clock));
        let mut router = InvalidationRouter::new().with_target(server.clone());
        for target in extra_targets {
            router.register(target);
        }
        let router = Arc::new(router);
        let queue = Arc::new(EventQueue::with_limit(config.queue_limit));
        let consumer = Arc::new(InvalidationConsumer::new(
            config.clone(),
            router.clone(),
            queue.clone(),
        ));
        let trigger = Arc::new(CacheTrigger::new(config.clone(), queue, consumer));

        Self {
            config,
            server,
            router,
            trigger,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn server(&self) -> &Arc<KeyedCache<Value>> {
        &self.server
    }

    pub fn router(&self) -> &Arc<InvalidationRouter> {
        &self.router
    }

    pub fn trigger(&self) -> &Arc<CacheTrigger> {
        &self.trigger
    }

    /// The process-wide registry, created with default config on first use.
    pub fn global() -> Arc<CacheRegistry> {
        SERVER
            .get_or_init(|| {
                info!("Initializing default cache registry");
                Arc::new(CacheRegistry::new(CacheConfig::default()))
            })
            .clone()
    }

    /// Installs `registry` as the process-wide instance. Returns false if one
    /// was already in place; the existing instance is kept.
    pub fn install(registry: Arc<CacheRegistry>) -> bool {
        let installed = SERVER.set(registry).is_ok();
        if !installed {
            warn!("Cache registry already initialized; keeping existing instance");
        }
        installed
    }
}

/// The process-wide client cache, built by `init` on first use.
pub fn client_cache<F>(init: F) -> Arc<PersistentClientCache>
where
    F: FnOnce() -> PersistentClientCache,
{
    CLIENT.get_or_init(|| Arc::new(init())).clone()
}

pub fn install_client_cache(cache: Arc<PersistentClientCache>) -> bool {
    let installed = CLIENT.set(cache).is_ok();
    if !installed {
        warn!("Client cache already initialized; keeping existing instance");
    }
    installed
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::Duration;

    use super::*;

    #[test]
    fn trigger_purges_registry_server_cache() {
        let registry = CacheRegistry::new(CacheConfig::default());
        registry
            .server()
            .set("challenge:3", json!({"id": 3}), Duration::minutes(5));

        registry.trigger().challenge_updated(3);

        assert!(registry.server().get("challenge:3").is_none());
    }

    #[test]
    fn extra_targets_are_purged_too() {
        let clock = system_clock();
        let side: Arc<KeyedCache<u8>> =
            Arc::new(KeyedCache::with_clock("side", &CacheConfig::default(), clock.clone()));
        side.set("tags:popular:3", 1, Duration::minutes(5));

        let side_target: Arc<dyn InvalidationTarget> = side.clone();
        let registry = CacheRegistry::with_targets(CacheConfig::default(), clock, vec![side_target]);
        assert_eq!(registry.router().target_count(), 2);

        registry.trigger().tags_updated();
        assert!(!side.exists("tags:popular:3"));
    }
}
