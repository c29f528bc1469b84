//! Process-local keyed cache with per-entry TTL.
//!
//! Entries live in an LRU so the store stays bounded; expiry is lazy, checked on
//! every read, with `purge_expired` for explicit cleanup.

use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use metrics::counter;
use time::{Duration, OffsetDateTime};
use tracing::debug;

use super::clock::{SharedClock, system_clock};
use super::config::CacheConfig;
use super::keys::{CacheKey, KeyPattern};
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

const METRIC_CACHE_HIT: &str = "moodfeed_cache_hit_total";
const METRIC_CACHE_MISS: &str = "moodfeed_cache_miss_total";
const METRIC_CACHE_EVICT: &str = "moodfeed_cache_evict_total";
const METRIC_CACHE_INVALIDATED: &str = "moodfeed_cache_invalidated_total";

/// A stored value and the moment it stops being readable.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: OffsetDateTime,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    /// `None` when the expiry is beyond the representable range.
    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        self.created_at.checked_add(self.ttl)
    }

    pub fn is_live(&self, now: OffsetDateTime) -> bool {
        self.expires_at().is_none_or(|expires| now < expires)
    }

    pub fn remaining(&self, now: OffsetDateTime) -> Duration {
        match self.expires_at() {
            Some(expires) => (expires - now).max(Duration::ZERO),
            None => Duration::MAX,
        }
    }
}

/// Counters for one keyed cache.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidated: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidated: u64,
}

impl CacheStatsSnapshot {
    /// Hits over lookups, 0.0 before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl CacheStats {
    fn hit(&self, cache: &'static str) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_CACHE_HIT, "cache" => cache).increment(1);
    }

    fn miss(&self, cache: &'static str) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_CACHE_MISS, "cache" => cache).increment(1);
    }

    fn evicted(&self, cache: &'static str, reason: &'static str, count: usize) {
        if count == 0 {
            return;
        }
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
        counter!(METRIC_CACHE_EVICT, "cache" => cache, "reason" => reason)
            .increment(count as u64);
    }

    fn invalidated(&self, cache: &'static str, count: usize) {
        if count == 0 {
            return;
        }
        self.invalidated.fetch_add(count as u64, Ordering::Relaxed);
        counter!(METRIC_CACHE_INVALIDATED, "cache" => cache).increment(count as u64);
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidated: self.invalidated.load(Ordering::Relaxed),
        }
    }
}

/// Keyed cache with TTL and pattern deletion.
///
/// Every operation takes the lock once and never awaits while holding it, so
/// each call is atomic with respect to the others. Reads take the write lock
/// because an LRU hit reorders the list.
pub struct KeyedCache<V> {
    name: &'static str,
    enabled: bool,
    entries: RwLock<LruCache<String, CacheEntry<V>>>,
    clock: SharedClock,
    stats: CacheStats,
    /// Bumped under the write lock by every delete, pattern delete and clear.
    invalidations: AtomicU64,
}

impl<V: Clone> KeyedCache<V> {
    pub fn new(name: &'static str, config: &CacheConfig) -> Self {
        Self::with_clock(name, config, system_clock())
    }

    pub fn with_clock(name: &'static str, config: &CacheConfig, clock: SharedClock) -> Self {
        Self {
            name,
            enabled: config.is_enabled(),
            entries: RwLock::new(LruCache::new(config.max_entries_non_zero())),
            clock,
            stats: CacheStats::default(),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the value if present and unexpired. Expired entries are removed.
    pub fn get(&self, key: &str) -> Option<V> {
        if !self.enabled {
            return None;
        }
        let now = self.clock.now();
        let mut entries = rw_write(&self.entries, SOURCE, "get");
        let live = entries.get(key).map(|entry| entry.is_live(now));
        match live {
            Some(true) => {
                let value = entries.get(key).map(|entry| entry.value.clone());
                drop(entries);
                self.stats.hit(self.name);
                value
            }
            Some(false) => {
                entries.pop(key);
                drop(entries);
                debug!(cache = self.name, key, "Cache entry expired");
                self.stats.evicted(self.name, "expired", 1);
                self.stats.miss(self.name);
                None
            }
            None => {
                drop(entries);
                self.stats.miss(self.name);
                None
            }
        }
    }

    /// Stores `value`, replacing any previous entry for `key`.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.store(key.into(), value, ttl, None);
    }

    /// Stores `value` only if nothing was deleted since `epoch` was read from
    /// [`KeyedCache::invalidation_epoch`]. Returns whether the value was stored.
    ///
    /// A value fetched before a purge must not be written after it.
    pub fn set_if_unchanged(
        &self,
        key: impl Into<String>,
        value: V,
        ttl: Duration,
        epoch: u64,
    ) -> bool {
        self.store(key.into(), value, ttl, Some(epoch))
    }

    /// Current invalidation epoch; compare with `set_if_unchanged`.
    pub fn invalidation_epoch(&self) -> u64 {
        self.invalidations.load(Ordering::SeqCst)
    }

    fn store(&self, key: String, value: V, ttl: Duration, expected_epoch: Option<u64>) -> bool {
        if !self.enabled {
            return false;
        }
        let entry = CacheEntry {
            value,
            created_at: self.clock.now(),
            ttl,
        };
        let displaced = {
            let mut entries = rw_write(&self.entries, SOURCE, "set");
            if let Some(expected) = expected_epoch
                && self.invalidations.load(Ordering::SeqCst) != expected
            {
                drop(entries);
                debug!(cache = self.name, key = %key, "Stale write skipped after invalidation");
                return false;
            }
            entries.push(key.clone(), entry)
        };
        if let Some((evicted_key, _)) = displaced
            && evicted_key != key
        {
            debug!(cache = self.name, key = %evicted_key, "Cache entry evicted for capacity");
            self.stats.evicted(self.name, "capacity", 1);
        }
        true
    }

    pub fn get_key(&self, key: &CacheKey) -> Option<V> {
        self.get(&key.render())
    }

    /// Stores under the rendered key with that key's TTL.
    pub fn set_key(&self, key: &CacheKey, value: V) {
        self.set(key.render(), value, key.ttl());
    }

    /// Removes `key`. Returns whether an entry was present.
    pub fn delete(&self, key: &str) -> bool {
        let removed = {
            let mut entries = rw_write(&self.entries, SOURCE, "delete");
            self.invalidations.fetch_add(1, Ordering::SeqCst);
            entries.pop(key).is_some()
        };
        if removed {
            self.stats.invalidated(self.name, 1);
        }
        removed
    }

    /// Removes every key matching `pattern` in one critical section.
    pub fn delete_by_pattern(&self, pattern: &KeyPattern) -> usize {
        let removed = {
            let mut entries = rw_write(&self.entries, SOURCE, "delete_by_pattern");
            self.invalidations.fetch_add(1, Ordering::SeqCst);
            match pattern {
                KeyPattern::Exact(key) => usize::from(entries.pop(key.as_str()).is_some()),
                KeyPattern::Glob(_) => {
                    let matching: Vec<String> = entries
                        .iter()
                        .filter(|(key, _)| pattern.matches(key))
                        .map(|(key, _)| key.clone())
                        .collect();
                    for key in &matching {
                        entries.pop(key.as_str());
                    }
                    matching.len()
                }
            }
        };
        self.stats.invalidated(self.name, removed);
        debug!(cache = self.name, %pattern, removed, "Cache pattern deleted");
        removed
    }

    /// True when `key` holds an unexpired entry. Does not touch LRU order.
    pub fn exists(&self, key: &str) -> bool {
        let now = self.clock.now();
        rw_read(&self.entries, SOURCE, "exists")
            .peek(key)
            .is_some_and(|entry| entry.is_live(now))
    }

    /// Remaining lifetime of a live entry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now();
        rw_read(&self.entries, SOURCE, "ttl")
            .peek(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.remaining(now))
    }

    /// Restarts a live entry's lifetime with `ttl`. Returns false if absent or expired.
    pub fn refresh(&self, key: &str, ttl: Duration) -> bool {
        let now = self.clock.now();
        let mut entries = rw_write(&self.entries, SOURCE, "refresh");
        match entries.peek_mut(key) {
            Some(entry) if entry.is_live(now) => {
                entry.created_at = now;
                entry.ttl = ttl;
                true
            }
            _ => false,
        }
    }

    /// Physically removes every expired entry.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let purged = {
            let mut entries = rw_write(&self.entries, SOURCE, "purge_expired");
            let expired: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| !entry.is_live(now))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &expired {
                entries.pop(key.as_str());
            }
            expired.len()
        };
        self.stats.evicted(self.name, "expired", purged);
        purged
    }

    pub fn clear(&self) {
        let mut entries = rw_write(&self.entries, SOURCE, "clear");
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        let count = entries.len();
        entries.clear();
        drop(entries);
        self.stats.invalidated(self.name, count);
    }

    /// Physically present entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys of live entries, most recently used first.
    pub fn keys(&self) -> Vec<String> {
        let now = self.clock.now();
        rw_read(&self.entries, SOURCE, "keys")
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }
}
