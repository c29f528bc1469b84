//! Two-tier caching for moodfeed.
//!
//! - **Server tier**: `KeyedCache`, a process-local TTL store addressed by
//!   `CacheKey`, kept coherent by routing every write through
//!   `InvalidationRouter` (directly or via the mutation queue).
//! - **Client tier**: `PersistentClientCache`, versioned envelopes over
//!   `DurableStorage`, fronted by `RequestDeduplicator` so concurrent identical
//!   fetches collapse into one.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! max_entries = 1000
//! consume_batch_limit = 100
//!
//! [client_cache]
//! version = "1.0"
//! namespace = "cache_"
//! default_ttl_ms = 600000
//! ```

mod client;
pub mod clock;
mod config;
mod consumer;
mod dedupe;
mod events;
mod keys;
pub(crate) mod lock;
mod registry;
mod router;
pub mod storage;
mod store;
mod trigger;

pub use client::{CacheStrategy, ClientKey, PersistentClientCache};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock, system_clock};
pub use config::{CacheConfig, ClientCacheConfig};
pub use consumer::InvalidationConsumer;
pub use dedupe::{DedupeError, RequestDeduplicator};
pub use events::{Epoch, EventQueue, MutationEvent, MutationKind};
pub use keys::{CacheKey, KeyPattern};
pub use registry::{CacheRegistry, client_cache, install_client_cache};
pub use router::{
    InvalidationError, InvalidationOutcome, InvalidationPlan, InvalidationRouter,
    InvalidationTarget,
};
pub use storage::{DurableStorage, MemoryStorage, StorageError};
pub use store::{CacheEntry, CacheStats, CacheStatsSnapshot, KeyedCache};
pub use trigger::CacheTrigger;
