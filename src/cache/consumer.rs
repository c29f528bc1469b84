//! Mutation consumer.
//!
//! Drains queued mutation events, builds an invalidation plan and applies it.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use metrics::histogram;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::config::CacheConfig;
use super::events::EventQueue;
use super::keys::KeyPattern;
use super::lock::mutex_lock;
use super::router::{InvalidationPlan, InvalidationRouter};

const SOURCE: &str = "cache::consumer";

const METRIC_CACHE_CONSUME_MS: &str = "moodfeed_cache_consume_ms";

pub struct InvalidationConsumer {
    config: CacheConfig,
    router: Arc<InvalidationRouter>,
    queue: Arc<EventQueue>,
    /// Held from drain until the batch is applied. A caller that finds the
    /// queue empty has therefore waited out any batch holding its event.
    in_flight: Mutex<()>,
}

impl InvalidationConsumer {
    pub fn new(config: CacheConfig, router: Arc<InvalidationRouter>, queue: Arc<EventQueue>) -> Self {
        Self {
            config,
            router,
            queue,
            in_flight: Mutex::new(()),
        }
    }

    /// Consume one batch of pending events.
    ///
    /// Returns true if any events were processed. Blocks while another
    /// thread is applying a batch.
    #[instrument(skip(self))]
    pub fn consume(&self) -> bool {
        let _in_flight = mutex_lock(&self.in_flight, SOURCE, "consume");
        let started_at = Instant::now();
        let events = self.queue.drain(self.config.consume_batch_limit_non_zero());
        let overflowed = self.queue.take_overflow();
        if events.is_empty() && !overflowed {
            return false;
        }

        let event_ids: Vec<Uuid> = events.iter().map(|e| e.id).collect();
        let mut plan = InvalidationPlan::from_events(events);
        if overflowed {
            warn!(
                event_count = plan.event_count,
                "Mutation events were dropped, purging every key"
            );
            plan.patterns = vec![KeyPattern::Glob("*".to_string())];
        }

        info!(
            event_count = plan.event_count,
            event_ids = ?event_ids,
            plan = %plan,
            "Cache invalidation starting"
        );

        let outcome = self.router.apply(&plan.patterns);

        info!(
            event_count = plan.event_count,
            removed = outcome.removed,
            failures = outcome.failures,
            "Cache invalidation complete"
        );

        histogram!(METRIC_CACHE_CONSUME_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

        true
    }

    /// Consume batches until the queue is empty. Returns the number of batches.
    pub fn consume_all(&self) -> usize {
        let mut batches = 0;
        while self.consume() {
            batches += 1;
        }
        batches
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }
}
