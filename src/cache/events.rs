//! Mutation events.
//!
//! Write paths describe what changed as a `MutationKind`; the router turns that
//! into key patterns. Events can be applied immediately or queued and consumed
//! in batches.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use metrics::{counter, gauge};
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{ItemId, UserId};

use super::lock::mutex_lock;

const SOURCE: &str = "cache::events";

const METRIC_QUEUE_LEN: &str = "moodfeed_cache_event_queue_len";
const METRIC_EVENT_DROPPED: &str = "moodfeed_cache_event_dropped_total";

/// Monotonic epoch for ordering events within this process.
pub type Epoch = u64;

/// What a completed write changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    // Challenges
    ChallengeCreated,
    ChallengeUpdated { challenge_id: ItemId },
    ChallengeDeleted { challenge_id: ItemId },
    ChallengeJoined { challenge_id: ItemId, user_id: UserId },

    // Posts
    PostCreated { author_id: UserId },
    PostUpdated { post_id: ItemId, author_id: UserId },
    PostDeleted { post_id: ItemId, author_id: UserId },
    PostEndorsed { post_id: ItemId, user_id: UserId },
    PostSaved { post_id: ItemId, user_id: UserId },
    CommentAdded { post_id: ItemId },

    // Users and per-user data
    UserUpdated { user_id: UserId },
    StatsRecorded { user_id: UserId },
    NotificationsChanged { user_id: UserId },

    // Reference data
    EmotionsUpdated,
    TagsUpdated,
}

impl MutationKind {
    /// Stable short name for logs and metric labels.
    pub fn name(&self) -> &'static str {
        match self {
            MutationKind::ChallengeCreated => "challenge_created",
            MutationKind::ChallengeUpdated { .. } => "challenge_updated",
            MutationKind::ChallengeDeleted { .. } => "challenge_deleted",
            MutationKind::ChallengeJoined { .. } => "challenge_joined",
            MutationKind::PostCreated { .. } => "post_created",
            MutationKind::PostUpdated { .. } => "post_updated",
            MutationKind::PostDeleted { .. } => "post_deleted",
            MutationKind::PostEndorsed { .. } => "post_endorsed",
            MutationKind::PostSaved { .. } => "post_saved",
            MutationKind::CommentAdded { .. } => "comment_added",
            MutationKind::UserUpdated { .. } => "user_updated",
            MutationKind::StatsRecorded { .. } => "stats_recorded",
            MutationKind::NotificationsChanged { .. } => "notifications_changed",
            MutationKind::EmotionsUpdated => "emotions_updated",
            MutationKind::TagsUpdated => "tags_updated",
        }
    }
}

/// A queued mutation with idempotency and ordering support.
#[derive(Debug, Clone)]
pub struct MutationEvent {
    /// Unique identifier for idempotency (UUIDv4).
    pub id: Uuid,
    pub epoch: Epoch,
    pub kind: MutationKind,
    pub timestamp: OffsetDateTime,
}

impl MutationEvent {
    pub fn new(kind: MutationKind, epoch: Epoch) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            kind,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// In-memory FIFO of mutation events.
///
/// Bounded: once `limit` events are waiting, publishing drops the oldest one
/// and raises the overflow flag. The consumer answers an overflow by purging
/// every key, so a dropped event never leaves a stale entry behind.
pub struct EventQueue {
    queue: Mutex<VecDeque<MutationEvent>>,
    epoch_counter: AtomicU64,
    limit: usize,
    overflowed: AtomicBool,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::with_limit(usize::MAX)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            epoch_counter: AtomicU64::new(0),
            limit: limit.max(1),
            overflowed: AtomicBool::new(false),
        }
    }

    pub fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Enqueues `kind` and returns the event that was stored.
    pub fn publish(&self, kind: MutationKind) -> MutationEvent {
        let event = MutationEvent::new(kind, self.next_epoch());

        info!(
            event_id = %event.id,
            event_epoch = event.epoch,
            event_kind = event.kind.name(),
            "Mutation event enqueued"
        );

        let mut queue = mutex_lock(&self.queue, SOURCE, "publish");
        if queue.len() >= self.limit
            && let Some(dropped) = queue.pop_front()
        {
            warn!(
                event_id = %dropped.id,
                event_epoch = dropped.epoch,
                event_kind = dropped.kind.name(),
                limit = self.limit,
                "Mutation queue full, dropped oldest event"
            );
            self.overflowed.store(true, Ordering::SeqCst);
            counter!(METRIC_EVENT_DROPPED).increment(1);
        }
        queue.push_back(event.clone());
        gauge!(METRIC_QUEUE_LEN).set(queue.len() as f64);
        event
    }

    /// Drain up to `limit` events in FIFO order.
    pub fn drain(&self, limit: usize) -> Vec<MutationEvent> {
        let mut queue = mutex_lock(&self.queue, SOURCE, "drain");
        let count = limit.min(queue.len());
        let drained = queue.drain(..count).collect();
        gauge!(METRIC_QUEUE_LEN).set(queue.len() as f64);
        drained
    }

    /// True if events were dropped since the last call; resets the flag.
    pub fn take_overflow(&self) -> bool {
        self.overflowed.swap(false, Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        mutex_lock(&self.queue, SOURCE, "clear").clear();
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    #[test]
    fn epoch_monotonicity() {
        let queue = EventQueue::new();

        let e1 = queue.next_epoch();
        let e2 = queue.next_epoch();
        let e3 = queue.next_epoch();

        assert!(e1 < e2);
        assert!(e2 < e3);
    }

    #[test]
    fn publish_and_drain_fifo() {
        let queue = EventQueue::new();

        queue.publish(MutationKind::EmotionsUpdated);
        queue.publish(MutationKind::TagsUpdated);
        queue.publish(MutationKind::ChallengeCreated);
        assert_eq!(queue.len(), 3);

        let events = queue.drain(2);
        assert_eq!(events.len(), 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(events[0].kind, MutationKind::EmotionsUpdated);
        assert_eq!(events[1].kind, MutationKind::TagsUpdated);
        assert!(events[0].epoch < events[1].epoch);
    }

    #[test]
    fn drain_more_than_available() {
        let queue = EventQueue::new();
        queue.publish(MutationKind::EmotionsUpdated);

        let events = queue.drain(100);
        assert_eq!(events.len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn bounded_queue_drops_oldest() {
        let queue = EventQueue::with_limit(2);
        queue.publish(MutationKind::EmotionsUpdated);
        queue.publish(MutationKind::TagsUpdated);
        queue.publish(MutationKind::ChallengeCreated);

        let kinds: Vec<_> = queue.drain(10).into_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![MutationKind::TagsUpdated, MutationKind::ChallengeCreated]
        );
        assert!(queue.take_overflow());
        assert!(!queue.take_overflow(), "flag resets once taken");
    }

    #[test]
    fn clear_queue() {
        let queue = EventQueue::new();
        queue.publish(MutationKind::EmotionsUpdated);
        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    fn event_queue_recovers_from_poisoned_lock() {
        let queue = EventQueue::new();

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = queue.queue.lock().expect("queue lock should be acquired");
            panic!("poison queue lock");
        }));

        queue.publish(MutationKind::EmotionsUpdated);
        assert_eq!(queue.len(), 1);
    }
}
