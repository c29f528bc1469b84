//! Cache trigger service.
//!
//! Write paths call into this after a successful write. Invalidation runs
//! before the call returns unless the caller explicitly defers it.

use std::sync::Arc;

use tracing::debug;

use crate::domain::{ItemId, UserId};

use super::config::CacheConfig;
use super::consumer::InvalidationConsumer;
use super::events::{EventQueue, MutationKind};

/// Publishes mutation events and, by default, consumes them immediately.
///
/// ```ignore
/// // After a successful like:
/// trigger.post_endorsed(post.id, viewer);
/// ```
pub struct CacheTrigger {
    config: CacheConfig,
    queue: Arc<EventQueue>,
    consumer: Arc<InvalidationConsumer>,
}

impl CacheTrigger {
    pub fn new(
        config: CacheConfig,
        queue: Arc<EventQueue>,
        consumer: Arc<InvalidationConsumer>,
    ) -> Self {
        Self {
            config,
            queue,
            consumer,
        }
    }

    /// Publish a mutation; with `consume_now` the pending queue is drained
    /// before returning, so later reads observe the purge.
    pub fn trigger(&self, kind: MutationKind, consume_now: bool) {
        if !self.config.is_enabled() {
            debug!(event_kind = kind.name(), "Cache trigger skipped: cache disabled");
            return;
        }

        self.queue.publish(kind);

        if consume_now {
            self.consumer.consume_all();
        }
    }

    pub fn challenge_created(&self) {
        self.trigger(MutationKind::ChallengeCreated, true);
    }

    pub fn challenge_updated(&self, challenge_id: ItemId) {
        self.trigger(MutationKind::ChallengeUpdated { challenge_id }, true);
    }

    pub fn challenge_deleted(&self, challenge_id: ItemId) {
        self.trigger(MutationKind::ChallengeDeleted { challenge_id }, true);
    }

    pub fn challenge_joined(&self, challenge_id: ItemId, user_id: UserId) {
        self.trigger(
            MutationKind::ChallengeJoined {
                challenge_id,
                user_id,
            },
            true,
        );
    }

    pub fn post_created(&self, author_id: UserId) {
        self.trigger(MutationKind::PostCreated { author_id }, true);
    }

    pub fn post_updated(&self, post_id: ItemId, author_id: UserId) {
        self.trigger(MutationKind::PostUpdated { post_id, author_id }, true);
    }

    pub fn post_deleted(&self, post_id: ItemId, author_id: UserId) {
        self.trigger(MutationKind::PostDeleted { post_id, author_id }, true);
    }

    pub fn post_endorsed(&self, post_id: ItemId, user_id: UserId) {
        self.trigger(MutationKind::PostEndorsed { post_id, user_id }, true);
    }

    pub fn post_saved(&self, post_id: ItemId, user_id: UserId) {
        self.trigger(MutationKind::PostSaved { post_id, user_id }, true);
    }

    pub fn comment_added(&self, post_id: ItemId) {
        self.trigger(MutationKind::CommentAdded { post_id }, true);
    }

    pub fn user_updated(&self, user_id: UserId) {
        self.trigger(MutationKind::UserUpdated { user_id }, true);
    }

    pub fn stats_recorded(&self, user_id: UserId) {
        self.trigger(MutationKind::StatsRecorded { user_id }, true);
    }

    pub fn notifications_changed(&self, user_id: UserId) {
        self.trigger(MutationKind::NotificationsChanged { user_id }, true);
    }

    pub fn emotions_updated(&self) {
        self.trigger(MutationKind::EmotionsUpdated, true);
    }

    pub fn tags_updated(&self) {
        self.trigger(MutationKind::TagsUpdated, true);
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn consumer(&self) -> &Arc<InvalidationConsumer> {
        &self.consumer
    }
}
