//! Mutation routing.
//!
//! Maps each mutation kind to the static set of key patterns it invalidates and
//! applies them to every registered cache.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{ItemId, UserId};

use super::events::{MutationEvent, MutationKind};
use super::keys::{CacheKey, KeyPattern};
use super::store::KeyedCache;

const METRIC_INVALIDATION_FAILED: &str = "moodfeed_invalidation_failed_total";

#[derive(Debug, Error)]
#[error("invalidation of `{pattern}` on `{target}` failed: {reason}")]
pub struct InvalidationError {
    pub target: String,
    pub pattern: String,
    pub reason: String,
}

impl InvalidationError {
    pub fn new(target: impl Into<String>, pattern: &KeyPattern, reason: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            pattern: pattern.to_string(),
            reason: reason.into(),
        }
    }
}

/// Anything that can drop entries by key pattern.
pub trait InvalidationTarget: Send + Sync {
    fn target_name(&self) -> &str;

    /// Removes the matching entries and returns how many were removed.
    fn invalidate(&self, pattern: &KeyPattern) -> Result<usize, InvalidationError>;
}

impl<V> InvalidationTarget for KeyedCache<V>
where
    V: Clone + Send + Sync,
{
    fn target_name(&self) -> &str {
        self.name()
    }

    fn invalidate(&self, pattern: &KeyPattern) -> Result<usize, InvalidationError> {
        Ok(self.delete_by_pattern(pattern))
    }
}

/// Patterns to purge for a batch of mutation events.
///
/// Events are deduplicated by id and patterns by value, keeping first-seen order.
#[derive(Debug, Default)]
pub struct InvalidationPlan {
    pub event_count: usize,
    pub patterns: Vec<KeyPattern>,
}

impl InvalidationPlan {
    pub fn from_events(events: Vec<MutationEvent>) -> Self {
        let mut seen_ids = HashSet::new();
        let mut seen_patterns = HashSet::new();
        let mut plan = Self::default();

        for event in events.into_iter().filter(|e| seen_ids.insert(e.id)) {
            plan.event_count += 1;
            for pattern in InvalidationRouter::patterns_for(&event.kind) {
                if seen_patterns.insert(pattern.clone()) {
                    plan.patterns.push(pattern);
                }
            }
        }

        plan
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl fmt::Display for InvalidationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InvalidationPlan {{ events: {}, patterns: [",
            self.event_count
        )?;
        for (index, pattern) in self.patterns.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{pattern}")?;
        }
        f.write_str("] }")
    }
}

/// Result of applying a set of patterns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvalidationOutcome {
    pub removed: usize,
    pub failures: usize,
}

#[derive(Default)]
pub struct InvalidationRouter {
    targets: Vec<Arc<dyn InvalidationTarget>>,
}

impl InvalidationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(mut self, target: Arc<dyn InvalidationTarget>) -> Self {
        self.targets.push(target);
        self
    }

    pub fn register(&mut self, target: Arc<dyn InvalidationTarget>) {
        self.targets.push(target);
    }

    /// The exhaustive pattern set for `kind`.
    pub fn patterns_for(kind: &MutationKind) -> Vec<KeyPattern> {
        let challenges = || KeyPattern::Glob("challenges:*".to_string());
        let challenge = |id: ItemId| KeyPattern::exact(&CacheKey::Challenge { id });
        let posts = || KeyPattern::Glob("posts:*".to_string());
        let user = |user_id: UserId| KeyPattern::Glob(format!("user:*:{user_id}*"));

        match kind {
            MutationKind::ChallengeCreated => vec![challenges()],
            MutationKind::ChallengeUpdated { challenge_id }
            | MutationKind::ChallengeDeleted { challenge_id } => {
                vec![challenges(), challenge(*challenge_id)]
            }
            MutationKind::ChallengeJoined {
                challenge_id,
                user_id,
            } => vec![challenges(), challenge(*challenge_id), user(*user_id)],
            MutationKind::PostCreated { author_id }
            | MutationKind::PostDeleted { author_id, .. } => vec![posts(), user(*author_id)],
            MutationKind::PostUpdated { .. }
            | MutationKind::PostEndorsed { .. }
            | MutationKind::PostSaved { .. }
            | MutationKind::CommentAdded { .. } => vec![posts()],
            MutationKind::UserUpdated { user_id } => vec![user(*user_id)],
            MutationKind::StatsRecorded { user_id } => {
                vec![KeyPattern::Glob(format!("stats:{user_id}:*"))]
            }
            MutationKind::NotificationsChanged { user_id } => {
                vec![KeyPattern::Glob(format!("notifications:{user_id}:*"))]
            }
            MutationKind::EmotionsUpdated => vec![KeyPattern::exact(&CacheKey::Emotions)],
            MutationKind::TagsUpdated => vec![KeyPattern::Glob("tags:*".to_string())],
        }
    }

    /// Purges every pattern for `kind` on every target and returns the patterns.
    ///
    /// Never fails: target errors are logged and counted.
    pub fn on_mutation(&self, kind: &MutationKind) -> Vec<KeyPattern> {
        let patterns = Self::patterns_for(kind);
        let outcome = self.apply(&patterns);
        debug!(
            mutation = kind.name(),
            patterns = patterns.len(),
            removed = outcome.removed,
            failures = outcome.failures,
            "Mutation routed"
        );
        patterns
    }

    pub fn apply(&self, patterns: &[KeyPattern]) -> InvalidationOutcome {
        let mut outcome = InvalidationOutcome::default();
        for pattern in patterns {
            for target in &self.targets {
                match target.invalidate(pattern) {
                    Ok(removed) => outcome.removed += removed,
                    Err(err) => {
                        outcome.failures += 1;
                        counter!(METRIC_INVALIDATION_FAILED, "target" => target.target_name().to_string())
                            .increment(1);
                        warn!(
                            target_cache = target.target_name(),
                            %pattern,
                            error = %err,
                            "Cache invalidation failed"
                        );
                    }
                }
            }
        }
        outcome
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }
}
