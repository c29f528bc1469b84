//! Engagement recording: updates the viewer's affinity profile and, for
//! server-side mutations, invalidates the affected cache entries.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::cache::CacheTrigger;
use crate::domain::{ContentItem, UserId};

use super::affinity::AffinityRegistry;

#[derive(Debug, Clone)]
pub enum EngagementEvent {
    Viewed { item: ContentItem, duration: Duration },
    Endorsed { item: ContentItem },
    Saved { item: ContentItem },
}

impl EngagementEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngagementEvent::Viewed { .. } => "viewed",
            EngagementEvent::Endorsed { .. } => "endorsed",
            EngagementEvent::Saved { .. } => "saved",
        }
    }

    pub fn item(&self) -> &ContentItem {
        match self {
            EngagementEvent::Viewed { item, .. }
            | EngagementEvent::Endorsed { item }
            | EngagementEvent::Saved { item } => item,
        }
    }
}

pub struct EngagementRecorder {
    profiles: Arc<AffinityRegistry>,
    trigger: Arc<CacheTrigger>,
}

impl EngagementRecorder {
    pub fn new(profiles: Arc<AffinityRegistry>, trigger: Arc<CacheTrigger>) -> Self {
        Self { profiles, trigger }
    }

    pub fn profiles(&self) -> &Arc<AffinityRegistry> {
        &self.profiles
    }

    /// Returns false when the event was ignored (a view shorter than the
    /// configured minimum).
    #[instrument(skip(self, event), fields(event = event.name(), item = event.item().id))]
    pub async fn record(&self, user: UserId, event: EngagementEvent) -> bool {
        let store = self.profiles.for_user(user);
        match event {
            EngagementEvent::Viewed { item, duration } => {
                store.record_view(&item.categories, duration).await
            }
            EngagementEvent::Endorsed { item } => {
                store.record_endorse(&item.categories).await;
                self.trigger.post_endorsed(item.id, user);
                debug!("Endorsement recorded");
                true
            }
            EngagementEvent::Saved { item } => {
                store.record_save(&item.categories).await;
                self.trigger.post_saved(item.id, user);
                debug!("Save recorded");
                true
            }
        }
    }
}
