//! Content items as delivered by the record store.
//!
//! Items are referenced, never owned: the ranking layer reads them, scores them
//! and hands them back in a new order.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub type UserId = i64;
pub type ItemId = i64;

const SECONDS_PER_HOUR: f64 = 3600.0;

/// A content category, such as an emotion label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Category {
    #[serde(alias = "name")]
    pub label: String,
}

impl Category {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl From<&str> for Category {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

/// A candidate item for ranking.
///
/// Counters are signed because the upstream store does not guarantee
/// non-negative values; every consumer clamps them through [`Self::endorsements`]
/// and [`Self::comments`]. `created_at` stays in its wire form so that a
/// malformed timestamp can be detected at scoring time instead of failing the
/// whole candidate page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    #[serde(alias = "post_id")]
    pub id: ItemId,
    #[serde(alias = "user_id")]
    pub author_id: UserId,
    #[serde(default, alias = "emotions")]
    pub categories: Vec<Category>,
    #[serde(default, alias = "like_count")]
    pub endorse_count: i64,
    #[serde(default)]
    pub comment_count: i64,
    pub created_at: String,
}

impl ContentItem {
    /// Parsed creation time, `None` when the stored value is not RFC 3339.
    pub fn created_at(&self) -> Option<OffsetDateTime> {
        OffsetDateTime::parse(self.created_at.trim(), &Rfc3339).ok()
    }

    /// Hours elapsed between creation and `now`.
    ///
    /// Timestamps in the future count as zero hours old.
    pub fn hours_since_created(&self, now: OffsetDateTime) -> Option<f64> {
        let created = self.created_at()?;
        let hours = (now - created).as_seconds_f64() / SECONDS_PER_HOUR;
        hours.is_finite().then_some(hours.max(0.0))
    }

    pub fn endorsements(&self) -> f64 {
        self.endorse_count.max(0) as f64
    }

    pub fn comments(&self) -> f64 {
        self.comment_count.max(0) as f64
    }

    pub fn has_categories(&self) -> bool {
        !self.categories.is_empty()
    }

    pub fn category_labels(&self) -> impl Iterator<Item = &str> {
        self.categories.iter().map(|category| category.label.as_str())
    }

    /// True when at least one of the item's categories is in `labels`.
    pub fn shares_category(&self, labels: &HashSet<&str>) -> bool {
        self.category_labels().any(|label| labels.contains(label))
    }

    pub fn is_authored_by(&self, user: UserId) -> bool {
        self.author_id == user
    }
}
