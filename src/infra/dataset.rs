//! JSON dataset adapter for the external collaborators.
//!
//! A dataset file holds the candidate items plus, per user, their daily
//! category statistics and saved item ids:
//!
//! ```json
//! {
//!   "items": [{ "id": 1, "author_id": 2, "categories": [{ "label": "기쁨" }],
//!               "endorse_count": 3, "comment_count": 1,
//!               "created_at": "2026-06-01T09:00:00Z" }],
//!   "daily_stats": { "7": [{ "date": "2026-06-01",
//!                            "categories": [{ "label": "기쁨", "count": 2 }] }] },
//!   "saved": { "7": [1] }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use time::Date;
use time::macros::format_description;
use tracing::{debug, info};

use crate::application::sources::{
    CandidateFilter, CandidatePage, CandidateSource, CategoryStatsSource, PageRequest,
    SavedItemsSource, SourceError,
};
use crate::domain::{ContentItem, DailyCategoryStats, ItemId, UserId};

use super::error::InfraError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonDataset {
    #[serde(default, alias = "posts")]
    items: Vec<ContentItem>,
    #[serde(default)]
    daily_stats: HashMap<UserId, Vec<DailyCategoryStats>>,
    #[serde(default)]
    saved: HashMap<UserId, Vec<ItemId>>,
}

impl JsonDataset {
    pub async fn load(path: &Path) -> Result<Self, InfraError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let dataset = Self::from_json(&raw)
            .map_err(|err| InfraError::dataset(path.display().to_string(), err.to_string()))?;
        info!(
            path = %path.display(),
            items = dataset.items.len(),
            users = dataset.daily_stats.len(),
            "Dataset loaded"
        );
        Ok(dataset)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn from_items(items: Vec<ContentItem>) -> Self {
        Self {
            items,
            ..Self::default()
        }
    }

    pub fn items(&self) -> &[ContentItem] {
        &self.items
    }

    pub fn item(&self, id: ItemId) -> Option<&ContentItem> {
        self.items.iter().find(|item| item.id == id)
    }
}

fn parse_day(value: &str) -> Option<Date> {
    Date::parse(value, format_description!("[year]-[month]-[day]")).ok()
}

#[async_trait]
impl CandidateSource for JsonDataset {
    async fn fetch_candidates(
        &self,
        filter: &CandidateFilter,
        page: PageRequest,
    ) -> Result<CandidatePage, SourceError> {
        let matching: Vec<&ContentItem> =
            self.items.iter().filter(|item| filter.matches(item)).collect();
        let offset = page.offset();
        let end = offset.saturating_add(page.limit as usize);
        let items: Vec<ContentItem> = matching
            .iter()
            .skip(offset)
            .take(page.limit as usize)
            .map(|item| (*item).clone())
            .collect();
        debug!(
            filter = %filter.cache_fragment(),
            page = page.page,
            returned = items.len(),
            "Candidates fetched"
        );
        Ok(CandidatePage {
            items,
            has_more: matching.len() > end,
        })
    }
}

#[async_trait]
impl CategoryStatsSource for JsonDataset {
    /// Days with an unreadable date are skipped.
    async fn daily_stats(
        &self,
        user: UserId,
        start: Date,
        end: Date,
    ) -> Result<Vec<DailyCategoryStats>, SourceError> {
        let Some(days) = self.daily_stats.get(&user) else {
            return Ok(Vec::new());
        };
        Ok(days
            .iter()
            .filter(|day| parse_day(&day.date).is_some_and(|date| start <= date && date <= end))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SavedItemsSource for JsonDataset {
    async fn saved_items(&self, user: UserId, limit: usize) -> Result<Vec<ContentItem>, SourceError> {
        let Some(ids) = self.saved.get(&user) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| self.item(*id).cloned())
            .take(limit)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    const DATASET: &str = r#"{
        "items": [
            { "id": 1, "author_id": 10, "categories": [{ "label": "기쁨" }],
              "endorse_count": 3, "comment_count": 1, "created_at": "2026-06-01T09:00:00Z" },
            { "post_id": 2, "user_id": 11, "emotions": [{ "name": "슬픔" }],
              "like_count": 1, "created_at": "2026-06-02T09:00:00Z" },
            { "id": 3, "author_id": 10, "created_at": "2026-06-03T09:00:00Z" }
        ],
        "daily_stats": {
            "7": [
                { "date": "2026-05-20", "categories": [{ "label": "old", "count": 9 }] },
                { "date": "2026-06-01", "emotions": [{ "name": "기쁨", "count": 2 }] },
                { "date": "garbage", "categories": [] }
            ]
        },
        "saved": { "7": [2, 99, 1] }
    }"#;

    fn dataset() -> JsonDataset {
        JsonDataset::from_json(DATASET).expect("dataset")
    }

    #[tokio::test]
    async fn candidates_filter_and_paginate() {
        let dataset = dataset();
        let by_author = CandidateFilter {
            author: Some(10),
            categories: Vec::new(),
        };
        let page = dataset
            .fetch_candidates(&by_author, PageRequest::new(1, 1))
            .await
            .expect("page");
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, 1);
        assert!(page.has_more);

        let last = dataset
            .fetch_candidates(&by_author, PageRequest::new(2, 1))
            .await
            .expect("page");
        assert_eq!(last.items[0].id, 3);
        assert!(!last.has_more);
    }

    #[tokio::test]
    async fn accepts_legacy_field_names() {
        let dataset = dataset();
        let item = dataset.item(2).expect("item 2");
        assert_eq!(item.author_id, 11);
        assert_eq!(item.endorse_count, 1);
        assert_eq!(item.categories[0].label, "슬픔");
    }

    #[tokio::test]
    async fn daily_stats_respect_window() {
        let days = dataset()
            .daily_stats(7, date!(2026 - 05 - 25), date!(2026 - 06 - 01))
            .await
            .expect("stats");
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].categories[0].label, "기쁨");

        let none = dataset()
            .daily_stats(8, date!(2026 - 05 - 25), date!(2026 - 06 - 01))
            .await
            .expect("stats");
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn saved_items_skip_unknown_ids_and_honour_limit() {
        let saved = dataset().saved_items(7, 10).await.expect("saved");
        let ids: Vec<ItemId> = saved.iter().map(|item| item.id).collect();
        assert_eq!(ids, vec![2, 1]);

        assert_eq!(dataset().saved_items(7, 1).await.expect("saved").len(), 1);
    }
}
