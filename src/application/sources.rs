//! Traits describing the external collaborators: the record store's candidate
//! query, the per-day category statistics and the viewer's saved items.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::Date;

use crate::domain::{ContentItem, DailyCategoryStats, UserId};

#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("malformed source data: {0}")]
    Malformed(String),
    #[error("source request timed out")]
    Timeout,
}

impl SourceError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }

    pub fn malformed(err: impl std::fmt::Display) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// Which candidates to fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateFilter {
    pub author: Option<UserId>,
    /// Any-of match on category labels; empty means no restriction.
    pub categories: Vec<String>,
}

impl CandidateFilter {
    pub fn matches(&self, item: &ContentItem) -> bool {
        if self.author.is_some_and(|author| item.author_id != author) {
            return false;
        }
        self.categories.is_empty()
            || item
                .category_labels()
                .any(|label| self.categories.iter().any(|wanted| wanted == label))
    }

    /// Short stable rendering for cache keys; empty when unrestricted.
    pub fn cache_fragment(&self) -> String {
        let mut parts = Vec::new();
        if let Some(author) = self.author {
            parts.push(format!("author={author}"));
        }
        if !self.categories.is_empty() {
            let mut categories = self.categories.clone();
            categories.sort();
            parts.push(format!("categories={}", categories.join(",")));
        }
        parts.join(";")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based.
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.max(1),
        }
    }

    pub fn offset(&self) -> usize {
        (self.page.saturating_sub(1) as usize).saturating_mul(self.limit as usize)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, 20)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePage {
    pub items: Vec<ContentItem>,
    pub has_more: bool,
}

#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn fetch_candidates(
        &self,
        filter: &CandidateFilter,
        page: PageRequest,
    ) -> Result<CandidatePage, SourceError>;
}

#[async_trait]
pub trait CategoryStatsSource: Send + Sync {
    /// Per-day category counts for `user` in `[start, end]`.
    async fn daily_stats(
        &self,
        user: UserId,
        start: Date,
        end: Date,
    ) -> Result<Vec<DailyCategoryStats>, SourceError>;
}

#[async_trait]
pub trait SavedItemsSource: Send + Sync {
    async fn saved_items(&self, user: UserId, limit: usize)
    -> Result<Vec<ContentItem>, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Category;

    fn item(author: UserId, labels: &[&str]) -> ContentItem {
        ContentItem {
            id: 1,
            author_id: author,
            categories: labels.iter().map(|label| Category::new(*label)).collect(),
            endorse_count: 0,
            comment_count: 0,
            created_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn filter_matches_author_and_any_category() {
        let filter = CandidateFilter {
            author: Some(3),
            categories: vec!["a".into(), "b".into()],
        };
        assert!(filter.matches(&item(3, &["b"])));
        assert!(!filter.matches(&item(4, &["b"])));
        assert!(!filter.matches(&item(3, &["c"])));
        assert!(CandidateFilter::default().matches(&item(9, &[])));
    }

    #[test]
    fn cache_fragment_is_order_independent() {
        let a = CandidateFilter {
            author: None,
            categories: vec!["b".into(), "a".into()],
        };
        let b = CandidateFilter {
            author: None,
            categories: vec!["a".into(), "b".into()],
        };
        assert_eq!(a.cache_fragment(), b.cache_fragment());
        assert_eq!(CandidateFilter::default().cache_fragment(), "");
    }

    #[test]
    fn page_offsets() {
        assert_eq!(PageRequest::new(0, 0), PageRequest::new(1, 1));
        assert_eq!(PageRequest::new(3, 20).offset(), 40);
    }
}
