//! Feed assembly: candidate page (read through the server cache) plus
//! selection for one viewer.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{debug, instrument};

use crate::cache::CacheKey;
use crate::domain::{AffinityProfile, ContentItem, UserId};

use super::error::AppError;
use super::feed::{FeedMode, FeedRequest, FeedSelector};
use super::read_through::CachedReader;
use super::sources::{CandidateFilter, CandidateSource, PageRequest};

#[derive(Debug, Clone, Copy)]
pub struct FeedQuery<'a> {
    pub mode: FeedMode,
    pub viewer: Option<UserId>,
    pub page: PageRequest,
    pub recent_categories: &'a [String],
    pub profile: &'a AffinityProfile,
    pub now: OffsetDateTime,
}

impl FeedQuery<'_> {
    fn candidate_filter(&self) -> CandidateFilter {
        match self.mode {
            FeedMode::Own => CandidateFilter {
                author: self.viewer,
                categories: Vec::new(),
            },
            FeedMode::SameAffinity => CandidateFilter {
                author: None,
                categories: self.recent_categories.to_vec(),
            },
            FeedMode::All | FeedMode::Trending | FeedMode::Personalized => {
                CandidateFilter::default()
            }
        }
    }

    fn cache_key(&self, filter: &CandidateFilter) -> CacheKey {
        let fragment = filter.cache_fragment();
        CacheKey::PostsFeed {
            user_id: self.viewer.unwrap_or_default(),
            page: self.page.page,
            filter: Some(if fragment.is_empty() {
                format!("{}:{}", self.mode, self.page.limit)
            } else {
                format!("{}:{}:{fragment}", self.mode, self.page.limit)
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedPage {
    pub items: Vec<ContentItem>,
    pub has_more: bool,
}

pub struct FeedService {
    source: Arc<dyn CandidateSource>,
    reader: CachedReader,
    selector: FeedSelector,
}

impl FeedService {
    pub fn new(source: Arc<dyn CandidateSource>, reader: CachedReader, selector: FeedSelector) -> Self {
        Self {
            source,
            reader,
            selector,
        }
    }

    pub fn selector(&self) -> &FeedSelector {
        &self.selector
    }

    #[instrument(skip(self, query), fields(mode = %query.mode, page = query.page.page))]
    pub async fn feed(&self, query: &FeedQuery<'_>) -> Result<FeedPage, AppError> {
        if query.mode == FeedMode::Own && query.viewer.is_none() {
            return Ok(FeedPage {
                items: Vec::new(),
                has_more: false,
            });
        }
        if query.mode == FeedMode::SameAffinity && query.recent_categories.is_empty() {
            return Ok(FeedPage {
                items: Vec::new(),
                has_more: false,
            });
        }

        let filter = query.candidate_filter();
        let key = query.cache_key(&filter);
        let source = Arc::clone(&self.source);
        let page = query.page;
        let candidates = self
            .reader
            .get_or_fetch(&key, || async move { source.fetch_candidates(&filter, page).await })
            .await?;

        let request = FeedRequest {
            mode: query.mode,
            viewer: query.viewer,
            recent_categories: query.recent_categories,
            profile: query.profile,
            now: query.now,
        };
        let items = self.selector.select(&candidates.items, &request);
        debug!(key = %key, returned = items.len(), "Feed page assembled");
        Ok(FeedPage {
            items,
            has_more: candidates.has_more,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use time::macros::datetime;

    use super::*;
    use crate::application::sources::{CandidatePage, SourceError};
    use crate::cache::{CacheConfig, CacheRegistry};
    use crate::domain::Category;

    const NOW: OffsetDateTime = datetime!(2026-06-10 12:00 UTC);

    struct CountingSource {
        items: Vec<ContentItem>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CandidateSource for CountingSource {
        async fn fetch_candidates(
            &self,
            filter: &CandidateFilter,
            _page: PageRequest,
        ) -> Result<CandidatePage, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CandidatePage {
                items: self.items.iter().filter(|i| filter.matches(i)).cloned().collect(),
                has_more: false,
            })
        }
    }

    fn item(id: i64, author: i64, label: &str, endorse: i64, created_at: &str) -> ContentItem {
        ContentItem {
            id,
            author_id: author,
            categories: vec![Category::new(label)],
            endorse_count: endorse,
            comment_count: 0,
            created_at: created_at.into(),
        }
    }

    fn setup() -> (CacheRegistry, Arc<CountingSource>, FeedService) {
        let registry = CacheRegistry::new(CacheConfig::default());
        let source = Arc::new(CountingSource {
            items: vec![
                item(1, 7, "기쁨", 1, "2026-06-10T08:00:00Z"),
                item(2, 8, "기쁨", 9, "2026-06-10T06:00:00Z"),
                item(3, 9, "슬픔", 0, "2026-06-10T10:00:00Z"),
            ],
            calls: AtomicUsize::new(0),
        });
        let service = FeedService::new(
            source.clone(),
            CachedReader::new(Arc::clone(registry.server())),
            FeedSelector::default(),
        );
        (registry, source, service)
    }

    fn query<'a>(mode: FeedMode, recent: &'a [String], profile: &'a AffinityProfile) -> FeedQuery<'a> {
        FeedQuery {
            mode,
            viewer: Some(7),
            page: PageRequest::default(),
            recent_categories: recent,
            profile,
            now: NOW,
        }
    }

    fn ids(page: &FeedPage) -> Vec<i64> {
        page.items.iter().map(|item| item.id).collect()
    }

    #[tokio::test]
    async fn candidates_are_cached_until_a_post_mutation() {
        let (registry, source, service) = setup();
        let profile = AffinityProfile::new();

        let first = service.feed(&query(FeedMode::Trending, &[], &profile)).await.expect("feed");
        let second = service.feed(&query(FeedMode::Trending, &[], &profile)).await.expect("feed");
        assert_eq!(ids(&first), vec![2, 1]);
        assert_eq!(first, second);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        registry.trigger().post_created(8);
        service.feed(&query(FeedMode::Trending, &[], &profile)).await.expect("feed");
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn same_affinity_excludes_viewer() {
        let (_registry, _source, service) = setup();
        let profile = AffinityProfile::new();
        let recent = vec!["기쁨".to_string()];

        let page = service
            .feed(&query(FeedMode::SameAffinity, &recent, &profile))
            .await
            .expect("feed");
        assert_eq!(ids(&page), vec![2]);
    }

    #[tokio::test]
    async fn own_feed_needs_a_viewer() {
        let (_registry, source, service) = setup();
        let profile = AffinityProfile::new();
        let anonymous = FeedQuery {
            viewer: None,
            ..query(FeedMode::Own, &[], &profile)
        };

        assert!(service.feed(&anonymous).await.expect("feed").items.is_empty());
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);

        let own = service.feed(&query(FeedMode::Own, &[], &profile)).await.expect("feed");
        assert_eq!(ids(&own), vec![1]);
    }
}
