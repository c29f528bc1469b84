//! Feed selection: filter and order a candidate list for one viewer.

use std::cmp::Reverse;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

use crate::domain::{AffinityProfile, ContentItem, DomainError, UserId};

use super::scoring::ScoringEngine;

const DEFAULT_TRENDING_LIMIT: usize = 50;
const DEFAULT_TRENDING_FALLBACK: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedMode {
    /// Everything, newest first.
    All,
    /// Items sharing a category with the viewer's recent categories, minus the
    /// viewer's own, newest first.
    SameAffinity,
    /// Positive popularity, highest first.
    Trending,
    /// The viewer's own items, newest first.
    Own,
    /// Ranked by affinity with the viewer's profile.
    Personalized,
}

impl FeedMode {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedMode::All => "all",
            FeedMode::SameAffinity => "same_affinity",
            FeedMode::Trending => "trending",
            FeedMode::Own => "own",
            FeedMode::Personalized => "personalized",
        }
    }
}

impl fmt::Display for FeedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedMode {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "all" | "latest" => Ok(FeedMode::All),
            "same_affinity" | "same_emotion" => Ok(FeedMode::SameAffinity),
            "trending" | "popular" => Ok(FeedMode::Trending),
            "own" | "mine" => Ok(FeedMode::Own),
            "personalized" | "custom" => Ok(FeedMode::Personalized),
            _ => Err(DomainError::unknown("feed mode", value)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Maximum items in a trending feed.
    pub trending_limit: usize,
    /// Most-recent items served when nothing is trending.
    pub trending_fallback: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            trending_limit: DEFAULT_TRENDING_LIMIT,
            trending_fallback: DEFAULT_TRENDING_FALLBACK,
        }
    }
}

impl From<&crate::config::FeedSettings> for FeedConfig {
    fn from(settings: &crate::config::FeedSettings) -> Self {
        Self {
            trending_limit: settings.trending_limit,
            trending_fallback: settings.trending_fallback,
        }
    }
}

/// Everything a selection needs besides the candidates.
#[derive(Debug, Clone, Copy)]
pub struct FeedRequest<'a> {
    pub mode: FeedMode,
    pub viewer: Option<UserId>,
    pub recent_categories: &'a [String],
    pub profile: &'a AffinityProfile,
    pub now: OffsetDateTime,
}

/// Stateless; safe to share.
#[derive(Debug, Clone, Default)]
pub struct FeedSelector {
    config: FeedConfig,
    scoring: ScoringEngine,
}

impl FeedSelector {
    pub fn new(config: FeedConfig, scoring: ScoringEngine) -> Self {
        Self { config, scoring }
    }

    pub fn scoring(&self) -> &ScoringEngine {
        &self.scoring
    }

    pub fn select(&self, candidates: &[ContentItem], request: &FeedRequest<'_>) -> Vec<ContentItem> {
        let selected = match request.mode {
            FeedMode::All => newest_first(candidates.to_vec()),
            FeedMode::SameAffinity => self.same_affinity(candidates, request),
            FeedMode::Trending => self.trending(candidates, request.now),
            FeedMode::Own => match request.viewer {
                Some(viewer) => newest_first(
                    candidates
                        .iter()
                        .filter(|item| item.is_authored_by(viewer))
                        .cloned()
                        .collect(),
                ),
                None => Vec::new(),
            },
            FeedMode::Personalized => self
                .scoring
                .rank_by_affinity(candidates, request.profile, request.now)
                .into_iter()
                .map(|scored| scored.item)
                .collect(),
        };

        debug!(
            mode = request.mode.as_str(),
            candidates = candidates.len(),
            selected = selected.len(),
            "Feed selected"
        );
        selected
    }

    fn same_affinity(&self, candidates: &[ContentItem], request: &FeedRequest<'_>) -> Vec<ContentItem> {
        if request.recent_categories.is_empty() {
            return Vec::new();
        }
        let labels: HashSet<&str> = request
            .recent_categories
            .iter()
            .map(String::as_str)
            .collect();

        newest_first(
            candidates
                .iter()
                .filter(|item| request.viewer.is_none_or(|viewer| !item.is_authored_by(viewer)))
                .filter(|item| item.shares_category(&labels))
                .cloned()
                .collect(),
        )
    }

    fn trending(&self, candidates: &[ContentItem], now: OffsetDateTime) -> Vec<ContentItem> {
        let ranked = self.scoring.rank_by_popularity(candidates, now);
        if ranked.is_empty() {
            debug!(
                fallback = self.config.trending_fallback,
                "Nothing trending, falling back to most recent"
            );
            let mut recent = newest_first(candidates.to_vec());
            recent.truncate(self.config.trending_fallback);
            return recent;
        }
        ranked
            .into_iter()
            .take(self.config.trending_limit)
            .map(|scored| scored.item)
            .collect()
    }
}

/// Newest first; unreadable timestamps sort last, ties keep input order.
fn newest_first(mut items: Vec<ContentItem>) -> Vec<ContentItem> {
    items.sort_by_cached_key(|item| Reverse(item.created_at()));
    items
}
