//! Popularity and affinity scoring.
//!
//! Pure functions of an item, a profile snapshot and the current time. Missing
//! or malformed inputs clamp to zero contribution; an item whose age cannot be
//! computed is unscorable and dropped from ranked output.

use time::OffsetDateTime;
use tracing::debug;

use crate::domain::{AffinityProfile, ContentItem};

/// Tuning constants for both scores.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringWeights {
    pub view: f64,
    pub endorse: f64,
    pub save: f64,
    /// Share of the affinity score taken by profile matches.
    pub affinity_share: f64,
    /// Share of the affinity score taken by raw engagement.
    pub engagement_share: f64,
    /// Points per hour of freshness inside the recency window.
    pub recency_share: f64,
    pub engagement_endorse: f64,
    pub engagement_comment: f64,
    pub recency_window_hours: f64,
    pub popularity_endorse: f64,
    pub popularity_comment: f64,
    pub popularity_window_hours: f64,
    pub popularity_multiplier: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            view: 5.0,
            endorse: 15.0,
            save: 30.0,
            affinity_share: 0.60,
            engagement_share: 0.25,
            recency_share: 0.15,
            engagement_endorse: 2.0,
            engagement_comment: 3.0,
            recency_window_hours: 24.0,
            popularity_endorse: 3.0,
            popularity_comment: 5.0,
            popularity_window_hours: 48.0,
            popularity_multiplier: 0.5,
        }
    }
}

/// An item paired with the score that placed it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredItem {
    pub item: ContentItem,
    pub score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ScoringEngine {
    weights: ScoringWeights,
}

impl ScoringEngine {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// Time-decayed engagement, `None` when the creation time is unreadable.
    pub fn try_popularity_score(&self, item: &ContentItem, now: OffsetDateTime) -> Option<f64> {
        let w = &self.weights;
        let hours = item.hours_since_created(now)?;
        if hours > w.popularity_window_hours {
            return Some(0.0);
        }

        let interaction =
            item.endorsements() * w.popularity_endorse + item.comments() * w.popularity_comment;
        let time_weight =
            ((w.popularity_window_hours - hours) / w.popularity_window_hours).max(0.0);
        Some(interaction * (1.0 + time_weight * w.popularity_multiplier))
    }

    pub fn popularity_score(&self, item: &ContentItem, now: OffsetDateTime) -> f64 {
        self.try_popularity_score(item, now).unwrap_or(0.0)
    }

    /// Profile match plus engagement plus recency.
    ///
    /// `Some(0.0)` for items without categories, `None` when the creation time
    /// is unreadable.
    pub fn try_affinity_score(
        &self,
        item: &ContentItem,
        profile: &AffinityProfile,
        now: OffsetDateTime,
    ) -> Option<f64> {
        if !item.has_categories() {
            return Some(0.0);
        }
        let w = &self.weights;
        let hours = item.hours_since_created(now)?;

        let matched: f64 = item
            .category_labels()
            .filter_map(|label| profile.counters(label))
            .map(|counters| {
                counters.view_count as f64 * w.view
                    + counters.endorse_count as f64 * w.endorse
                    + counters.save_count as f64 * w.save
            })
            .sum();
        let affinity_part = matched * w.affinity_share;

        let engagement_part = (item.endorsements() * w.engagement_endorse
            + item.comments() * w.engagement_comment)
            * w.engagement_share;

        let recency_part = if hours <= w.recency_window_hours {
            (w.recency_window_hours - hours) * w.recency_share
        } else {
            0.0
        };

        Some(affinity_part + engagement_part + recency_part)
    }

    pub fn affinity_score(
        &self,
        item: &ContentItem,
        profile: &AffinityProfile,
        now: OffsetDateTime,
    ) -> f64 {
        self.try_affinity_score(item, profile, now).unwrap_or(0.0)
    }

    /// Items with a positive popularity score, highest first. Ties keep input order.
    pub fn rank_by_popularity(&self, items: &[ContentItem], now: OffsetDateTime) -> Vec<ScoredItem> {
        let scored = items
            .iter()
            .filter_map(|item| {
                let score = self.try_popularity_score(item, now);
                if score.is_none() {
                    debug!(item_id = item.id, "Skipping unscorable item");
                }
                score.map(|score| ScoredItem {
                    item: item.clone(),
                    score,
                })
            })
            .filter(|scored| scored.score > 0.0)
            .collect();
        sort_descending(scored)
    }

    /// Items with at least one category, by affinity score, highest first.
    /// Ties keep input order.
    pub fn rank_by_affinity(
        &self,
        items: &[ContentItem],
        profile: &AffinityProfile,
        now: OffsetDateTime,
    ) -> Vec<ScoredItem> {
        let scored = items
            .iter()
            .filter(|item| item.has_categories())
            .filter_map(|item| {
                let score = self.try_affinity_score(item, profile, now);
                if score.is_none() {
                    debug!(item_id = item.id, "Skipping unscorable item");
                }
                score.map(|score| ScoredItem {
                    item: item.clone(),
                    score,
                })
            })
            .collect();
        sort_descending(scored)
    }
}

fn sort_descending(mut scored: Vec<ScoredItem>) -> Vec<ScoredItem> {
    // `sort_by` is stable, so equal scores keep their input order.
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored
}

#[cfg(test)]
mod tests {
    use time::Duration;
    use time::format_description::well_known::Rfc3339;
    use time::macros::datetime;

    use super::*;
    use crate::domain::{Category, Signal};

    const NOW: OffsetDateTime = datetime!(2026-06-10 12:00 UTC);

    fn item(id: i64, labels: &[&str], endorse: i64, comments: i64, hours_ago: i64) -> ContentItem {
        ContentItem {
            id,
            author_id: 100 + id,
            categories: labels.iter().map(|label| Category::new(*label)).collect(),
            endorse_count: endorse,
            comment_count: comments,
            created_at: (NOW - Duration::hours(hours_ago))
                .format(&Rfc3339)
                .expect("format timestamp"),
        }
    }

    fn joy_profile() -> AffinityProfile {
        let mut profile = AffinityProfile::new();
        profile.add("기쁨", Signal::View, 10);
        profile.add("기쁨", Signal::Endorse, 2);
        profile.add("기쁨", Signal::Save, 1);
        profile
    }

    #[test]
    fn affinity_score_worked_example() {
        let engine = ScoringEngine::default();
        let score = engine.affinity_score(&item(1, &["기쁨"], 5, 1, 10), &joy_profile(), NOW);
        // 66 + 3.25 + 2.1
        assert!((score - 71.35).abs() < 1e-9, "score was {score}");
    }

    #[test]
    fn popularity_is_zero_past_window() {
        let engine = ScoringEngine::default();
        assert_eq!(engine.popularity_score(&item(1, &[], 1_000, 1_000, 49), NOW), 0.0);
    }

    #[test]
    fn popularity_formula_inside_window() {
        let engine = ScoringEngine::default();
        // interaction = 2*3 + 1*5 = 11, time weight = 36/48 = 0.75
        let score = engine.popularity_score(&item(1, &[], 2, 1, 12), NOW);
        assert!((score - 11.0 * 1.375).abs() < 1e-9);
    }

    #[test]
    fn popularity_is_monotonic_in_endorsements() {
        let engine = ScoringEngine::default();
        let fewer = engine.popularity_score(&item(1, &[], 3, 2, 5), NOW);
        let more = engine.popularity_score(&item(2, &[], 4, 2, 5), NOW);
        assert!(more > fewer);
    }

    #[test]
    fn negative_counters_contribute_nothing() {
        let engine = ScoringEngine::default();
        assert_eq!(engine.popularity_score(&item(1, &[], -5, -1, 1), NOW), 0.0);
    }

    #[test]
    fn empty_categories_score_zero_and_are_excluded() {
        let engine = ScoringEngine::default();
        let bare = item(1, &[], 50, 50, 1);
        assert_eq!(engine.affinity_score(&bare, &joy_profile(), NOW), 0.0);

        let ranked = engine.rank_by_affinity(
            &[bare, item(2, &["슬픔"], 0, 0, 30)],
            &joy_profile(),
            NOW,
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].item.id, 2);
    }

    #[test]
    fn empty_profile_still_ranks_by_engagement_and_recency() {
        let engine = ScoringEngine::default();
        let ranked = engine.rank_by_affinity(
            &[item(1, &["a"], 0, 0, 20), item(2, &["b"], 0, 0, 2)],
            &AffinityProfile::new(),
            NOW,
        );
        let ids: Vec<i64> = ranked.iter().map(|s| s.item.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn malformed_timestamp_is_unscorable() {
        let engine = ScoringEngine::default();
        let mut broken = item(1, &["기쁨"], 10, 10, 1);
        broken.created_at = "not a date".into();

        assert_eq!(engine.try_popularity_score(&broken, NOW), None);
        assert_eq!(engine.try_affinity_score(&broken, &joy_profile(), NOW), None);
        assert!(engine.rank_by_popularity(&[broken.clone()], NOW).is_empty());
        assert!(engine.rank_by_affinity(&[broken], &joy_profile(), NOW).is_empty());
    }

    #[test]
    fn ties_keep_input_order() {
        let engine = ScoringEngine::default();
        let items = [
            item(1, &[], 2, 0, 6),
            item(2, &[], 5, 0, 6),
            item(3, &[], 2, 0, 6),
        ];
        let ids: Vec<i64> = engine
            .rank_by_popularity(&items, NOW)
            .iter()
            .map(|s| s.item.id)
            .collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn future_item_gets_full_recency() {
        let engine = ScoringEngine::default();
        let future = item(1, &["x"], 0, 0, -5);
        let score = engine.affinity_score(&future, &AffinityProfile::new(), NOW);
        assert!((score - 24.0 * 0.15).abs() < 1e-9);
    }
}
