//! Per-user content affinity: category label to engagement counters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::content::{Category, ContentItem};

/// Kinds of engagement that feed the affinity profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    View,
    Endorse,
    Save,
}

impl Signal {
    pub fn as_str(self) -> &'static str {
        match self {
            Signal::View => "view",
            Signal::Endorse => "endorse",
            Signal::Save => "save",
        }
    }
}

/// Engagement counters for one category.
///
/// Serialized with the camelCase field names of the persisted blob; the legacy
/// `likeCount` and `bookmarkCount` names are accepted on read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCounters {
    #[serde(default)]
    pub view_count: u64,
    #[serde(default, alias = "likeCount")]
    pub endorse_count: u64,
    #[serde(default, alias = "bookmarkCount")]
    pub save_count: u64,
}

impl CategoryCounters {
    pub fn bump(&mut self, signal: Signal, amount: u64) {
        let slot = match signal {
            Signal::View => &mut self.view_count,
            Signal::Endorse => &mut self.endorse_count,
            Signal::Save => &mut self.save_count,
        };
        *slot = slot.saturating_add(amount);
    }

    pub fn absorb(&mut self, other: &CategoryCounters) {
        self.view_count = self.view_count.saturating_add(other.view_count);
        self.endorse_count = self.endorse_count.saturating_add(other.endorse_count);
        self.save_count = self.save_count.saturating_add(other.save_count);
    }

    pub fn total(&self) -> u64 {
        self.view_count
            .saturating_add(self.endorse_count)
            .saturating_add(self.save_count)
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Category label to counters. Labels are unique by construction.
///
/// Counters only ever grow: every mutation and merge is additive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AffinityProfile {
    categories: BTreeMap<String, CategoryCounters>,
}

impl AffinityProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn counters(&self, label: &str) -> Option<&CategoryCounters> {
        self.categories.get(label)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CategoryCounters)> {
        self.categories
            .iter()
            .map(|(label, counters)| (label.as_str(), counters))
    }

    pub fn record(&mut self, label: &str, signal: Signal) {
        self.add(label, signal, 1);
    }

    /// Adds `amount` to one counter, creating the category at zero first.
    pub fn add(&mut self, label: &str, signal: Signal, amount: u64) {
        self.categories
            .entry(label.to_string())
            .or_default()
            .bump(signal, amount);
    }

    pub fn record_all<'a, I>(&mut self, categories: I, signal: Signal)
    where
        I: IntoIterator<Item = &'a Category>,
    {
        for category in categories {
            self.record(&category.label, signal);
        }
    }

    /// Additive union keyed by label.
    pub fn merge(&mut self, other: &AffinityProfile) {
        for (label, counters) in &other.categories {
            self.categories
                .entry(label.clone())
                .or_default()
                .absorb(counters);
        }
    }

    pub fn merged(mut self, other: &AffinityProfile) -> Self {
        self.merge(other);
        self
    }

    /// Labels ordered by total engagement, highest first; ties by label.
    pub fn top_categories(&self, limit: usize) -> Vec<&str> {
        let mut ranked: Vec<(&str, u64)> = self
            .categories
            .iter()
            .map(|(label, counters)| (label.as_str(), counters.total()))
            .filter(|(_, total)| *total > 0)
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked.into_iter().take(limit).map(|(label, _)| label).collect()
    }

    /// Builds the view-count contribution of per-day category statistics.
    pub fn from_daily_stats(days: &[DailyCategoryStats]) -> Self {
        let mut profile = Self::new();
        for day in days {
            for entry in &day.categories {
                profile.add(&entry.label, Signal::View, entry.count);
            }
        }
        profile
    }

    /// Builds the save-count contribution of saved items, one per category.
    pub fn from_saved_items(items: &[ContentItem]) -> Self {
        let mut profile = Self::new();
        for item in items {
            profile.record_all(&item.categories, Signal::Save);
        }
        profile
    }
}

/// One day of category activity as reported by the stats collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCategoryStats {
    pub date: String,
    #[serde(default, alias = "emotions")]
    pub categories: Vec<CategoryCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCount {
    #[serde(alias = "name")]
    pub label: String,
    #[serde(default)]
    pub count: u64,
}
