//! Domain types and invariants.

pub mod content;
pub mod error;
pub mod profile;

pub use content::{Category, ContentItem, ItemId, UserId};
pub use error::DomainError;
pub use profile::{AffinityProfile, CategoryCount, CategoryCounters, DailyCategoryStats, Signal};
