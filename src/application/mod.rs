//! Application services: ranking, feed assembly, profile tracking and the
//! read paths that sit in front of the caches.

pub mod affinity;
pub mod client_fetch;
pub mod engagement;
pub mod error;
pub mod feed;
pub mod ranking;
pub mod read_through;
pub mod scoring;
pub mod sources;
