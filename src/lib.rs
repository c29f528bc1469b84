//! moodfeed: affinity-ranked content feeds with a keyed server cache, a
//! persistent client cache and in-flight request deduplication.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
