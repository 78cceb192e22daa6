//! Podcast feed crawler.
//!
//! Fetches podcast RSS feeds with conditional requests, parses them into
//! typed [`feed::Feed`] values, reconciles episodes into SQLite and adapts
//! each podcast's polling interval to its publishing cadence.

pub mod config;
pub mod feed;
pub mod scheduler;
pub mod storage;
pub mod util;
pub mod xml;
