//! Podcast feed handling: parsing, fetching and the refresh cycle.
//!
//! - [`rss_parser`] turns RSS bytes into a [`Feed`] using declarative
//!   `(field, [paths])` extraction tables
//! - [`fetcher`] performs conditional GETs and classifies the response into a
//!   [`FetchOutcome`]
//! - [`refresher`] ties both to storage and the scheduler: one
//!   [`FeedRefresher::refresh`] per podcast, [`FeedRefresher::refresh_due`]
//!   for a whole cycle
//!
//! # Example
//!
//! ```no_run
//! use podcrawl::feed::{build_client, FeedRefresher, RefreshSettings};
//! use podcrawl::storage::Database;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let db = Database::open("podcasts.db").await?;
//! let settings = RefreshSettings::default();
//! let client = build_client(&settings.http)?;
//!
//! let refresher = FeedRefresher::new(db, client, settings);
//! for report in refresher.refresh_due(100).await? {
//!     println!("{} {:?}", report.rss, report.summary.map(|s| s.outcome));
//! }
//! # Ok(())
//! # }
//! ```

pub mod categories;
pub mod date_parser;
pub mod fetcher;
pub mod hasher;
pub mod models;
pub mod refresher;
pub mod rss_parser;

pub use categories::{extract_categories, CategoryCache, CategoryMatch};
pub use date_parser::parse_date;
pub use fetcher::{build_client, fetch_feed, FetchError, FetchOutcome, FetchedFeed, HttpSettings};
pub use hasher::make_content_hash;
pub use models::{Feed, Item, ValidationError};
pub use refresher::{
    FeedRefresher, RefreshError, RefreshOutcome, RefreshReport, RefreshSettings, RefreshSummary,
};
pub use rss_parser::{parse_rss, parse_rss_at, RssParserError};
