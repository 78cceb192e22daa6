use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use sqlx::FromRow;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("The podcast database is locked by another process. Please stop it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Refresh Outcome
// ============================================================================

/// Last refresh outcome, stored as text in `podcasts.result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
pub enum FeedResult {
    Success,
    NotModified,
    Duplicate,
    HttpError,
    NetworkError,
    RssParseError,
}

impl FeedResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedResult::Success => "success",
            FeedResult::NotModified => "not_modified",
            FeedResult::Duplicate => "duplicate",
            FeedResult::HttpError => "http_error",
            FeedResult::NetworkError => "network_error",
            FeedResult::RssParseError => "rss_parse_error",
        }
    }
}

impl std::fmt::Display for FeedResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A tracked feed. Timestamps are unix seconds, `update_interval` is seconds.
#[derive(Debug, Clone, FromRow)]
pub struct Podcast {
    pub id: i64,
    pub rss: String,
    pub title: String,
    pub link: Option<String>,
    pub description: String,
    pub owner: String,
    pub explicit: bool,
    pub cover_url: Option<String>,
    pub funding_url: Option<String>,
    pub funding_text: String,
    pub language: String,
    pub keywords: String,
    pub extracted_text: String,
    pub active: bool,
    pub promoted: bool,
    pub content_hash: Option<String>,
    pub etag: Option<String>,
    pub modified: Option<i64>,
    pub http_status: Option<i64>,
    pub parsed: Option<i64>,
    pub pub_date: Option<i64>,
    pub errors: i64,
    pub update_interval: i64,
    pub result: Option<FeedResult>,
    pub created: i64,
}

impl Podcast {
    pub fn pub_date_utc(&self) -> Option<DateTime<Utc>> {
        self.pub_date.and_then(|ts| DateTime::from_timestamp(ts, 0))
    }

    pub fn modified_utc(&self) -> Option<DateTime<Utc>> {
        self.modified.and_then(|ts| DateTime::from_timestamp(ts, 0))
    }

    pub fn update_interval(&self) -> TimeDelta {
        TimeDelta::seconds(self.update_interval)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Episode {
    pub id: i64,
    pub podcast_id: i64,
    pub guid: String,
    pub title: String,
    pub link: Option<String>,
    pub media_url: String,
    pub media_type: String,
    pub length: Option<i64>,
    pub duration: String,
    pub episode: Option<i64>,
    pub season: Option<i64>,
    pub episode_type: String,
    pub explicit: bool,
    pub description: String,
    pub pub_date: i64,
    pub keywords: String,
    pub cover_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
}

// ============================================================================
// Refresh Writes
// ============================================================================

/// Terminal bookkeeping for every refresh that does not rewrite the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshStatus {
    pub result: FeedResult,
    pub active: bool,
    pub errors: i64,
    /// `None` keeps the stored status.
    pub http_status: Option<i64>,
    pub update_interval: i64,
    pub parsed: i64,
}

/// Podcast row contents after a successful parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodcastUpdate {
    pub rss: String,
    pub title: String,
    pub link: Option<String>,
    pub description: String,
    pub owner: String,
    pub explicit: bool,
    pub cover_url: Option<String>,
    pub funding_url: Option<String>,
    pub funding_text: String,
    pub language: String,
    pub keywords: String,
    pub extracted_text: String,
    pub active: bool,
    pub content_hash: String,
    pub etag: Option<String>,
    pub modified: Option<i64>,
    pub parsed: i64,
    pub pub_date: Option<i64>,
    pub update_interval: i64,
}

/// Row counts from one episode reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EpisodeChanges {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
}
