use anyhow::Result;
use chrono::TimeDelta;

use super::schema::Database;
use super::types::{Podcast, RefreshStatus};

/// Column list matching [`Podcast`]'s `FromRow` fields.
pub(crate) const PODCAST_COLUMNS: &str = "id, rss, title, link, description, owner, explicit, \
     cover_url, funding_url, funding_text, language, keywords, extracted_text, active, promoted, \
     content_hash, etag, modified, http_status, parsed, pub_date, errors, update_interval, \
     result, created";

/// Inputs to the due-for-refresh selection, all in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueWindow {
    pub now: i64,
    /// Subscribed or promoted podcasts are re-checked when last parsed before this.
    pub recent_cutoff: i64,
    /// Podcasts with a `pub_date` after this are on their adaptive schedule;
    /// anything not parsed since is swept regardless.
    pub dormant_cutoff: i64,
}

impl DueWindow {
    pub fn new(now: i64, recent: TimeDelta, dormant: TimeDelta) -> Self {
        Self {
            now,
            recent_cutoff: now - recent.num_seconds(),
            dormant_cutoff: now - dormant.num_seconds(),
        }
    }
}

impl Database {
    // ========================================================================
    // Podcast Operations
    // ========================================================================

    /// Track a new feed URL, returning its id. An already-tracked URL returns
    /// the existing id.
    pub async fn insert_podcast(&self, rss: &str, now: i64) -> Result<i64> {
        sqlx::query("INSERT OR IGNORE INTO podcasts (rss, created) VALUES (?, ?)")
            .bind(rss)
            .bind(now)
            .execute(&self.pool)
            .await?;

        let row: (i64,) = sqlx::query_as("SELECT id FROM podcasts WHERE rss = ?")
            .bind(rss)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    pub async fn get_podcast(&self, podcast_id: i64) -> Result<Option<Podcast>> {
        let podcast = sqlx::query_as::<_, Podcast>(&format!(
            "SELECT {PODCAST_COLUMNS} FROM podcasts WHERE id = ?"
        ))
        .bind(podcast_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(podcast)
    }

    pub async fn get_podcast_by_rss(&self, rss: &str) -> Result<Option<Podcast>> {
        let podcast = sqlx::query_as::<_, Podcast>(&format!(
            "SELECT {PODCAST_COLUMNS} FROM podcasts WHERE rss = ?"
        ))
        .bind(rss)
        .fetch_optional(&self.pool)
        .await?;
        Ok(podcast)
    }

    /// Returns `false` if no such podcast exists.
    pub async fn set_podcast_promoted(&self, podcast_id: i64, promoted: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE podcasts SET promoted = ? WHERE id = ?")
            .bind(promoted)
            .bind(podcast_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn add_subscription(&self, user_id: i64, podcast_id: i64) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO subscriptions (user_id, podcast_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(podcast_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Active podcasts due for a refresh, highest priority first.
    ///
    /// A podcast is due if it was never parsed, has no known `pub_date`, is
    /// subscribed or promoted and was not parsed since `recent_cutoff`, is on
    /// its adaptive schedule (`pub_date` after `dormant_cutoff`) with
    /// `pub_date + update_interval` already passed, or was not parsed since
    /// `dormant_cutoff` at all.
    ///
    /// Order: subscriber count, promoted, `parsed` (never first), `pub_date`
    /// (unknown first, then newest), newest created.
    pub async fn podcasts_due(&self, window: DueWindow, limit: i64) -> Result<Vec<Podcast>> {
        let sql = format!(
            r#"
            SELECT {PODCAST_COLUMNS} FROM (
                SELECT p.*,
                       (SELECT COUNT(*) FROM subscriptions s WHERE s.podcast_id = p.id) AS subscribers
                FROM podcasts p
                WHERE p.active = 1
            )
            WHERE parsed IS NULL
               OR pub_date IS NULL
               OR ((subscribers > 0 OR promoted = 1) AND parsed < ?)
               OR (pub_date >= ? AND pub_date + update_interval <= ?)
               OR parsed < ?
            ORDER BY subscribers DESC,
                     promoted DESC,
                     parsed ASC NULLS FIRST,
                     pub_date DESC NULLS FIRST,
                     created DESC
            LIMIT ?
        "#
        );

        let podcasts = sqlx::query_as::<_, Podcast>(&sql)
            .bind(window.recent_cutoff)
            .bind(window.dormant_cutoff)
            .bind(window.now)
            .bind(window.dormant_cutoff)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(podcasts)
    }

    /// Whether a podcast other than `podcast_id` already owns `url` or has
    /// stored exactly `content_hash`.
    pub async fn duplicate_exists(
        &self,
        podcast_id: i64,
        url: &str,
        content_hash: &str,
    ) -> Result<bool> {
        let row: (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM podcasts WHERE id != ? AND (rss = ? OR content_hash = ?))",
        )
        .bind(podcast_id)
        .bind(url)
        .bind(content_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    /// Single-statement terminal update for refreshes that keep the stored feed.
    pub async fn record_refresh_status(
        &self,
        podcast_id: i64,
        status: &RefreshStatus,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE podcasts SET
                result = ?,
                active = ?,
                errors = ?,
                http_status = COALESCE(?, http_status),
                update_interval = ?,
                parsed = ?
            WHERE id = ?
        "#,
        )
        .bind(status.result)
        .bind(status.active)
        .bind(status.errors)
        .bind(status.http_status)
        .bind(status.update_interval)
        .bind(status.parsed)
        .bind(podcast_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
