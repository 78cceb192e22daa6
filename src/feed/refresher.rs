use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::categories::{extract_categories, CategoryCache, CategoryMatch};
use super::fetcher::{conditional_headers, fetch_feed, FetchOutcome, FetchedFeed, HttpSettings};
use super::hasher::make_content_hash;
use super::models::Feed;
use super::rss_parser::parse_rss;
use crate::scheduler::{
    calculate_update_interval, increment_update_interval, podcasts_due_for_refresh, reschedule,
    SchedulerSettings,
};
use crate::storage::{Database, EpisodeChanges, FeedResult, Podcast, PodcastUpdate, RefreshStatus};
use crate::util::{StopwordTokenizer, Tokenizer};

/// Item titles that contribute to a podcast's search text.
const TEXT_ITEM_TITLES: usize = 6;

/// Infrastructure failures. Nothing is written for the podcast when one of
/// these is returned.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("podcast {0} not found")]
    NotFound(i64),

    #[error("database error: {0:#}")]
    Database(#[from] anyhow::Error),
}

/// Terminal state of one refresh attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshOutcome {
    Success,
    NotModified,
    Duplicate,
    /// Permanent client error such as 404 or 410.
    Inaccessible,
    HttpError,
    NetworkError,
    RssParseError,
}

impl RefreshOutcome {
    /// Stored `result` value. Inaccessible feeds are recorded as HTTP errors.
    pub fn feed_result(self) -> FeedResult {
        match self {
            RefreshOutcome::Success => FeedResult::Success,
            RefreshOutcome::NotModified => FeedResult::NotModified,
            RefreshOutcome::Duplicate => FeedResult::Duplicate,
            RefreshOutcome::Inaccessible | RefreshOutcome::HttpError => FeedResult::HttpError,
            RefreshOutcome::NetworkError => FeedResult::NetworkError,
            RefreshOutcome::RssParseError => FeedResult::RssParseError,
        }
    }

    /// Outcomes that count towards the consecutive-error ceiling.
    fn is_transient_error(self) -> bool {
        matches!(
            self,
            RefreshOutcome::HttpError | RefreshOutcome::NetworkError | RefreshOutcome::RssParseError
        )
    }

    /// Outcomes that retire the podcast regardless of its error count.
    fn deactivates(self) -> bool {
        matches!(self, RefreshOutcome::Duplicate | RefreshOutcome::Inaccessible)
    }
}

impl std::fmt::Display for RefreshOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RefreshOutcome::Inaccessible => "inaccessible",
            other => other.feed_result().as_str(),
        };
        f.write_str(name)
    }
}

/// What one refresh wrote to the podcast row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub outcome: RefreshOutcome,
    pub active: bool,
    pub errors: i64,
    pub http_status: Option<u16>,
    pub update_interval_secs: i64,
    pub episodes: EpisodeChanges,
}

/// Per-podcast result of a refresh cycle.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub podcast_id: i64,
    pub rss: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<RefreshSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RefreshSettings {
    pub http: HttpSettings,
    pub scheduler: SchedulerSettings,
    /// Podcasts are deactivated once `errors` reaches this.
    pub max_consecutive_errors: i64,
    pub workers: usize,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            http: HttpSettings::default(),
            scheduler: SchedulerSettings::default(),
            max_consecutive_errors: 12,
            workers: 8,
        }
    }
}

/// Keyed mutex: at most one refresh per podcast id at a time.
#[derive(Debug, Default)]
struct PodcastLocks {
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl PodcastLocks {
    async fn acquire(&self, podcast_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.locks.lock().await;
            map.entry(podcast_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Forget the lock for `podcast_id` unless another refresh holds or
    /// awaits it.
    async fn release(&self, podcast_id: i64) {
        let mut map = self.locks.lock().await;
        if map
            .get(&podcast_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(&podcast_id);
        }
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}

/// True when `err` came from a UNIQUE constraint, e.g. another podcast
/// claimed the same feed URL between the duplicate check and the write.
fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<sqlx::Error>()
            .and_then(sqlx::Error::as_database_error)
            .is_some_and(|db| db.is_unique_violation())
    })
}

/// Drives the fetch, parse and reconcile cycle for podcasts.
///
/// Cheap to clone; clones share the HTTP client, category cache and
/// per-podcast locks.
#[derive(Clone)]
pub struct FeedRefresher {
    db: Database,
    client: reqwest::Client,
    settings: Arc<RefreshSettings>,
    categories: Arc<CategoryCache>,
    tokenizer: Arc<dyn Tokenizer>,
    locks: Arc<PodcastLocks>,
}

impl FeedRefresher {
    pub fn new(db: Database, client: reqwest::Client, settings: RefreshSettings) -> Self {
        Self {
            db,
            client,
            settings: Arc::new(settings),
            categories: Arc::new(CategoryCache::new()),
            tokenizer: Arc::new(StopwordTokenizer::new()),
            locks: Arc::new(PodcastLocks::default()),
        }
    }

    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn with_category_cache(mut self, cache: Arc<CategoryCache>) -> Self {
        self.categories = cache;
        self
    }

    pub fn category_cache(&self) -> &Arc<CategoryCache> {
        &self.categories
    }

    /// Refresh every due podcast, `settings.workers` at a time.
    ///
    /// Podcasts enter the pool in priority order; reports come back in
    /// completion order.
    pub async fn refresh_due(&self, limit: i64) -> Result<Vec<RefreshReport>, RefreshError> {
        let due =
            podcasts_due_for_refresh(&self.db, &self.settings.scheduler, Utc::now(), limit).await?;
        tracing::info!(count = due.len(), limit, "Refreshing due podcasts");

        let reports: Vec<RefreshReport> = stream::iter(due)
            .map(|podcast| {
                let refresher = self.clone();
                async move {
                    let result = refresher.refresh(podcast.id).await;
                    let (summary, error) = match result {
                        Ok(summary) => (Some(summary), None),
                        Err(e) => {
                            tracing::warn!(podcast_id = podcast.id, error = %e, "Refresh failed");
                            (None, Some(e.to_string()))
                        }
                    };
                    RefreshReport {
                        podcast_id: podcast.id,
                        rss: podcast.rss,
                        summary,
                        error,
                    }
                }
            })
            .buffer_unordered(self.settings.workers.max(1))
            .collect()
            .await;

        let succeeded = reports
            .iter()
            .filter(|r| matches!(&r.summary, Some(s) if s.outcome == RefreshOutcome::Success))
            .count();
        tracing::info!(total = reports.len(), succeeded, "Refresh cycle complete");

        Ok(reports)
    }

    /// Fetch one podcast and record the outcome.
    ///
    /// Every terminal outcome, success or not, updates the podcast row
    /// exactly once.
    pub async fn refresh(&self, podcast_id: i64) -> Result<RefreshSummary, RefreshError> {
        let guard = self.locks.acquire(podcast_id).await;
        let result = self.refresh_locked(podcast_id).await;
        drop(guard);
        self.locks.release(podcast_id).await;
        result
    }

    async fn refresh_locked(&self, podcast_id: i64) -> Result<RefreshSummary, RefreshError> {
        let podcast = self
            .db
            .get_podcast(podcast_id)
            .await?
            .ok_or(RefreshError::NotFound(podcast_id))?;
        let now = Utc::now();

        let headers = conditional_headers(podcast.etag.as_deref(), podcast.modified_utc());
        tracing::debug!(
            podcast_id,
            rss = %podcast.rss,
            conditional = !headers.is_empty(),
            "Fetching feed"
        );

        let summary = match fetch_feed(&self.client, &podcast.rss, headers, &self.settings.http).await
        {
            FetchOutcome::Fetched(fetched) => self.process(&podcast, fetched, now).await?,
            FetchOutcome::NotModified { status } => {
                self.record(&podcast, RefreshOutcome::NotModified, Some(status), now)
                    .await?
            }
            FetchOutcome::Inaccessible { status } => {
                self.record(&podcast, RefreshOutcome::Inaccessible, Some(status), now)
                    .await?
            }
            FetchOutcome::HttpError { status } => {
                self.record(&podcast, RefreshOutcome::HttpError, Some(status), now)
                    .await?
            }
            FetchOutcome::NetworkError(e) => {
                tracing::warn!(podcast_id, rss = %podcast.rss, error = %e, "Feed fetch failed");
                self.record(&podcast, RefreshOutcome::NetworkError, None, now)
                    .await?
            }
        };

        tracing::info!(
            podcast_id,
            outcome = %summary.outcome,
            active = summary.active,
            errors = summary.errors,
            inserted = summary.episodes.inserted,
            updated = summary.episodes.updated,
            deleted = summary.episodes.deleted,
            "Podcast refreshed"
        );
        if podcast.active && !summary.active {
            tracing::warn!(podcast_id, outcome = %summary.outcome, "Podcast deactivated");
        }

        Ok(summary)
    }

    async fn process(
        &self,
        podcast: &Podcast,
        fetched: FetchedFeed,
        now: DateTime<Utc>,
    ) -> Result<RefreshSummary, RefreshError> {
        let content_hash = make_content_hash(&fetched.content);

        if podcast.content_hash.as_deref() == Some(content_hash.as_str()) {
            return self
                .record(podcast, RefreshOutcome::NotModified, None, now)
                .await;
        }

        if self
            .db
            .duplicate_exists(podcast.id, &fetched.url, &content_hash)
            .await?
        {
            tracing::debug!(podcast_id = podcast.id, url = %fetched.url, "Feed already tracked elsewhere");
            return self.record(podcast, RefreshOutcome::Duplicate, None, now).await;
        }

        let feed = match parse_rss(&fetched.content) {
            Ok(feed) => feed,
            Err(e) => {
                tracing::warn!(podcast_id = podcast.id, error = %e, "Feed could not be parsed");
                return self
                    .record(podcast, RefreshOutcome::RssParseError, None, now)
                    .await;
            }
        };

        let known = self.categories.get(&self.db).await?;
        let matched = extract_categories(&feed.categories, &known);
        let update_interval = self.schedule(&feed, now);

        let update = PodcastUpdate {
            extracted_text: self.extract_text(&feed, &matched),
            keywords: matched.keywords.clone(),
            rss: fetched.url,
            title: feed.title.clone(),
            link: feed.link.clone(),
            description: feed.description.clone(),
            owner: feed.owner.clone(),
            explicit: feed.explicit,
            cover_url: feed.cover_url.clone(),
            funding_url: feed.funding_url.clone(),
            funding_text: feed.funding_text.clone(),
            language: feed.language.clone(),
            active: !feed.complete,
            content_hash,
            etag: fetched.etag,
            modified: fetched.modified.map(|m| m.timestamp()),
            parsed: now.timestamp(),
            pub_date: feed.pub_date().or(podcast.pub_date_utc()).map(|d| d.timestamp()),
            update_interval: update_interval.num_seconds(),
        };

        let episodes = match self
            .db
            .complete_refresh(podcast.id, &update, &matched.ids(), &feed.items)
            .await
        {
            Ok(episodes) => episodes,
            Err(e) if is_unique_violation(&e) => {
                tracing::warn!(
                    podcast_id = podcast.id,
                    url = %update.rss,
                    error = %e,
                    "Feed URL claimed by another podcast during refresh"
                );
                return self.record(podcast, RefreshOutcome::Duplicate, None, now).await;
            }
            Err(e) => return Err(e.into()),
        };

        Ok(RefreshSummary {
            outcome: RefreshOutcome::Success,
            active: update.active,
            errors: 0,
            http_status: None,
            update_interval_secs: update.update_interval,
            episodes,
        })
    }

    /// Bookkeeping for every outcome that keeps the stored feed content.
    async fn record(
        &self,
        podcast: &Podcast,
        outcome: RefreshOutcome,
        http_status: Option<u16>,
        now: DateTime<Utc>,
    ) -> Result<RefreshSummary, RefreshError> {
        let errors = if outcome == RefreshOutcome::NotModified {
            0
        } else if outcome.is_transient_error() {
            podcast.errors + 1
        } else {
            podcast.errors
        };

        let active = podcast.active
            && !outcome.deactivates()
            && errors < self.settings.max_consecutive_errors;

        let scheduler = &self.settings.scheduler;
        let update_interval = if active {
            reschedule(
                podcast.pub_date_utc(),
                increment_update_interval(podcast.update_interval(), scheduler),
                now,
                scheduler,
            )
        } else {
            podcast.update_interval()
        };

        let status = RefreshStatus {
            result: outcome.feed_result(),
            active,
            errors,
            http_status: http_status.map(i64::from),
            update_interval: update_interval.num_seconds(),
            parsed: now.timestamp(),
        };
        self.db.record_refresh_status(podcast.id, &status).await?;

        Ok(RefreshSummary {
            outcome,
            active,
            errors,
            http_status,
            update_interval_secs: status.update_interval,
            episodes: EpisodeChanges::default(),
        })
    }

    fn schedule(&self, feed: &Feed, now: DateTime<Utc>) -> chrono::TimeDelta {
        let scheduler = &self.settings.scheduler;
        let pub_dates: Vec<DateTime<Utc>> = feed.items.iter().map(|item| item.pub_date).collect();
        reschedule(
            feed.pub_date(),
            calculate_update_interval(&pub_dates, now, scheduler),
            now,
            scheduler,
        )
    }

    /// Search text: podcast title, description, owner, matched category
    /// names and the first few episode titles, tokenized for the feed language.
    fn extract_text(&self, feed: &Feed, matched: &CategoryMatch) -> String {
        let mut text = vec![
            feed.title.as_str(),
            feed.description.as_str(),
            feed.owner.as_str(),
        ];
        text.extend(matched.categories.iter().map(|c| c.name.as_str()));
        text.extend(
            feed.items
                .iter()
                .take(TEXT_ITEM_TITLES)
                .map(|item| item.title.as_str()),
        );

        self.tokenizer
            .tokenize(&feed.language, &text.join(" "))
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::fetcher::build_client;
    use crate::storage::IN_MEMORY;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rss(items: &[(&str, &str)]) -> String {
        let items: String = items
            .iter()
            .enumerate()
            .map(|(i, (guid, title))| {
                format!(
                    r#"<item>
                        <guid>{guid}</guid>
                        <title>{title}</title>
                        <pubDate>{day:02} Jun 2020 10:00:00 GMT</pubDate>
                        <enclosure url="https://cdn.example.com/{guid}.mp3" type="audio/mpeg" length="1000"/>
                    </item>"#,
                    day = 28 - i
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0"?>
            <rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
                <channel>
                    <title>Orbital Mechanics Weekly</title>
                    <description>Rockets and the people who fly them</description>
                    <itunes:author>Jo Example</itunes:author>
                    <itunes:category text="Science"/>
                    <itunes:category text="Spaceflight"/>
                    {items}
                </channel>
            </rss>"#
        )
    }

    struct Harness {
        server: MockServer,
        db: Database,
        refresher: FeedRefresher,
    }

    async fn harness() -> Harness {
        let server = MockServer::start().await;
        let db = Database::open(IN_MEMORY).await.unwrap();
        let settings = RefreshSettings {
            http: HttpSettings {
                timeout: Duration::from_secs(5),
                ..HttpSettings::default()
            },
            ..RefreshSettings::default()
        };
        let client = build_client(&settings.http).unwrap();
        let refresher = FeedRefresher::new(db.clone(), client, settings);
        Harness {
            server,
            db,
            refresher,
        }
    }

    impl Harness {
        async fn podcast(&self, route: &str) -> i64 {
            self.db
                .insert_podcast(&format!("{}{route}", self.server.uri()), 0)
                .await
                .unwrap()
        }

        async fn serve(&self, route: &str, response: ResponseTemplate) {
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(response)
                .mount(&self.server)
                .await;
        }
    }

    #[tokio::test]
    async fn test_successful_refresh() {
        let h = harness().await;
        let science = h.db.create_category("Science", None).await.unwrap();
        let id = h.podcast("/feed").await;
        h.serve(
            "/feed",
            ResponseTemplate::new(200)
                .set_body_string(rss(&[("a", "Launch"), ("b", "Orbit"), ("c", "Landing")]))
                .insert_header("ETag", "\"v1\""),
        )
        .await;

        let summary = h.refresher.refresh(id).await.unwrap();
        assert_eq!(summary.outcome, RefreshOutcome::Success);
        assert_eq!(summary.episodes.inserted, 3);
        // Latest episode is years old, so the feed is treated as dormant.
        assert_eq!(summary.update_interval_secs, 14 * 86_400);

        let podcast = h.db.get_podcast(id).await.unwrap().unwrap();
        assert_eq!(podcast.title, "Orbital Mechanics Weekly");
        assert_eq!(podcast.owner, "Jo Example");
        assert_eq!(podcast.etag.as_deref(), Some("\"v1\""));
        assert_eq!(podcast.result, Some(FeedResult::Success));
        assert_eq!(podcast.keywords, "spaceflight");
        assert!(podcast.content_hash.is_some());
        assert!(podcast.parsed.is_some());
        assert!(podcast.active);
        assert!(podcast.extracted_text.contains("rockets"));
        assert!(podcast.extracted_text.contains("science"));
        assert!(podcast.extracted_text.contains("orbit"));

        let categories = h.db.get_podcast_categories(id).await.unwrap();
        assert_eq!(categories.iter().map(|c| c.id).collect::<Vec<_>>(), vec![science]);
        assert_eq!(h.db.get_episodes_for_podcast(id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_gone_feed_is_deactivated_without_counting_an_error() {
        let h = harness().await;
        let id = h.podcast("/gone").await;
        sqlx::query("UPDATE podcasts SET errors = 3 WHERE id = ?")
            .bind(id)
            .execute(&h.db.pool)
            .await
            .unwrap();
        h.serve("/gone", ResponseTemplate::new(410)).await;

        let summary = h.refresher.refresh(id).await.unwrap();
        assert_eq!(summary.outcome, RefreshOutcome::Inaccessible);

        let podcast = h.db.get_podcast(id).await.unwrap().unwrap();
        assert!(!podcast.active);
        assert_eq!(podcast.http_status, Some(410));
        assert_eq!(podcast.result, Some(FeedResult::HttpError));
        assert_eq!(podcast.errors, 3);
    }

    #[tokio::test]
    async fn test_redirect_to_tracked_feed_is_duplicate() {
        let h = harness().await;
        let existing = h.podcast("/feed").await;
        let moved = h.podcast("/old-feed").await;
        h.serve(
            "/old-feed",
            ResponseTemplate::new(301).insert_header("Location", format!("{}/feed", h.server.uri())),
        )
        .await;
        h.serve("/feed", ResponseTemplate::new(200).set_body_string(rss(&[("a", "One")])))
            .await;

        let summary = h.refresher.refresh(moved).await.unwrap();
        assert_eq!(summary.outcome, RefreshOutcome::Duplicate);

        let podcast = h.db.get_podcast(moved).await.unwrap().unwrap();
        assert!(!podcast.active);
        assert_eq!(podcast.rss, format!("{}/old-feed", h.server.uri()));
        assert_eq!(podcast.result, Some(FeedResult::Duplicate));
        assert!(h.db.get_episodes_for_podcast(moved).await.unwrap().is_empty());
        assert!(h.db.get_podcast(existing).await.unwrap().unwrap().active);
    }

    #[tokio::test]
    async fn test_redirect_to_new_location_updates_rss() {
        let h = harness().await;
        let id = h.podcast("/old").await;
        h.serve(
            "/old",
            ResponseTemplate::new(308).insert_header("Location", format!("{}/new", h.server.uri())),
        )
        .await;
        h.serve("/new", ResponseTemplate::new(200).set_body_string(rss(&[("a", "One")])))
            .await;

        let summary = h.refresher.refresh(id).await.unwrap();
        assert_eq!(summary.outcome, RefreshOutcome::Success);
        let podcast = h.db.get_podcast(id).await.unwrap().unwrap();
        assert_eq!(podcast.rss, format!("{}/new", h.server.uri()));
    }

    #[tokio::test]
    async fn test_repeated_guid_keeps_first_occurrence() {
        let h = harness().await;
        let id = h.podcast("/feed").await;
        let mut items: Vec<(String, String)> = (0..19)
            .map(|i| (format!("guid-{i}"), format!("Episode {i}")))
            .collect();
        items.insert(5, ("guid-3".to_owned(), "Second copy".to_owned()));
        let items: Vec<(&str, &str)> = items.iter().map(|(g, t)| (g.as_str(), t.as_str())).collect();
        h.serve("/feed", ResponseTemplate::new(200).set_body_string(rss(&items)))
            .await;

        h.refresher.refresh(id).await.unwrap();

        let episodes = h.db.get_episodes_for_podcast(id).await.unwrap();
        assert_eq!(episodes.len(), 19);
        let repeated: Vec<_> = episodes.iter().filter(|e| e.guid == "guid-3").collect();
        assert_eq!(repeated.len(), 1);
        assert_eq!(repeated[0].title, "Episode 3");
    }

    #[tokio::test]
    async fn test_unchanged_content_is_not_modified() {
        let h = harness().await;
        let id = h.podcast("/feed").await;
        h.serve("/feed", ResponseTemplate::new(200).set_body_string(rss(&[("a", "One"), ("b", "Two")])))
            .await;

        h.refresher.refresh(id).await.unwrap();
        let first = h.db.get_podcast(id).await.unwrap().unwrap();
        let episodes_before = h.db.get_episodes_for_podcast(id).await.unwrap();

        sqlx::query("UPDATE podcasts SET errors = 2, parsed = 0 WHERE id = ?")
            .bind(id)
            .execute(&h.db.pool)
            .await
            .unwrap();

        let summary = h.refresher.refresh(id).await.unwrap();
        assert_eq!(summary.outcome, RefreshOutcome::NotModified);
        assert_eq!(summary.episodes, EpisodeChanges::default());

        let second = h.db.get_podcast(id).await.unwrap().unwrap();
        assert_eq!(second.errors, 0);
        assert!(second.parsed.unwrap() > 0);
        assert_eq!(second.result, Some(FeedResult::NotModified));
        assert_eq!(second.content_hash, first.content_hash);
        assert_eq!(h.db.get_episodes_for_podcast(id).await.unwrap(), episodes_before);
    }

    #[tokio::test]
    async fn test_same_content_as_other_podcast_is_duplicate() {
        let h = harness().await;
        let body = rss(&[("a", "One")]);
        let first = h.podcast("/a").await;
        let second = h.podcast("/b").await;
        h.serve("/a", ResponseTemplate::new(200).set_body_string(body.clone()))
            .await;
        h.serve("/b", ResponseTemplate::new(200).set_body_string(body))
            .await;

        assert_eq!(
            h.refresher.refresh(first).await.unwrap().outcome,
            RefreshOutcome::Success
        );
        assert_eq!(
            h.refresher.refresh(second).await.unwrap().outcome,
            RefreshOutcome::Duplicate
        );
    }

    #[tokio::test]
    async fn test_server_errors_accumulate_until_deactivation() {
        let h = harness().await;
        let id = h.podcast("/flaky").await;
        sqlx::query("UPDATE podcasts SET errors = 10 WHERE id = ?")
            .bind(id)
            .execute(&h.db.pool)
            .await
            .unwrap();
        h.serve("/flaky", ResponseTemplate::new(503)).await;

        let summary = h.refresher.refresh(id).await.unwrap();
        assert_eq!(summary.outcome, RefreshOutcome::HttpError);
        assert_eq!(summary.errors, 11);
        assert!(summary.active);
        assert_eq!(summary.update_interval_secs, 86_400 + 8_640);

        let summary = h.refresher.refresh(id).await.unwrap();
        assert_eq!(summary.errors, 12);
        assert!(!summary.active);

        let podcast = h.db.get_podcast(id).await.unwrap().unwrap();
        assert_eq!(podcast.http_status, Some(503));
        assert_eq!(podcast.result, Some(FeedResult::HttpError));
    }

    #[tokio::test]
    async fn test_timeout_counts_network_error_and_keeps_status() {
        let h = harness().await;
        let id = h.podcast("/slow").await;
        sqlx::query("UPDATE podcasts SET errors = 2, http_status = 503 WHERE id = ?")
            .bind(id)
            .execute(&h.db.pool)
            .await
            .unwrap();
        h.serve(
            "/slow",
            ResponseTemplate::new(200)
                .set_body_string(rss(&[("a", "One")]))
                .set_delay(Duration::from_secs(10)),
        )
        .await;

        let settings = RefreshSettings {
            http: HttpSettings {
                timeout: Duration::from_millis(200),
                ..HttpSettings::default()
            },
            ..RefreshSettings::default()
        };
        let client = build_client(&settings.http).unwrap();
        let refresher = FeedRefresher::new(h.db.clone(), client, settings);

        let summary = refresher.refresh(id).await.unwrap();
        assert_eq!(summary.outcome, RefreshOutcome::NetworkError);
        assert_eq!(summary.errors, 3);
        assert_eq!(summary.http_status, None);
        assert!(summary.active);
        assert_eq!(summary.episodes, EpisodeChanges::default());

        let podcast = h.db.get_podcast(id).await.unwrap().unwrap();
        assert_eq!(podcast.result, Some(FeedResult::NetworkError));
        assert_eq!(podcast.errors, 3);
        assert_eq!(podcast.http_status, Some(503));
        assert!(podcast.active);
        assert!(podcast.parsed.is_some());
        assert!(podcast.content_hash.is_none());
    }

    #[tokio::test]
    async fn test_rate_limited_is_transient() {
        let h = harness().await;
        let id = h.podcast("/busy").await;
        h.serve("/busy", ResponseTemplate::new(429)).await;

        let summary = h.refresher.refresh(id).await.unwrap();
        assert_eq!(summary.outcome, RefreshOutcome::HttpError);
        assert_eq!(summary.errors, 1);
        assert!(summary.active);
    }

    #[tokio::test]
    async fn test_unparseable_feed_counts_error() {
        let h = harness().await;
        let id = h.podcast("/broken").await;
        h.serve("/broken", ResponseTemplate::new(200).set_body_string("<html><body>nope</body></html>"))
            .await;

        let summary = h.refresher.refresh(id).await.unwrap();
        assert_eq!(summary.outcome, RefreshOutcome::RssParseError);
        assert_eq!(summary.errors, 1);

        let podcast = h.db.get_podcast(id).await.unwrap().unwrap();
        assert_eq!(podcast.result, Some(FeedResult::RssParseError));
        assert!(podcast.content_hash.is_none());
    }

    #[tokio::test]
    async fn test_complete_feed_is_updated_then_deactivated() {
        let h = harness().await;
        let id = h.podcast("/done").await;
        let body = rss(&[("a", "Finale")]).replace(
            "<title>Orbital Mechanics Weekly</title>",
            "<title>Orbital Mechanics Weekly</title><itunes:complete>Yes</itunes:complete>",
        );
        h.serve("/done", ResponseTemplate::new(200).set_body_string(body))
            .await;

        let summary = h.refresher.refresh(id).await.unwrap();
        assert_eq!(summary.outcome, RefreshOutcome::Success);
        assert!(!summary.active);
        assert_eq!(h.db.get_episodes_for_podcast(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_podcast() {
        let h = harness().await;
        assert!(matches!(
            h.refresher.refresh(42).await,
            Err(RefreshError::NotFound(42))
        ));
    }

    #[tokio::test]
    async fn test_refresh_due_processes_each_podcast_once() {
        let h = harness().await;
        let ok = h.podcast("/ok").await;
        let missing = h.podcast("/missing").await;
        h.serve("/ok", ResponseTemplate::new(200).set_body_string(rss(&[("a", "One")])))
            .await;
        h.serve("/missing", ResponseTemplate::new(404)).await;

        let mut reports = h.refresher.refresh_due(10).await.unwrap();
        reports.sort_by_key(|r| r.podcast_id);

        let outcomes: Vec<_> = reports
            .iter()
            .map(|r| (r.podcast_id, r.summary.as_ref().map(|s| s.outcome)))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                (ok, Some(RefreshOutcome::Success)),
                (missing, Some(RefreshOutcome::Inaccessible)),
            ]
        );

        // The inactive podcast drops out; the fresh one is not due yet.
        let again = h.refresher.refresh_due(10).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_url_claimed_mid_refresh_is_duplicate() {
        let h = harness().await;
        let id = h.podcast("/old").await;
        let target = format!("{}/new", h.server.uri());
        h.serve(
            "/old",
            ResponseTemplate::new(308).insert_header("Location", target.as_str()),
        )
        .await;
        h.serve("/new", ResponseTemplate::new(200).set_body_string(rss(&[("a", "One")])))
            .await;

        // Another writer inserts the redirect target just before the row moves.
        sqlx::query(
            r#"
            CREATE TRIGGER claim_rss BEFORE UPDATE OF rss ON podcasts
            WHEN NEW.rss != OLD.rss
            BEGIN
                INSERT INTO podcasts (rss, created) VALUES (NEW.rss, 0);
            END
        "#,
        )
        .execute(&h.db.pool)
        .await
        .unwrap();

        let summary = h.refresher.refresh(id).await.unwrap();
        assert_eq!(summary.outcome, RefreshOutcome::Duplicate);
        assert!(!summary.active);

        let podcast = h.db.get_podcast(id).await.unwrap().unwrap();
        assert_eq!(podcast.result, Some(FeedResult::Duplicate));
        assert!(!podcast.active);
        assert_eq!(podcast.rss, format!("{}/old", h.server.uri()));
        assert!(h.db.get_episodes_for_podcast(id).await.unwrap().is_empty());
        assert!(h.db.get_podcast_by_rss(&target).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unique_violation_is_recognized() {
        let db = Database::open(IN_MEMORY).await.unwrap();
        db.insert_podcast("https://feeds.example.com/a.xml", 0)
            .await
            .unwrap();
        let err: anyhow::Error = sqlx::query("INSERT INTO podcasts (rss, created) VALUES (?, 0)")
            .bind("https://feeds.example.com/a.xml")
            .execute(&db.pool)
            .await
            .unwrap_err()
            .into();
        assert!(is_unique_violation(&err));
        assert!(is_unique_violation(&err.context("while updating podcast")));
        assert!(!is_unique_violation(&anyhow::anyhow!("disk full")));
    }

    #[tokio::test]
    async fn test_locks_are_released_after_refresh() {
        let h = harness().await;
        let ok = h.podcast("/ok").await;
        let gone = h.podcast("/gone").await;
        h.serve("/ok", ResponseTemplate::new(200).set_body_string(rss(&[("a", "One")])))
            .await;
        h.serve("/gone", ResponseTemplate::new(404)).await;

        h.refresher.refresh(ok).await.unwrap();
        h.refresher.refresh(gone).await.unwrap();
        assert!(h.refresher.refresh(999).await.is_err());
        let (a, b) = tokio::join!(h.refresher.refresh(ok), h.refresher.refresh(ok));
        a.unwrap();
        b.unwrap();

        assert_eq!(h.refresher.locks.len().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_of_same_podcast_serialize() {
        let h = harness().await;
        let id = h.podcast("/feed").await;
        h.serve("/feed", ResponseTemplate::new(200).set_body_string(rss(&[("a", "One"), ("b", "Two")])))
            .await;

        let (a, b) = tokio::join!(h.refresher.refresh(id), h.refresher.refresh(id));
        let mut outcomes = vec![a.unwrap().outcome, b.unwrap().outcome];
        outcomes.sort_by_key(|o| o.to_string());

        assert_eq!(outcomes, vec![RefreshOutcome::NotModified, RefreshOutcome::Success]);
        assert_eq!(h.db.get_episodes_for_podcast(id).await.unwrap().len(), 2);
    }
}
