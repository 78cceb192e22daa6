use std::collections::{HashMap, HashSet};

use anyhow::Result;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::schema::Database;
use super::types::{Episode, EpisodeChanges, PodcastUpdate};
use crate::feed::Item;

/// Rows per multi-row statement. 17 columns * 50 = 850, under SQLite's 999
/// parameter limit.
const BATCH_SIZE: usize = 50;

impl Database {
    // ========================================================================
    // Episode Queries
    // ========================================================================

    /// Episodes of one podcast, newest first.
    pub async fn get_episodes_for_podcast(&self, podcast_id: i64) -> Result<Vec<Episode>> {
        let episodes = sqlx::query_as::<_, Episode>(
            r#"
            SELECT id, podcast_id, guid, title, link, media_url, media_type, length,
                   duration, episode, season, episode_type, explicit, description,
                   pub_date, keywords, cover_url
            FROM episodes
            WHERE podcast_id = ?
            ORDER BY pub_date DESC, id
        "#,
        )
        .bind(podcast_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(episodes)
    }

    // ========================================================================
    // Refresh Commit
    // ========================================================================

    /// Writes a successful refresh in one transaction: the podcast row, its
    /// category links and a full episode reconciliation against `items`.
    ///
    /// Either everything is committed or nothing is.
    pub async fn complete_refresh(
        &self,
        podcast_id: i64,
        update: &PodcastUpdate,
        category_ids: &[i64],
        items: &[Item],
    ) -> Result<EpisodeChanges> {
        let mut tx = self.pool.begin().await?;

        update_podcast_row(&mut tx, podcast_id, update).await?;
        replace_categories(&mut tx, podcast_id, category_ids).await?;
        let changes = reconcile_episodes(&mut tx, podcast_id, items).await?;

        tx.commit().await?;
        Ok(changes)
    }
}

async fn update_podcast_row(
    conn: &mut SqliteConnection,
    podcast_id: i64,
    update: &PodcastUpdate,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE podcasts SET
            rss = ?, title = ?, link = ?, description = ?, owner = ?, explicit = ?,
            cover_url = ?, funding_url = ?, funding_text = ?, language = ?,
            keywords = ?, extracted_text = ?, active = ?, content_hash = ?,
            etag = ?, modified = ?, parsed = ?, pub_date = ?, update_interval = ?,
            errors = 0, result = 'success'
        WHERE id = ?
    "#,
    )
    .bind(&update.rss)
    .bind(&update.title)
    .bind(&update.link)
    .bind(&update.description)
    .bind(&update.owner)
    .bind(update.explicit)
    .bind(&update.cover_url)
    .bind(&update.funding_url)
    .bind(&update.funding_text)
    .bind(&update.language)
    .bind(&update.keywords)
    .bind(&update.extracted_text)
    .bind(update.active)
    .bind(&update.content_hash)
    .bind(&update.etag)
    .bind(update.modified)
    .bind(update.parsed)
    .bind(update.pub_date)
    .bind(update.update_interval)
    .bind(podcast_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn replace_categories(
    conn: &mut SqliteConnection,
    podcast_id: i64,
    category_ids: &[i64],
) -> Result<()> {
    sqlx::query("DELETE FROM podcast_categories WHERE podcast_id = ?")
        .bind(podcast_id)
        .execute(&mut *conn)
        .await?;

    for chunk in category_ids.chunks(BATCH_SIZE) {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT OR IGNORE INTO podcast_categories (podcast_id, category_id) ");
        builder.push_values(chunk, |mut b, category_id| {
            b.push_bind(podcast_id).push_bind(*category_id);
        });
        builder.build().execute(&mut *conn).await?;
    }
    Ok(())
}

/// Makes the stored episode set match `items`, keyed by guid.
///
/// Stored episodes whose guid is gone are deleted. Each stored guid is
/// updated at most once, from its first occurrence in `items`. Unseen guids
/// are inserted; conflicting rows are ignored.
async fn reconcile_episodes(
    conn: &mut SqliteConnection,
    podcast_id: i64,
    items: &[Item],
) -> Result<EpisodeChanges> {
    let mut changes = EpisodeChanges::default();

    let existing: HashMap<String, i64> =
        sqlx::query_as::<_, (String, i64)>("SELECT guid, id FROM episodes WHERE podcast_id = ?")
            .bind(podcast_id)
            .fetch_all(&mut *conn)
            .await?
            .into_iter()
            .collect();

    let current: HashSet<&str> = items.iter().map(|item| item.guid.as_str()).collect();

    let stale: Vec<i64> = existing
        .iter()
        .filter(|(guid, _)| !current.contains(guid.as_str()))
        .map(|(_, id)| *id)
        .collect();

    for chunk in stale.chunks(BATCH_SIZE) {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM episodes WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in chunk {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
        changes.deleted += builder.build().execute(&mut *conn).await?.rows_affected();
    }

    // First occurrence of each guid wins, for updates and inserts alike.
    let mut seen: HashSet<&str> = HashSet::new();
    let mut inserts: Vec<&Item> = Vec::new();

    for item in items {
        if !seen.insert(item.guid.as_str()) {
            continue;
        }
        match existing.get(&item.guid) {
            Some(episode_id) => {
                changes.updated += update_episode(conn, *episode_id, item).await?;
            }
            None => inserts.push(item),
        }
    }

    for chunk in inserts.chunks(BATCH_SIZE) {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT OR IGNORE INTO episodes (podcast_id, guid, title, link, media_url, media_type, \
             length, duration, episode, season, episode_type, explicit, description, pub_date, \
             keywords, cover_url) ",
        );
        builder.push_values(chunk, |mut b, item| {
            b.push_bind(podcast_id)
                .push_bind(&item.guid)
                .push_bind(&item.title)
                .push_bind(&item.link)
                .push_bind(&item.media_url)
                .push_bind(&item.media_type)
                .push_bind(item.length)
                .push_bind(&item.duration)
                .push_bind(item.episode)
                .push_bind(item.season)
                .push_bind(&item.episode_type)
                .push_bind(item.explicit)
                .push_bind(&item.description)
                .push_bind(item.pub_date.timestamp())
                .push_bind(item.keywords())
                .push_bind(&item.cover_url);
        });
        changes.inserted += builder.build().execute(&mut *conn).await?.rows_affected();
    }

    Ok(changes)
}

async fn update_episode(conn: &mut SqliteConnection, episode_id: i64, item: &Item) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE episodes SET
            title = ?, link = ?, media_url = ?, media_type = ?, length = ?, duration = ?,
            episode = ?, season = ?, episode_type = ?, explicit = ?, description = ?,
            pub_date = ?, keywords = ?, cover_url = ?
        WHERE id = ?
    "#,
    )
    .bind(&item.title)
    .bind(&item.link)
    .bind(&item.media_url)
    .bind(&item.media_type)
    .bind(item.length)
    .bind(&item.duration)
    .bind(item.episode)
    .bind(item.season)
    .bind(&item.episode_type)
    .bind(item.explicit)
    .bind(&item.description)
    .bind(item.pub_date.timestamp())
    .bind(item.keywords())
    .bind(&item.cover_url)
    .bind(episode_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}
