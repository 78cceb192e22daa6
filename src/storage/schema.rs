use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::DatabaseError;

/// Path that opens a private in-memory database.
pub const IN_MEMORY: &str = ":memory:";

// ============================================================================
// Database
// ============================================================================

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if the database file is locked
    /// by another process (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `DatabaseError::Migration` if the schema cannot be created.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // SEC-010: Create the database file with owner-only permissions
        #[cfg(unix)]
        if path != IN_MEMORY {
            use std::os::unix::fs::OpenOptionsExt;
            let db_path = std::path::Path::new(path);
            if !db_path.exists() && db_path.parent().is_some_and(|p| p.exists()) {
                let _file = std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(db_path)
                    .ok(); // If creation fails, SQLite will report the error at connect_with.
            }
        }

        // busy_timeout=5000 lets concurrent refresh transactions queue on the
        // write lock instead of failing with SQLITE_BUSY.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30));
        if path == IN_MEMORY {
            // The database lives inside one connection; it must never be recycled.
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            let error_string = e.to_string().to_lowercase();
            if error_string.contains("database is locked")
                || error_string.contains("database table is locked")
            {
                DatabaseError::InstanceLocked
            } else {
                DatabaseError::Migration(e.to_string())
            }
        })?;
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// Every statement uses `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS podcasts (
                id INTEGER PRIMARY KEY,
                rss TEXT UNIQUE NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                link TEXT,
                description TEXT NOT NULL DEFAULT '',
                owner TEXT NOT NULL DEFAULT '',
                explicit INTEGER NOT NULL DEFAULT 0,
                cover_url TEXT,
                funding_url TEXT,
                funding_text TEXT NOT NULL DEFAULT '',
                language TEXT NOT NULL DEFAULT 'en',
                keywords TEXT NOT NULL DEFAULT '',
                extracted_text TEXT NOT NULL DEFAULT '',
                active INTEGER NOT NULL DEFAULT 1,
                promoted INTEGER NOT NULL DEFAULT 0,
                content_hash TEXT,
                etag TEXT,
                modified INTEGER,
                http_status INTEGER,
                parsed INTEGER,
                pub_date INTEGER,
                errors INTEGER NOT NULL DEFAULT 0,
                update_interval INTEGER NOT NULL DEFAULT 86400,
                result TEXT,
                created INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS episodes (
                id INTEGER PRIMARY KEY,
                podcast_id INTEGER NOT NULL REFERENCES podcasts(id) ON DELETE CASCADE,
                guid TEXT NOT NULL,
                title TEXT NOT NULL,
                link TEXT,
                media_url TEXT NOT NULL,
                media_type TEXT NOT NULL DEFAULT '',
                length INTEGER,
                duration TEXT NOT NULL DEFAULT '',
                episode INTEGER,
                season INTEGER,
                episode_type TEXT NOT NULL DEFAULT 'full',
                explicit INTEGER NOT NULL DEFAULT 0,
                description TEXT NOT NULL DEFAULT '',
                pub_date INTEGER NOT NULL,
                keywords TEXT NOT NULL DEFAULT '',
                cover_url TEXT,
                UNIQUE(podcast_id, guid)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE COLLATE NOCASE,
                parent_id INTEGER REFERENCES categories(id) ON DELETE SET NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS podcast_categories (
                podcast_id INTEGER NOT NULL REFERENCES podcasts(id) ON DELETE CASCADE,
                category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
                PRIMARY KEY (podcast_id, category_id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscriptions (
                user_id INTEGER NOT NULL,
                podcast_id INTEGER NOT NULL REFERENCES podcasts(id) ON DELETE CASCADE,
                PRIMARY KEY (user_id, podcast_id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Recent publication dates per podcast, for interval calculation
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_episodes_podcast_pub_date ON episodes(podcast_id, pub_date DESC)",
        )
        .execute(&mut *tx)
        .await?;

        // Due-query filters
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_podcasts_active_parsed ON podcasts(active, parsed)",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_podcasts_content_hash ON podcasts(content_hash)")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_subscriptions_podcast ON subscriptions(podcast_id)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
