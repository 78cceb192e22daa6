use anyhow::{bail, Result};

use super::schema::Database;
use super::types::Category;
use crate::util::strip_control_chars;

impl Database {
    // ========================================================================
    // Category Operations
    // ========================================================================

    /// SEC-014: Sanitize and validate a category name.
    ///
    /// Strips control characters, trims whitespace, and rejects
    /// empty/whitespace-only names.
    fn sanitize_category_name(name: &str) -> Result<String> {
        let sanitized = strip_control_chars(name);
        let trimmed = sanitized.trim();
        if trimmed.is_empty() {
            bail!("Category name cannot be empty or whitespace-only");
        }
        Ok(trimmed.to_owned())
    }

    /// Create a taxonomy category, returning its ID.
    ///
    /// Names are unique case-insensitively; creating "science" when
    /// "Science" exists fails.
    pub async fn create_category(&self, name: &str, parent_id: Option<i64>) -> Result<i64> {
        let clean_name = Self::sanitize_category_name(name)?;

        let row: (i64,) =
            sqlx::query_as("INSERT INTO categories (name, parent_id) VALUES (?, ?) RETURNING id")
                .bind(&clean_name)
                .bind(parent_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(row.0)
    }

    /// All categories ordered by name.
    pub async fn get_categories(&self) -> Result<Vec<Category>> {
        let categories = sqlx::query_as::<_, Category>(
            "SELECT id, name, parent_id FROM categories ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(categories)
    }

    /// Case-insensitive lookup by name.
    pub async fn get_category_by_name(&self, name: &str) -> Result<Option<Category>> {
        let category = sqlx::query_as::<_, Category>(
            "SELECT id, name, parent_id FROM categories WHERE name = ? COLLATE NOCASE",
        )
        .bind(name.trim())
        .fetch_optional(&self.pool)
        .await?;
        Ok(category)
    }

    /// Categories attached to a podcast, ordered by name.
    pub async fn get_podcast_categories(&self, podcast_id: i64) -> Result<Vec<Category>> {
        let categories = sqlx::query_as::<_, Category>(
            r#"
            SELECT c.id, c.name, c.parent_id
            FROM categories c
            JOIN podcast_categories pc ON pc.category_id = c.id
            WHERE pc.podcast_id = ?
            ORDER BY c.name
        "#,
        )
        .bind(podcast_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(categories)
    }
}
