use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::storage::{Category, Database};

/// Category table keyed by case-folded name.
pub type CategoryMap = HashMap<String, Category>;

/// Read-through cache of the category taxonomy.
///
/// Loaded on first use and shared read-only afterwards. Call
/// [`invalidate`](Self::invalidate) after editing categories; the next
/// [`get`](Self::get) reloads the whole table.
#[derive(Debug, Default)]
pub struct CategoryCache {
    inner: RwLock<Option<Arc<CategoryMap>>>,
}

impl CategoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, db: &Database) -> anyhow::Result<Arc<CategoryMap>> {
        if let Some(map) = self.inner.read().await.as_ref() {
            return Ok(Arc::clone(map));
        }

        let mut slot = self.inner.write().await;
        // Another task may have loaded it while we waited for the write lock.
        if let Some(map) = slot.as_ref() {
            return Ok(Arc::clone(map));
        }

        let categories = db.get_categories().await?;
        tracing::debug!(count = categories.len(), "Loaded category cache");
        let map: CategoryMap = categories
            .into_iter()
            .map(|c| (casefold(&c.name), c))
            .collect();
        let map = Arc::new(map);
        *slot = Some(Arc::clone(&map));
        Ok(map)
    }

    pub async fn invalidate(&self) {
        *self.inner.write().await = None;
    }

    pub async fn is_loaded(&self) -> bool {
        self.inner.read().await.is_some()
    }
}

/// Feed category strings split into known categories and free-text keywords.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryMatch {
    pub categories: Vec<Category>,
    /// Unmatched names, space separated, in feed order.
    pub keywords: String,
}

impl CategoryMatch {
    pub fn ids(&self) -> Vec<i64> {
        self.categories.iter().map(|c| c.id).collect()
    }
}

/// Match feed-declared category names against the taxonomy, ignoring case.
/// Repeated names are considered once.
pub fn extract_categories(names: &[String], known: &CategoryMap) -> CategoryMatch {
    let mut seen = HashSet::new();
    let mut categories = Vec::new();
    let mut keywords = Vec::new();

    for name in names {
        let folded = casefold(name);
        if folded.is_empty() || !seen.insert(folded.clone()) {
            continue;
        }
        match known.get(&folded) {
            Some(category) => categories.push(category.clone()),
            None => keywords.push(folded),
        }
    }

    CategoryMatch {
        categories,
        keywords: keywords.join(" "),
    }
}

fn casefold(name: &str) -> String {
    name.trim().to_lowercase()
}
