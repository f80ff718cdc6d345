use crate::db::ArticleStore;
use crate::models::{ArticleId, ArticleRecord, CanonicalUrl};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Gatekeeper between the crawler and the article store.
///
/// Keeps the set of IDs already in the store in memory. The membership check
/// and the insert happen under one lock, so concurrent workers can never both
/// store the same canonical URL.
pub struct ArticleRegistry {
    /// Backing document store
    store: Arc<dyn ArticleStore>,
    /// IDs known to exist in the store
    known: Mutex<HashSet<ArticleId>>,
}

impl ArticleRegistry {
    /// Load the known IDs from the store
    pub fn load(store: Arc<dyn ArticleStore>) -> Result<Self> {
        let ids = store.ids().context("Failed to load existing article IDs")?;
        info!("Loaded {} existing article ID(s)", ids.len());
        Ok(Self {
            store,
            known: Mutex::new(ids.into_iter().collect()),
        })
    }

    fn known(&self) -> MutexGuard<'_, HashSet<ArticleId>> {
        // The set is only ever changed by single inserts, so a poisoned guard is still consistent.
        self.known.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether no article with this canonical URL has been stored
    pub fn is_new(&self, url: &CanonicalUrl) -> bool {
        !self.known().contains(&url.article_id())
    }

    /// Number of articles known to the registry
    pub fn known_count(&self) -> usize {
        self.known().len()
    }

    /// Store a new, unprocessed article.
    ///
    /// Returns `Ok(true)` when this call created the record and `Ok(false)`
    /// when the article already existed. A failed insert leaves the ID unknown
    /// so a later attempt can retry it.
    pub fn store(&self, title: &str, url: &CanonicalUrl, content: &str) -> Result<bool> {
        let id = url.article_id();
        let mut known = self.known();

        if known.contains(&id) {
            debug!("Already stored, skipping: {}", url);
            return Ok(false);
        }

        let record = ArticleRecord::new(title, url.clone(), content);
        self.store
            .insert(&record)
            .with_context(|| format!("Error storing report {} from {}", title, url))?;
        known.insert(id);

        info!("Stored: {} → {}", title, url);
        Ok(true)
    }

    /// Articles still waiting for the downstream pipeline
    pub fn fetch_unprocessed(&self) -> Result<Vec<ArticleRecord>> {
        self.store
            .find_by_processed(false)
            .context("Failed to load unprocessed articles")
    }

    /// Articles the downstream pipeline has already handled
    pub fn fetch_processed(&self) -> Result<Vec<ArticleRecord>> {
        self.store
            .find_by_processed(true)
            .context("Failed to load processed articles")
    }

    /// Flag an article as processed. Returns `Ok(false)` if the ID is unknown.
    pub fn mark_processed(&self, id: &ArticleId) -> Result<bool> {
        let Some(mut record) = self.store.get(id)? else {
            warn!("Article {} not found, nothing to mark", id);
            return Ok(false);
        };

        record.processed = true;
        self.store
            .upsert(&record)
            .with_context(|| format!("Failed to mark article {} as processed", id))?;
        info!("Article {} marked as processed", id);
        Ok(true)
    }
}
