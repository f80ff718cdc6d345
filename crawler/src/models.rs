use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A URL with its fragment removed.
///
/// Case, trailing slashes and query parameter order are left untouched, so
/// `https://x/a/` and `https://x/a` are still distinct articles.
///
/// Links found while crawling are resolved against their page first (see
/// `classify::resolve_link`). URL parsing lowercases the scheme and host and
/// drops a default port at that step, so `HTTPS://Site.Example:443/A` and
/// `https://site.example/A` end up as the same article. The path keeps its case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalUrl(String);

impl CanonicalUrl {
    /// Borrow the canonical URL as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compute the storage identity of this URL
    pub fn article_id(&self) -> ArticleId {
        ArticleId::from_canonical(self)
    }
}

impl fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Strip the fragment (everything from the first `#`) off a URL.
pub fn canonicalize(url: &str) -> CanonicalUrl {
    let without_fragment = match url.find('#') {
        Some(idx) => &url[..idx],
        None => url,
    };
    CanonicalUrl(without_fragment.to_string())
}

/// Deterministic fingerprint of a canonical URL, used as the primary key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArticleId(String);

impl ArticleId {
    /// Hex-encoded SHA-256 of the canonical URL
    pub fn from_canonical(url: &CanonicalUrl) -> Self {
        let digest = Sha256::digest(url.as_str().as_bytes());
        Self(format!("{:x}", digest))
    }

    /// Wrap an ID that was read back from storage or passed in by a caller
    pub fn from_raw(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored article
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    /// Storage key derived from the canonical URL
    pub id: ArticleId,

    /// Title taken from the link text or the page's `<title>`
    pub title: String,

    /// Canonical URL of the article
    pub url: CanonicalUrl,

    /// Extracted body text (falls back to the title when extraction finds nothing)
    pub content: String,

    /// Whether the downstream pipeline has handled this article
    pub processed: bool,

    /// When the crawler first stored the article
    pub stored_at: DateTime<Utc>,
}

impl ArticleRecord {
    /// Create a fresh, unprocessed record for a canonical URL
    pub fn new(title: &str, url: CanonicalUrl, content: &str) -> Self {
        Self {
            id: url.article_id(),
            title: title.to_string(),
            url,
            content: content.to_string(),
            processed: false,
            stored_at: Utc::now(),
        }
    }

    /// Shape handed to the downstream evaluation pipeline
    pub fn to_document(&self) -> ArticleDocument {
        ArticleDocument {
            id: self.id.clone(),
            content: self.content.clone(),
            metadata: ArticleMetadata {
                title: self.title.clone(),
                url: self.url.clone(),
                processed: self.processed,
            },
        }
    }
}

/// `{id, content, metadata}` document read by downstream consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleDocument {
    pub id: ArticleId,
    pub content: String,
    pub metadata: ArticleMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleMetadata {
    pub title: String,
    pub url: CanonicalUrl,
    pub processed: bool,
}

/// How far a listing page got before the worker stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageStatus {
    /// robots.txt forbids the page
    Denied,

    /// Non-200 response or the fetch ran out of retries
    FetchFailed,

    /// Links were processed and pagination was resolved
    Completed,

    /// The worker task failed unexpectedly
    Error,
}

impl fmt::Display for PageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageStatus::Denied => write!(f, "Denied"),
            PageStatus::FetchFailed => write!(f, "Fetch Failed"),
            PageStatus::Completed => write!(f, "Completed"),
            PageStatus::Error => write!(f, "Error"),
        }
    }
}

/// Result of scraping one listing page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageOutcome {
    /// Listing page URL
    pub url: String,

    /// Terminal state of the page worker
    pub status: PageStatus,

    /// Articles this page caused to be stored
    pub articles_stored: usize,

    /// Pagination link discovered on the page
    pub next_page: Option<String>,
}

impl PageOutcome {
    /// Outcome for a page that stopped before any links were processed
    pub fn stopped(url: &str, status: PageStatus) -> Self {
        Self {
            url: url.to_string(),
            status,
            articles_stored: 0,
            next_page: None,
        }
    }
}

/// Summary of a full crawl run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlSummary {
    /// Number of listing pages dispatched
    pub pages_visited: usize,

    /// Number of waves the orchestrator ran
    pub waves: usize,

    /// Total articles stored across all pages
    pub articles_stored: usize,

    /// Per-page outcomes in completion order
    pub pages: Vec<PageOutcome>,
}

impl CrawlSummary {
    /// Record a finished page
    pub fn add_page(&mut self, page: PageOutcome) {
        self.articles_stored += page.articles_stored;
        self.pages_visited += 1;
        self.pages.push(page);
    }
}
