use crate::classify::{self, PageLink};
use crate::config::CrawlerConfig;
use crate::db::ArticleStore;
use crate::extract::ContentExtractor;
use crate::fetch::{FetchClient, FetchOutcome};
use crate::models::{canonicalize, CrawlSummary, PageOutcome, PageStatus};
use crate::registry::ArticleRegistry;
use crate::robots::RobotsGuard;
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use url::Url;

/// Incremental article crawler.
///
/// Cloning is cheap: every clone shares the same HTTP clients, robots.txt
/// cache and article registry, which is how spawned workers get at them.
#[derive(Clone)]
pub struct Crawler {
    /// Crawl settings
    config: Arc<CrawlerConfig>,
    /// HTTP client with retry/backoff
    fetcher: FetchClient,
    /// Per-origin robots.txt policies
    robots: Arc<RobotsGuard>,
    /// Article body extraction
    extractor: ContentExtractor,
    /// Dedup set in front of the article store
    registry: Arc<ArticleRegistry>,
}

impl Crawler {
    /// Create a crawler over an article store; existing article IDs are loaded up front
    pub fn new(config: CrawlerConfig, store: Arc<dyn ArticleStore>) -> Result<Self> {
        config.validate().context("Invalid crawler configuration")?;

        let fetcher = FetchClient::new(&config)?;
        let robots = Arc::new(RobotsGuard::new(fetcher.clone(), &config.robots_agent));
        let extractor = ContentExtractor::new(fetcher.clone(), Arc::clone(&robots), config.use_headless);
        let registry = Arc::new(ArticleRegistry::load(store)?);

        Ok(Self {
            config: Arc::new(config),
            fetcher,
            robots,
            extractor,
            registry,
        })
    }

    /// The dedup gateway, also used by downstream consumers to list and mark articles
    pub fn registry(&self) -> &ArticleRegistry {
        &self.registry
    }

    /// Crawl from the configured start URL within the configured page budget
    pub async fn crawl(&self) -> CrawlSummary {
        let start_url = self.config.start_url.clone();
        self.crawl_from(&start_url, self.config.max_pages).await
    }

    /// Follow pagination from `start_url` in waves until the frontier runs dry
    /// or `max_pages` listing pages have been dispatched.
    ///
    /// Pages within a wave run concurrently; the next wave starts only once
    /// every page of the current one has finished.
    pub async fn crawl_from(&self, start_url: &str, max_pages: usize) -> CrawlSummary {
        let started = Instant::now();
        let mut summary = CrawlSummary::default();
        let mut visited: HashSet<String> = HashSet::new();
        let mut frontier = vec![start_url.to_string()];

        while !frontier.is_empty() && visited.len() < max_pages {
            let remaining = max_pages - visited.len();
            let mut wave = Vec::with_capacity(frontier.len().min(remaining));
            for url in frontier.drain(..) {
                if wave.len() >= remaining {
                    break;
                }
                if visited.insert(url.clone()) {
                    wave.push(url);
                }
            }
            if wave.is_empty() {
                break;
            }

            summary.waves += 1;
            info!("Wave {}: scraping {} page(s)", summary.waves, wave.len());

            let mut next_frontier: Vec<String> = Vec::new();
            for outcome in self.run_wave(wave).await {
                if let Some(next) = &outcome.next_page {
                    if !visited.contains(next) && !next_frontier.contains(next) {
                        next_frontier.push(next.clone());
                    }
                }
                summary.add_page(outcome);
            }
            frontier = next_frontier;
        }

        info!(
            "Finished dynamic pagination scraping of {} page(s) in {} wave(s): {} new article(s) in {:.2?}",
            summary.pages_visited,
            summary.waves,
            summary.articles_stored,
            started.elapsed()
        );
        summary
    }

    /// Scrape every page of one wave on the worker pool and wait for all of them
    async fn run_wave(&self, urls: Vec<String>) -> Vec<PageOutcome> {
        stream::iter(urls)
            .map(|url| {
                let crawler = self.clone();
                async move {
                    let page_url = url.clone();
                    let handle = tokio::spawn(async move { crawler.scrape_page_and_get_next(&page_url).await });
                    match handle.await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            error!("Error scraping page {}: {}", url, e);
                            PageOutcome::stopped(&url, PageStatus::Error)
                        }
                    }
                }
            })
            .buffer_unordered(self.config.max_workers)
            .collect()
            .await
    }

    /// Scrape one listing page: store the new articles it links to and
    /// report the pagination link, if there is one.
    pub async fn scrape_page_and_get_next(&self, url: &str) -> PageOutcome {
        if !self.robots.allowed(url).await {
            info!("Disallowed by robots.txt: {}", url);
            return PageOutcome::stopped(url, PageStatus::Denied);
        }

        let page_url = match Url::parse(url) {
            Ok(page_url) => page_url,
            Err(e) => {
                error!("Error scraping {}: {}", url, e);
                return PageOutcome::stopped(url, PageStatus::Error);
            }
        };

        info!("Scraping: {}", url);
        let html = match self.fetcher.fetch(url).await {
            FetchOutcome::Page(html) => html,
            FetchOutcome::Status(status) => {
                warn!("Skipping {} (HTTP {})", url, status);
                return PageOutcome::stopped(url, PageStatus::FetchFailed);
            }
            FetchOutcome::Exhausted => {
                warn!("Skipping {} (unreachable)", url);
                return PageOutcome::stopped(url, PageStatus::FetchFailed);
            }
        };

        let listing = classify::parse_listing(&html, &page_url);
        debug!("{} link(s) on {}", listing.links.len(), url);

        let posts_found = self.process_links(&page_url, listing.links).await;
        info!("Found {} posts on page: {}", posts_found, url);

        let next_page = listing.next_page.map(String::from);
        match &next_page {
            Some(next) => info!("Next page found: {}", next),
            None => info!("No next page found on {}", url),
        }

        PageOutcome {
            url: url.to_string(),
            status: PageStatus::Completed,
            articles_stored: posts_found,
            next_page,
        }
    }

    /// Process every link of a page on the worker pool; returns how many were stored
    async fn process_links(&self, page_url: &Url, links: Vec<PageLink>) -> usize {
        stream::iter(links)
            .map(|link| {
                let crawler = self.clone();
                let page_url = page_url.clone();
                async move {
                    let href = link.href.clone();
                    let handle =
                        tokio::spawn(async move { crawler.process_article_link(&link, &page_url).await });
                    match handle.await {
                        Ok(Ok(stored)) => stored,
                        Ok(Err(e)) => {
                            error!("Error processing link {}: {:#}", href, e);
                            false
                        }
                        Err(e) => {
                            error!("Link task for {} failed: {}", href, e);
                            false
                        }
                    }
                }
            })
            .buffer_unordered(self.config.max_workers)
            .filter(|stored| futures::future::ready(*stored))
            .count()
            .await
    }

    /// Store the link's target if it is a new article.
    ///
    /// Returns whether this call stored it. Links with neither usable text nor
    /// a fetchable page title are skipped.
    pub async fn process_article_link(&self, link: &PageLink, page_url: &Url) -> Result<bool> {
        let Some(full_link) = classify::resolve_link(page_url, &link.href) else {
            return Ok(false);
        };
        let canonical = canonicalize(full_link.as_str());

        if !classify::is_article_link(canonical.as_str()) || !self.registry.is_new(&canonical) {
            return Ok(false);
        }

        let title = self.resolve_title(&link.text, canonical.as_str()).await;
        if title.is_empty() {
            debug!("No usable title for {}, skipping", canonical);
            return Ok(false);
        }

        let mut content = self.extractor.extract_content(canonical.as_str()).await;
        if content.is_empty() {
            content = title.clone();
        }

        self.registry.store(&title, &canonical, &content)
    }

    /// Use the link text as title unless it is short or generic, in which case
    /// the target page's `<title>` is tried first.
    pub async fn resolve_title(&self, link_text: &str, url: &str) -> String {
        if !classify::needs_title_fallback(link_text) {
            return link_text.to_string();
        }

        let fetched = self.fetch_title(url).await;
        if fetched.is_empty() {
            link_text.to_string()
        } else {
            debug!("Using page title {:?} for {}", fetched, url);
            fetched
        }
    }

    async fn fetch_title(&self, url: &str) -> String {
        if !self.robots.allowed(url).await {
            debug!("Not fetching title from {}: blocked by robots.txt", url);
            return String::new();
        }
        match self.fetcher.fetch(url).await.into_body() {
            Some(html) => classify::title_from_html(&html),
            None => String::new(),
        }
    }
}
