use crate::config::CrawlerConfig;
use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, REFERER, USER_AGENT};
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// What a fetch produced
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// `200 OK` with the response body
    Page(String),
    /// Any other HTTP status; these are never retried
    Status(StatusCode),
    /// Every attempt failed before a response arrived
    Exhausted,
}

impl FetchOutcome {
    /// Body of a successful fetch, `None` for every kind of miss
    pub fn into_body(self) -> Option<String> {
        match self {
            FetchOutcome::Page(body) => Some(body),
            _ => None,
        }
    }
}

/// `200 OK` bodies kept for `ttl`, keyed by URL
struct ResponseCache {
    ttl: Duration,
    pages: RwLock<HashMap<String, (Instant, String)>>,
}

impl ResponseCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            pages: RwLock::new(HashMap::new()),
        }
    }

    fn get(&self, url: &str) -> Option<String> {
        let pages = self.pages.read().unwrap_or_else(PoisonError::into_inner);
        pages
            .get(url)
            .filter(|(stored_at, _)| stored_at.elapsed() < self.ttl)
            .map(|(_, body)| body.clone())
    }

    fn put(&self, url: &str, body: &str) {
        let mut pages = self.pages.write().unwrap_or_else(PoisonError::into_inner);
        let ttl = self.ttl;
        pages.retain(|_, (stored_at, _)| stored_at.elapsed() < ttl);
        pages.insert(url.to_string(), (Instant::now(), body.to_string()));
    }
}

/// HTTP client with a rotating identity, retry/backoff and a response cache.
///
/// Clones share the cache, so a page fetched once for its title is not
/// requested again for its body.
#[derive(Clone)]
pub struct FetchClient {
    /// One client per configured proxy, or a single direct client
    clients: Arc<[Client]>,
    /// Pool of user agents to rotate through
    user_agents: Arc<[String]>,
    /// Attempts per fetch
    retries: u32,
    /// Base of the exponential backoff, in seconds
    backoff_factor: f64,
    /// Cap on the summed backoff sleep of one fetch
    max_retry_elapsed: Option<Duration>,
    /// Successful responses, `None` when caching is off
    cache: Option<Arc<ResponseCache>>,
}

impl FetchClient {
    /// Build the client pool from the crawler configuration
    pub fn new(config: &CrawlerConfig) -> Result<Self> {
        let clients = if config.proxies.is_empty() {
            vec![build_client(config, None)?]
        } else {
            config
                .proxies
                .iter()
                .map(|proxy| build_client(config, Some(proxy)))
                .collect::<Result<Vec<_>>>()?
        };

        debug!(
            "Fetch client ready: {} route(s), {} user agent(s), {} attempt(s)",
            clients.len(),
            config.user_agents.len(),
            config.retries
        );

        Ok(Self {
            clients: clients.into(),
            user_agents: config.user_agents.clone().into(),
            retries: config.retries.max(1),
            backoff_factor: config.backoff_factor,
            max_retry_elapsed: config.max_retry_elapsed(),
            cache: config.cache_ttl().map(|ttl| Arc::new(ResponseCache::new(ttl))),
        })
    }

    /// Delay slept after the `attempt`-th consecutive failure
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let secs = self.backoff_factor.powi(attempt as i32);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// GET a page, retrying network failures with exponential backoff.
    ///
    /// Never returns an error: callers get `Status` for non-200 responses and
    /// `Exhausted` once the retry budget is spent. Cached pages are served
    /// without a request.
    pub async fn fetch(&self, url: &str) -> FetchOutcome {
        if let Some(body) = self.cache.as_ref().and_then(|cache| cache.get(url)) {
            debug!("Cache hit: {}", url);
            return FetchOutcome::Page(body);
        }

        let mut attempt = 0;
        let mut slept = Duration::ZERO;

        while attempt < self.retries {
            match self.send(url).await {
                Ok((status, body)) if status == StatusCode::OK => {
                    if let Some(cache) = &self.cache {
                        cache.put(url, &body);
                    }
                    return FetchOutcome::Page(body);
                }
                Ok((status, _)) => {
                    warn!("Error fetching {}: HTTP {}", url, status);
                    return FetchOutcome::Status(status);
                }
                Err(e) => {
                    attempt += 1;
                    warn!("Attempt {}/{} for {} failed: {}", attempt, self.retries, url, e);

                    let delay = self.backoff_delay(attempt);
                    if let Some(limit) = self.max_retry_elapsed {
                        if slept + delay > limit {
                            warn!(
                                "Giving up on {} after {} attempt(s): retry budget of {:?} spent",
                                url, attempt, limit
                            );
                            break;
                        }
                    }

                    info!("Backing off {:.2?} before retrying {}", delay, url);
                    tokio::time::sleep(delay).await;
                    slept += delay;
                }
            }
        }

        warn!("No content from {} after {} attempt(s)", url, attempt);
        FetchOutcome::Exhausted
    }

    /// Single GET without retries; the body is only read for 2xx responses
    pub async fn fetch_once(&self, url: &str) -> Result<(StatusCode, String)> {
        self.send(url)
            .await
            .map_err(|e| anyhow!("Request to {} failed: {}", url, e))
    }

    async fn send(&self, url: &str) -> std::result::Result<(StatusCode, String), reqwest::Error> {
        let (client, user_agent) = self.pick_identity();

        let response = client
            .get(url)
            .header(USER_AGENT, user_agent)
            .header(ACCEPT, "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.5")
            .header(REFERER, "https://www.google.com/")
            .send()
            .await?;

        let status = response.status();
        let body = if status.is_success() {
            response.text().await?
        } else {
            String::new()
        };

        Ok((status, body))
    }

    /// Random route and user agent for one request.
    /// Kept synchronous so the thread-local RNG never crosses an await point.
    fn pick_identity(&self) -> (Client, String) {
        let mut rng = rand::thread_rng();
        let client = self.clients.choose(&mut rng).cloned().unwrap_or_default();
        let user_agent = self.user_agents.choose(&mut rng).cloned().unwrap_or_default();
        (client, user_agent)
    }
}

fn build_client(config: &CrawlerConfig, proxy: Option<&String>) -> Result<Client> {
    let builder = Client::builder()
        .gzip(true)
        .redirect(reqwest::redirect::Policy::limited(10))
        .connect_timeout(config.connect_timeout())
        .timeout(config.connect_timeout() + config.read_timeout());

    // Only the configured pool routes traffic; environment proxies are ignored.
    let builder = match proxy {
        Some(proxy) => builder.proxy(
            reqwest::Proxy::all(proxy.as_str())
                .with_context(|| format!("Invalid proxy URL: {}", proxy))?,
        ),
        None => builder.no_proxy(),
    };

    builder.build().context("Failed to create HTTP client")
}
