use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Configuration validation failures
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("start URL {0:?} is not a valid http(s) URL")]
    InvalidStartUrl(String),

    #[error("max_workers must be at least 1")]
    NoWorkers,

    #[error("retries must be at least 1")]
    NoRetries,

    #[error("user agent pool is empty")]
    NoUserAgents,

    #[error("backoff factor must be a finite, non-negative number (got {0})")]
    InvalidBackoff(f64),

    #[error("timeouts must be finite and positive (got {0})")]
    InvalidTimeout(f64),

    #[error("cache TTL must be finite and non-negative (got {0})")]
    InvalidCacheTtl(f64),

    #[error("proxy {0:?} is not a valid URL")]
    InvalidProxy(String),
}

/// Everything the crawler can be tuned with
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// First listing page of the crawl
    pub start_url: String,

    /// Maximum number of listing pages visited per run
    pub max_pages: usize,

    /// Concurrent tasks per batch (pages within a wave, links within a page)
    pub max_workers: usize,

    /// TCP connect timeout in seconds
    pub connect_timeout_secs: f64,

    /// Response read timeout in seconds
    pub read_timeout_secs: f64,

    /// Attempts per fetch before giving up
    pub retries: u32,

    /// Sleep `backoff_factor^attempt` seconds after a failed attempt
    pub backoff_factor: f64,

    /// Upper bound on the total backoff sleep of a single fetch (unbounded if unset)
    pub max_retry_elapsed_secs: Option<f64>,

    /// How long successful responses are reused within a run (no caching if unset or zero)
    pub cache_ttl_secs: Option<f64>,

    /// User agents picked at random per request
    pub user_agents: Vec<String>,

    /// Proxies picked at random per request (direct connection if empty)
    pub proxies: Vec<String>,

    /// Agent name matched against robots.txt groups
    pub robots_agent: String,

    /// Use the alternate (headless browser) renderer for article pages
    pub use_headless: bool,

    /// SQLite database holding the articles
    pub db_path: PathBuf,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            start_url: "https://krebsonsecurity.com/".to_string(),
            max_pages: 7,
            max_workers: 10,
            connect_timeout_secs: 10.0,
            read_timeout_secs: 20.0,
            retries: 5,
            backoff_factor: 2.0,
            max_retry_elapsed_secs: None,
            cache_ttl_secs: Some(3600.0),
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.1 Safari/605.1.15".to_string(),
            ],
            proxies: Vec::new(),
            robots_agent: "CyberBlogCrawler".to_string(),
            use_headless: false,
            db_path: PathBuf::from("./db/cyberthreat_reports.db"),
        }
    }
}

impl CrawlerConfig {
    /// Load a configuration from a TOML file; missing keys keep their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::from_toml(&raw).with_context(|| format!("Failed to load config file {:?}", path))
    }

    /// Parse a configuration from TOML text
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).context("Invalid TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values the crawler cannot run without
    pub fn validate(&self) -> Result<(), ConfigError> {
        match Url::parse(&self.start_url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            _ => return Err(ConfigError::InvalidStartUrl(self.start_url.clone())),
        }
        if self.max_workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.retries == 0 {
            return Err(ConfigError::NoRetries);
        }
        if self.user_agents.is_empty() {
            return Err(ConfigError::NoUserAgents);
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 0.0 {
            return Err(ConfigError::InvalidBackoff(self.backoff_factor));
        }
        for timeout in [self.connect_timeout_secs, self.read_timeout_secs] {
            if !timeout.is_finite() || timeout <= 0.0 {
                return Err(ConfigError::InvalidTimeout(timeout));
            }
        }
        if let Some(ttl) = self.cache_ttl_secs {
            if !ttl.is_finite() || ttl < 0.0 {
                return Err(ConfigError::InvalidCacheTtl(ttl));
            }
        }
        if let Some(bad) = self.proxies.iter().find(|p| Url::parse(p).is_err()) {
            return Err(ConfigError::InvalidProxy(bad.clone()));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.connect_timeout_secs).unwrap_or(Duration::from_secs(10))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.read_timeout_secs).unwrap_or(Duration::from_secs(20))
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .filter(|ttl| !ttl.is_zero())
    }

    pub fn max_retry_elapsed(&self) -> Option<Duration> {
        self.max_retry_elapsed_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}
