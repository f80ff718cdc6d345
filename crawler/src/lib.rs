pub mod classify;
pub mod config;
pub mod crawler;
pub mod db;
pub mod extract;
pub mod fetch;
pub mod models;
pub mod registry;
pub mod robots;

// Re-export important types
pub use config::{ConfigError, CrawlerConfig};
pub use crawler::Crawler;
pub use db::{ArticleStore, Database};
pub use models::{ArticleDocument, ArticleId, ArticleRecord, CanonicalUrl, CrawlSummary, PageOutcome, PageStatus};
pub use registry::ArticleRegistry;
pub use robots::RobotsGuard;
