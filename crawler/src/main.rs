use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn, LevelFilter};
use std::path::PathBuf;
use std::sync::Arc;
use threatcrawl_crawler::{ArticleId, ArticleRecord, ArticleRegistry, Crawler, CrawlerConfig, Database};

/// Command line arguments
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Subcommand to run
    #[clap(subcommand)]
    command: Command,

    /// TOML configuration file (built-in defaults when omitted)
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Database file path, overrides the configuration
    #[clap(short, long)]
    db_path: Option<PathBuf>,

    /// Log level
    #[clap(short, long, default_value = "info")]
    log_level: LevelFilter,
}

/// Subcommands
#[derive(Subcommand)]
enum Command {
    /// Crawl listing pages and store new articles
    Crawl {
        /// Listing page to start from
        url: Option<String>,

        /// Maximum listing pages to visit
        #[clap(short, long)]
        max_pages: Option<usize>,

        /// Concurrent workers per wave
        #[clap(short = 'w', long)]
        max_workers: Option<usize>,
    },

    /// Print unprocessed articles as JSON lines
    Unprocessed,

    /// Print processed articles as JSON lines
    Processed,

    /// Mark an article as processed
    MarkProcessed {
        /// Article ID
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new().filter_level(args.log_level).init();

    let mut config = match &args.config {
        Some(path) => CrawlerConfig::from_file(path)?,
        None => CrawlerConfig::default(),
    };
    if let Some(db_path) = args.db_path {
        config.db_path = db_path;
    }

    let db = Arc::new(Database::new(&config.db_path).context("Failed to initialize database")?);

    match args.command {
        Command::Crawl {
            url,
            max_pages,
            max_workers,
        } => {
            if let Some(url) = url {
                config.start_url = url;
            }
            if let Some(max_pages) = max_pages {
                config.max_pages = max_pages;
            }
            if let Some(max_workers) = max_workers {
                config.max_workers = max_workers;
            }

            info!("Starting crawl of {} (up to {} pages)", config.start_url, config.max_pages);
            let crawler = Crawler::new(config, db)?;
            let summary = crawler.crawl().await;

            for page in &summary.pages {
                info!("{}: {} ({} new)", page.url, page.status, page.articles_stored);
            }
            info!(
                "Crawl completed: {} page(s), {} new article(s), {} known in total",
                summary.pages_visited,
                summary.articles_stored,
                crawler.registry().known_count()
            );
        }
        Command::Unprocessed => {
            let registry = ArticleRegistry::load(db)?;
            print_documents(&registry.fetch_unprocessed()?)?;
        }
        Command::Processed => {
            let registry = ArticleRegistry::load(db)?;
            print_documents(&registry.fetch_processed()?)?;
        }
        Command::MarkProcessed { id } => {
            let registry = ArticleRegistry::load(db)?;
            if !registry.mark_processed(&ArticleId::from_raw(id.clone()))? {
                warn!("No article with ID {}", id);
            }
        }
    }

    Ok(())
}

/// One JSON document per line, ready for the downstream pipeline
fn print_documents(records: &[ArticleRecord]) -> Result<()> {
    for record in records {
        println!("{}", serde_json::to_string(&record.to_document())?);
    }
    Ok(())
}
