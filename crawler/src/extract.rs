use crate::fetch::FetchClient;
use crate::robots::RobotsGuard;
use log::{debug, info};
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use std::sync::Arc;

static ARTICLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("article").expect("article selector is valid"));

static BLOG_CONTENT: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.blog-content").expect("blog content selector is valid"));

static PARAGRAPH: Lazy<Selector> = Lazy::new(|| Selector::parse("p").expect("paragraph selector is valid"));

/// Pulls the readable body out of article pages
#[derive(Clone)]
pub struct ContentExtractor {
    fetcher: FetchClient,
    robots: Arc<RobotsGuard>,
    /// Headless rendering is recognised but not implemented; enabling it yields empty content
    use_headless: bool,
}

impl ContentExtractor {
    pub fn new(fetcher: FetchClient, robots: Arc<RobotsGuard>, use_headless: bool) -> Self {
        Self {
            fetcher,
            robots,
            use_headless,
        }
    }

    /// Fetch an article page and return its paragraph text.
    ///
    /// Empty when robots.txt forbids the page, the page cannot be fetched, or
    /// no content container is present.
    pub async fn extract_content(&self, url: &str) -> String {
        if !self.robots.allowed(url).await {
            info!("Blocked by robots.txt: {}", url);
            return String::new();
        }

        if self.use_headless {
            debug!("Headless rendering requested for {} but no renderer is available", url);
            return String::new();
        }

        match self.fetcher.fetch(url).await.into_body() {
            Some(html) => {
                let content = extract_article_text(&html);
                if content.is_empty() {
                    debug!("No content container found on {}", url);
                }
                content
            }
            None => String::new(),
        }
    }
}

/// Paragraph text of the first `<article>` (or `div.blog-content`), one paragraph per line
pub fn extract_article_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let container = document
        .select(&ARTICLE)
        .next()
        .or_else(|| document.select(&BLOG_CONTENT).next());

    let Some(container) = container else {
        return String::new();
    };

    container
        .select(&PARAGRAPH)
        .map(|p| collapse_whitespace(&p.text().collect::<String>()))
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrawlerConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn joins_article_paragraphs() {
        let html = r#"<html><body>
            <nav><p>Menu</p></nav>
            <article>
                <h1>Headline</h1>
                <p>First   paragraph with <a href="/x">a link</a>.</p>
                <div><p>Nested second paragraph.</p></div>
                <p>   </p>
            </article>
        </body></html>"#;
        assert_eq!(
            extract_article_text(html),
            "First paragraph with a link.\nNested second paragraph."
        );
    }

    #[test]
    fn falls_back_to_blog_content_div() {
        let html = r#"<div class="sidebar"><p>ads</p></div>
            <div class="post blog-content"><p>Body text.</p></div>"#;
        assert_eq!(extract_article_text(html), "Body text.");
    }

    #[test]
    fn article_wins_over_blog_content() {
        let html = r#"<div class="blog-content"><p>div text</p></div><article><p>article text</p></article>"#;
        assert_eq!(extract_article_text(html), "article text");
    }

    #[test]
    fn no_container_means_no_content() {
        assert_eq!(extract_article_text("<html><body><p>loose</p></body></html>"), "");
    }

    fn extractor(use_headless: bool) -> ContentExtractor {
        let config = CrawlerConfig {
            connect_timeout_secs: 1.0,
            read_timeout_secs: 1.0,
            retries: 1,
            ..CrawlerConfig::default()
        };
        let fetcher = FetchClient::new(&config).unwrap();
        let robots = Arc::new(RobotsGuard::new(fetcher.clone(), &config.robots_agent));
        ContentExtractor::new(fetcher, robots, use_headless)
    }

    #[tokio::test]
    async fn extracts_from_live_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/2025/03/post"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<article><p>Live body</p></article>"))
            .mount(&server)
            .await;

        let content = extractor(false)
            .extract_content(&format!("{}/2025/03/post", server.uri()))
            .await;
        assert_eq!(content, "Live body");
    }

    #[tokio::test]
    async fn robots_denial_skips_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /\n"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/2025/03/post"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<article><p>secret</p></article>"))
            .expect(0)
            .mount(&server)
            .await;

        let content = extractor(false)
            .extract_content(&format!("{}/2025/03/post", server.uri()))
            .await;
        assert_eq!(content, "");
    }

    #[tokio::test]
    async fn headless_mode_returns_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/2025/03/post"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<article><p>body</p></article>"))
            .expect(0)
            .mount(&server)
            .await;

        let content = extractor(true)
            .extract_content(&format!("{}/2025/03/post", server.uri()))
            .await;
        assert_eq!(content, "");
    }
}
