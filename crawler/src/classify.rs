//! Heuristics for telling article links apart from navigation, picking a
//! usable title, and spotting the "next page" link on a listing page.
//!
//! Everything here is pure: HTML goes in, owned data comes out, so parsed
//! documents never have to live across an await point.

use crate::models::canonicalize;
use log::trace;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Link text shorter than this (in characters) is treated as uninformative
pub const MIN_TITLE_LEN: usize = 15;

/// Path fragments that mark listing, taxonomy and static pages
const EXCLUDED_PATH_MARKERS: [&str; 7] = [
    "/category/",
    "/tag/",
    "/author/",
    "/about",
    "/contact",
    "/faq",
    "/page/",
];

/// Marker a pagination link must carry in its path
const PAGINATION_MARKER: &str = "/page/";

static DATE_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/\d{4}/\d{2}/").expect("date segment pattern is valid"));

static GENERIC_LINK_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(comment|read more)").expect("generic text pattern is valid"));

static NEXT_PAGE_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(next|older posts|›)").expect("next page pattern is valid"));

static ANCHOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("anchor selector is valid"));

static TITLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("title").expect("title selector is valid"));

/// An anchor found on a listing page
#[derive(Debug, Clone, PartialEq)]
pub struct PageLink {
    /// Raw `href` attribute
    pub href: String,
    /// Visible text, whitespace-trimmed
    pub text: String,
}

/// Everything the page worker needs from a listing page
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    /// Anchors with an href, in document order
    pub links: Vec<PageLink>,
    /// Resolved pagination link, if any
    pub next_page: Option<Url>,
}

/// Whether a URL looks like a dated article rather than a navigation page.
///
/// The path needs a `/YYYY/MM/` segment and none of the excluded markers;
/// an excluded marker wins even when a date is present.
pub fn is_article_link(url: &str) -> bool {
    let canonical = canonicalize(url);
    let path = match Url::parse(canonical.as_str()) {
        Ok(parsed) => parsed.path().to_lowercase(),
        Err(_) => return false,
    };

    if !DATE_SEGMENT.is_match(&path) {
        return false;
    }
    !EXCLUDED_PATH_MARKERS.iter().any(|marker| path.contains(marker))
}

/// Whether link text is too short or generic to serve as a title
pub fn needs_title_fallback(link_text: &str) -> bool {
    link_text.chars().count() < MIN_TITLE_LEN || GENERIC_LINK_TEXT.is_match(link_text)
}

/// Whether anchor text reads like a pagination control
pub fn is_next_page_text(text: &str) -> bool {
    NEXT_PAGE_TEXT.is_match(text)
}

/// Document `<title>`, trimmed; empty when there is none
pub fn title_from_html(html: &str) -> String {
    let document = Html::parse_document(html);
    document
        .select(&TITLE)
        .next()
        .map(|title| element_text(&title))
        .unwrap_or_default()
}

/// Resolve an href against the page it appeared on, keeping only http(s) targets
pub fn resolve_link(base: &Url, href: &str) -> Option<Url> {
    match base.join(href) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => Some(url),
        Ok(url) => {
            trace!("Ignoring non-http link {}", url);
            None
        }
        Err(e) => {
            trace!("Failed to resolve href {}: {}", href, e);
            None
        }
    }
}

/// Pull the anchors and the pagination link out of a listing page
pub fn parse_listing(html: &str, page_url: &Url) -> ListingPage {
    let document = Html::parse_document(html);
    let links: Vec<PageLink> = document
        .select(&ANCHOR)
        .filter_map(|anchor| {
            anchor.value().attr("href").map(|href| PageLink {
                href: href.to_string(),
                text: element_text(&anchor),
            })
        })
        .collect();

    let next_page = find_next_page(&links, page_url);
    ListingPage { links, next_page }
}

/// First anchor, in document order, whose text looks like "next" and whose
/// target stays on the same host and port with `/page/` in its path.
pub fn find_next_page(links: &[PageLink], page_url: &Url) -> Option<Url> {
    links
        .iter()
        .filter(|link| is_next_page_text(&link.text))
        .filter_map(|link| resolve_link(page_url, &link.href))
        .find(|candidate| same_domain(candidate, page_url) && candidate.path().contains(PAGINATION_MARKER))
}

fn same_domain(a: &Url, b: &Url) -> bool {
    a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default()
}

/// Visible text of an element with whitespace runs collapsed
fn element_text(element: &ElementRef) -> String {
    let text: String = element.text().collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn article_links() {
        assert!(is_article_link("https://site.example/2025/03/some-article"));
        assert!(is_article_link("https://site.example/2025/03/some-article/#comments"));
        assert!(is_article_link("https://site.example/blog/2024/11/Big-Breach/"));
    }

    #[test]
    fn non_article_links() {
        assert!(!is_article_link("https://site.example/category/malware"));
        assert!(!is_article_link("https://site.example/2025/03/category/x"));
        assert!(!is_article_link("https://site.example/about"));
        assert!(!is_article_link("https://site.example/2025/03/page/2/"));
        assert!(!is_article_link("https://site.example/TAG/2025/03/x"));
        assert!(!is_article_link("https://site.example/2025/3/short-month"));
        assert!(!is_article_link("not a url at all"));
    }

    #[test]
    fn title_fallback_rules() {
        assert!(needs_title_fallback(""));
        assert!(needs_title_fallback("Short title"));
        assert!(needs_title_fallback("Comments (12) on this article"));
        assert!(needs_title_fallback("READ MORE about the breach"));
        assert!(!needs_title_fallback("Ransomware gang hits hospital chain"));
        // exactly at the threshold counts as informative
        assert!(!needs_title_fallback("fifteen chars!!"));
    }

    #[test]
    fn document_title() {
        assert_eq!(
            title_from_html("<html><head><title>\n  Patch Tuesday, March 2025 \n</title></head></html>"),
            "Patch Tuesday, March 2025"
        );
        assert_eq!(title_from_html("<html><body>no title</body></html>"), "");
    }

    #[test]
    fn resolves_only_http_links() {
        let base = Url::parse("https://site.example/blog/").unwrap();
        assert_eq!(
            resolve_link(&base, "2025/03/post").unwrap().as_str(),
            "https://site.example/blog/2025/03/post"
        );
        assert!(resolve_link(&base, "mailto:tips@site.example").is_none());
        assert!(resolve_link(&base, "javascript:void(0)").is_none());
    }

    #[test]
    fn resolution_normalizes_scheme_and_host_only() {
        let base = Url::parse("https://site.example/").unwrap();
        let a = canonicalize(resolve_link(&base, "HTTPS://Site.Example:443/2025/03/Big-Breach/#top").unwrap().as_str());
        let b = canonicalize(resolve_link(&base, "/2025/03/Big-Breach/").unwrap().as_str());
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "https://site.example/2025/03/Big-Breach/");

        let lower = canonicalize(resolve_link(&base, "/2025/03/big-breach/").unwrap().as_str());
        assert_ne!(a, lower);
    }

    #[test]
    fn finds_older_posts_link() {
        let page = Url::parse("https://site.example/").unwrap();
        let listing = parse_listing(
            r#"<html><body>
                <a href="/2025/03/next-gen-malware-report/">Next-gen malware</a>
                <a href="https://site.example/page/2/">Older Posts →</a>
            </body></html>"#,
            &page,
        );
        assert_eq!(listing.links.len(), 2);
        assert_eq!(listing.next_page.unwrap().as_str(), "https://site.example/page/2/");
    }

    #[test]
    fn rejects_other_domain_next_link() {
        let page = Url::parse("https://site.example/").unwrap();
        let listing = parse_listing(
            r#"<a href="https://other.example/page/2/">Older Posts →</a>"#,
            &page,
        );
        assert!(listing.next_page.is_none());
    }

    #[test]
    fn first_candidate_wins() {
        let page = Url::parse("https://site.example/page/2/").unwrap();
        let listing = parse_listing(
            r#"<a href="/page/1/">›</a> <a href="/page/3/">Next</a>"#,
            &page,
        );
        assert_eq!(listing.next_page.unwrap().as_str(), "https://site.example/page/1/");
    }

    #[test]
    fn anchors_without_href_are_skipped() {
        let page = Url::parse("https://site.example/").unwrap();
        let listing = parse_listing(r#"<a name="top">Next</a><a href="/x">  Spread   out <b>text</b> </a>"#, &page);
        assert_eq!(
            listing.links,
            vec![PageLink {
                href: "/x".to_string(),
                text: "Spread out text".to_string()
            }]
        );
        assert!(listing.next_page.is_none());
    }
}
