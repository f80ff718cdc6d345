use crate::fetch::FetchClient;
use log::{debug, info, warn};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use url::Url;

/// Simple robots.txt parser
#[derive(Default, Clone, Debug)]
pub struct RobotsTxt {
    /// Groups for named user agents, in file order
    groups: Vec<Group>,
    /// The first `User-agent: *` group
    default_group: Option<Group>,
}

/// One `User-agent` block and the rules under it
#[derive(Default, Clone, Debug)]
struct Group {
    agents: Vec<String>,
    rules: Vec<Rule>,
}

/// Rule type for robots.txt
#[derive(Clone, Debug)]
enum Rule {
    /// Allow a path
    Allow(String),
    /// Disallow a path
    Disallow(String),
}

impl Group {
    fn applies_to(&self, agent: &str) -> bool {
        self.agents.iter().any(|a| a == "*" || agent.contains(a.as_str()))
    }

    /// First matching rule decides; no match means allowed
    fn allowance(&self, path: &str) -> bool {
        for rule in &self.rules {
            match rule {
                Rule::Allow(pattern) if path_matches(pattern, path) => return true,
                Rule::Disallow(pattern) if path_matches(pattern, path) => return false,
                _ => {}
            }
        }
        true
    }
}

impl RobotsTxt {
    /// Parse robots.txt content
    pub fn parse(content: &str) -> Self {
        let mut robots = RobotsTxt::default();
        let mut current = Group::default();
        // true once the current group has rules, so the next User-agent opens a new group
        let mut in_rules = false;

        for line in content.lines() {
            let line = match line.find('#') {
                Some(idx) => &line[..idx],
                None => line,
            }
            .trim();
            if line.is_empty() {
                continue;
            }

            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let directive = directive.trim().to_lowercase();
            let value = value.trim();

            match directive.as_str() {
                "user-agent" => {
                    if in_rules {
                        robots.finish_group(std::mem::take(&mut current));
                        in_rules = false;
                    }
                    current.agents.push(value.to_lowercase());
                }
                "allow" | "disallow" => {
                    if current.agents.is_empty() {
                        // Rules before any User-agent line belong to no group
                        continue;
                    }
                    let rule = if directive == "allow" || value.is_empty() {
                        // An empty Disallow allows everything
                        Rule::Allow(value.to_string())
                    } else {
                        Rule::Disallow(value.to_string())
                    };
                    current.rules.push(rule);
                    in_rules = true;
                }
                // Sitemap, Crawl-delay and friends are not used
                _ => {}
            }
        }

        if !current.agents.is_empty() {
            robots.finish_group(current);
        }
        robots
    }

    fn finish_group(&mut self, group: Group) {
        if group.agents.iter().any(|a| a == "*") {
            if self.default_group.is_none() {
                self.default_group = Some(group);
            }
        } else {
            self.groups.push(group);
        }
    }

    /// Check if user agent is allowed to fetch URL
    pub fn can_fetch(&self, user_agent: &str, url: &Url) -> bool {
        let agent = user_agent.split('/').next().unwrap_or("").to_lowercase();

        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        if path.is_empty() {
            path.push('/');
        }

        if let Some(group) = self.groups.iter().find(|g| g.applies_to(&agent)) {
            return group.allowance(&path);
        }
        if let Some(group) = &self.default_group {
            return group.allowance(&path);
        }
        true
    }
}

/// Prefix match with `*` wildcards and an optional trailing `$` anchor
fn path_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(stripped) => (stripped, true),
        None => (pattern, false),
    };

    let mut pieces = pattern.split('*');
    let first = pieces.next().unwrap_or("");
    if !path.starts_with(first) {
        return false;
    }
    let mut pos = first.len();
    let rest: Vec<&str> = pieces.collect();

    if rest.is_empty() {
        return !anchored || pos == path.len();
    }

    for (i, piece) in rest.iter().enumerate() {
        let remaining = &path[pos..];
        if anchored && i == rest.len() - 1 {
            return remaining.ends_with(piece);
        }
        match remaining.find(piece) {
            Some(idx) => pos += idx + piece.len(),
            None => return false,
        }
    }
    true
}

/// Cached policy for one origin
#[derive(Debug, Clone)]
enum RobotsPolicy {
    /// robots.txt was fetched and parsed
    Rules(RobotsTxt),
    /// 401/403 on robots.txt: nothing may be fetched
    DenyAll,
    /// Any other status, server errors included
    AllowAll,
    /// robots.txt could not be retrieved at all; treated as allow
    Unreadable,
}

impl RobotsPolicy {
    fn allows(&self, agent: &str, url: &Url) -> bool {
        match self {
            RobotsPolicy::Rules(robots) => robots.can_fetch(agent, url),
            RobotsPolicy::DenyAll => false,
            RobotsPolicy::AllowAll | RobotsPolicy::Unreadable => true,
        }
    }
}

/// Per-origin robots.txt gate shared by all crawl workers.
///
/// Two workers may fetch the same origin's robots.txt concurrently the first
/// time round; both compute the same policy, so the later insert simply wins.
pub struct RobotsGuard {
    /// Client used for robots.txt requests
    fetcher: FetchClient,
    /// Agent name matched against robots.txt groups
    agent: String,
    /// Policies by origin (`scheme://host[:port]`)
    cache: RwLock<HashMap<String, Arc<RobotsPolicy>>>,
}

impl RobotsGuard {
    pub fn new(fetcher: FetchClient, agent: &str) -> Self {
        Self {
            fetcher,
            agent: agent.to_string(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Check the URL against its origin's robots.txt using the configured agent
    pub async fn allowed(&self, url: &str) -> bool {
        let agent = self.agent.clone();
        self.allowed_as(url, &agent).await
    }

    /// Check the URL against its origin's robots.txt for an explicit agent name
    pub async fn allowed_as(&self, url: &str, agent: &str) -> bool {
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("Not checking robots.txt for unparsable URL {}: {}", url, e);
                return true;
            }
        };

        let origin = parsed.origin();
        if !origin.is_tuple() {
            return true;
        }
        let origin = origin.ascii_serialization();

        let policy = self.policy_for(&origin).await;
        let allowed = policy.allows(agent, &parsed);
        if !allowed {
            debug!("robots.txt disallows {} for {}", url, agent);
        }
        allowed
    }

    /// Number of origins with a cached policy
    pub fn cached_origins(&self) -> usize {
        self.cache.read().map(|cache| cache.len()).unwrap_or(0)
    }

    async fn policy_for(&self, origin: &str) -> Arc<RobotsPolicy> {
        let cached = self
            .cache
            .read()
            .ok()
            .and_then(|cache| cache.get(origin).cloned());
        if let Some(policy) = cached {
            return policy;
        }

        // Lock is not held across the fetch
        let policy = Arc::new(self.load_policy(origin).await);
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(origin.to_string(), Arc::clone(&policy));
        }
        policy
    }

    async fn load_policy(&self, origin: &str) -> RobotsPolicy {
        let robots_url = format!("{}/robots.txt", origin);
        info!("Fetching robots.txt: {}", robots_url);

        match self.fetcher.fetch_once(&robots_url).await {
            Ok((status, body)) if status.is_success() => RobotsPolicy::Rules(RobotsTxt::parse(&body)),
            Ok((status, _)) if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN => {
                info!("robots.txt for {} returned {}; treating origin as off limits", origin, status);
                RobotsPolicy::DenyAll
            }
            Ok((status, _)) => {
                debug!("No robots.txt for {} (status: {})", origin, status);
                RobotsPolicy::AllowAll
            }
            Err(e) => {
                warn!("Could not read robots.txt for {}: {}", origin, e);
                RobotsPolicy::Unreadable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrawlerConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn agent_group_takes_precedence_over_wildcard() {
        let robots = RobotsTxt::parse(
            "User-agent: *\n\
             Disallow: /private/\n\
             \n\
             User-agent: CyberBlogCrawler\n\
             Disallow: /drafts/\n",
        );
        assert!(robots.can_fetch("CyberBlogCrawler", &url("https://x/private/a")));
        assert!(!robots.can_fetch("CyberBlogCrawler", &url("https://x/drafts/a")));
        assert!(!robots.can_fetch("OtherBot/1.0", &url("https://x/private/a")));
        assert!(robots.can_fetch("OtherBot/1.0", &url("https://x/drafts/a")));
    }

    #[test]
    fn first_matching_rule_wins() {
        let robots = RobotsTxt::parse(
            "User-agent: *\n\
             Allow: /2025/03/public\n\
             Disallow: /2025/\n",
        );
        assert!(robots.can_fetch("bot", &url("https://x/2025/03/public-post")));
        assert!(!robots.can_fetch("bot", &url("https://x/2025/03/other")));
        assert!(robots.can_fetch("bot", &url("https://x/2024/01/old")));
    }

    #[test]
    fn empty_disallow_allows_everything() {
        let robots = RobotsTxt::parse("User-agent: *\nDisallow:\n");
        assert!(robots.can_fetch("bot", &url("https://x/anything")));
    }

    #[test]
    fn shared_group_and_comments() {
        let robots = RobotsTxt::parse(
            "# crawl rules\n\
             User-agent: alpha\n\
             User-agent: beta # second agent\n\
             Disallow: / # everything\n",
        );
        assert!(!robots.can_fetch("alpha", &url("https://x/")));
        assert!(!robots.can_fetch("Beta", &url("https://x/page")));
        assert!(robots.can_fetch("gamma", &url("https://x/page")));
    }

    #[test]
    fn rules_before_any_agent_are_ignored() {
        let robots = RobotsTxt::parse("Disallow: /\n");
        assert!(robots.can_fetch("bot", &url("https://x/")));
    }

    #[test]
    fn wildcard_and_anchor_patterns() {
        assert!(path_matches("/*.pdf$", "/files/report.pdf"));
        assert!(!path_matches("/*.pdf$", "/files/report.pdf?download=1"));
        assert!(path_matches("/search*q=", "/search?x=1&q=threat"));
        assert!(path_matches("/tag/", "/tag/malware"));
        assert!(!path_matches("/tag/", "/tags"));
        assert!(path_matches("/exact$", "/exact"));
        assert!(!path_matches("/exact$", "/exactly"));
        assert!(path_matches("", "/anything"));
    }

    #[test]
    fn query_is_part_of_the_matched_path() {
        let robots = RobotsTxt::parse("User-agent: *\nDisallow: /?s=\n");
        assert!(!robots.can_fetch("bot", &url("https://x/?s=ransomware")));
        assert!(robots.can_fetch("bot", &url("https://x/")));
    }

    fn guard() -> RobotsGuard {
        let config = CrawlerConfig {
            connect_timeout_secs: 1.0,
            read_timeout_secs: 1.0,
            ..CrawlerConfig::default()
        };
        RobotsGuard::new(FetchClient::new(&config).unwrap(), &config.robots_agent)
    }

    #[tokio::test]
    async fn fetches_robots_once_per_origin() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("User-agent: CyberBlogCrawler\nDisallow: /private/\n"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let guard = guard();
        assert!(guard.allowed(&format!("{}/2025/03/post", server.uri())).await);
        assert!(!guard.allowed(&format!("{}/private/x", server.uri())).await);
        assert!(guard.allowed_as(&format!("{}/private/x", server.uri()), "SomeoneElse").await);
        assert_eq!(guard.cached_origins(), 1);
    }

    #[tokio::test]
    async fn forbidden_robots_denies_origin() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        assert!(!guard().allowed(&format!("{}/2025/03/post", server.uri())).await);
    }

    #[tokio::test]
    async fn missing_robots_allows() {
        let server = MockServer::start().await;
        assert!(guard().allowed(&format!("{}/anything", server.uri())).await);
    }

    #[tokio::test]
    async fn server_error_robots_allows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let guard = guard();
        assert!(guard.allowed(&format!("{}/2025/03/post", server.uri())).await);
        assert!(guard.allowed(&format!("{}/private/x", server.uri())).await);
    }

    #[tokio::test]
    async fn unreachable_robots_fails_open() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let guard = guard();
        assert!(guard.allowed(&format!("http://{}/page", addr)).await);
        assert_eq!(guard.cached_origins(), 1);
    }

    #[tokio::test]
    async fn non_http_urls_are_not_checked() {
        let guard = guard();
        assert!(guard.allowed("mailto:someone@example.com").await);
        assert!(guard.allowed("not a url").await);
        assert_eq!(guard.cached_origins(), 0);
    }
}
