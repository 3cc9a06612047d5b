//! Breadth-first web crawler.
//!
//! Starting from the seed URLs, pages are fetched in BFS order and their
//! links queued one level deeper, until the frontier is empty, `max_pages`
//! fetches were made, or the remaining links are deeper than `max_depth`
//! (seeds are depth 0).
//!
//! Politeness:
//! - `delay_ms` is slept between consecutive page requests.
//! - With `respect_robots`, each origin's `/robots.txt` is fetched once and
//!   its rules for `ragbox` (or `*`) are applied. A missing or unreadable
//!   robots file allows everything.
//! - With `same_domain_only`, links and redirects are followed only to the
//!   seed hosts. A redirect leaving them skips the page.
//!
//! A page answering with a 4xx status is skipped (it no longer exists, so
//! pruning it is right). Network errors and 5xx responses fail the whole
//! source, as does a crawl that fetched no page at all: pruning against an
//! empty result would wipe the source from the index.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect;
use tracing::{debug, info};
use url::Url;

use ragbox_core::models::{Metadata, SourceDocument};

use crate::config::WebCrawlSource;
use crate::connector_url::USER_AGENT;
use crate::html::{is_html, parse_page};
use crate::traits::{Connector, SourceContext};

/// Product token matched against `User-agent` lines in robots.txt.
const ROBOTS_AGENT: &str = "ragbox";

const MAX_REDIRECTS: usize = 10;

pub struct WebCrawlConnector {
    ctx: SourceContext,
    config: WebCrawlSource,
}

impl WebCrawlConnector {
    pub fn new(ctx: SourceContext, config: WebCrawlSource) -> Self {
        Self { ctx, config }
    }
}

#[async_trait]
impl Connector for WebCrawlConnector {
    fn name(&self) -> &str {
        &self.ctx.name
    }

    fn description(&self) -> &str {
        "Crawl web pages breadth-first from seed URLs"
    }

    fn connector_type(&self) -> &str {
        "web_crawl"
    }

    async fn scan(&self) -> Result<Vec<SourceDocument>> {
        Crawler::new(&self.ctx, &self.config)?.run().await
    }
}

/// Outcome of fetching one page.
enum Fetched {
    Page {
        content: String,
        content_type: String,
        title: Option<String>,
        links: Vec<Url>,
    },
    /// Served but not indexable (4xx, redirect off the seed hosts,
    /// non-text content).
    Skipped,
}

/// HTTP client whose redirects obey `same_domain_only`.
fn crawl_client(config: &WebCrawlSource, seed_hosts: HashSet<String>) -> Result<reqwest::Client> {
    let same_domain_only = config.same_domain_only;
    let policy = redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else if same_domain_only
            && !attempt
                .url()
                .host_str()
                .is_some_and(|h| seed_hosts.contains(h))
        {
            attempt.stop()
        } else {
            attempt.follow()
        }
    });

    Ok(reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_millis(config.timeout_ms))
        .redirect(policy)
        .build()?)
}

struct Crawler<'a> {
    ctx: &'a SourceContext,
    config: &'a WebCrawlSource,
    client: reqwest::Client,
    follow: Vec<Regex>,
    exclude: Vec<Regex>,
    seeds: Vec<Url>,
    seed_hosts: HashSet<String>,
    robots: HashMap<String, RobotsRules>,
}

impl<'a> Crawler<'a> {
    fn new(ctx: &'a SourceContext, config: &'a WebCrawlSource) -> Result<Self> {
        let compile = |patterns: &[String]| -> Result<Vec<Regex>> {
            patterns
                .iter()
                .map(|p| Regex::new(p).with_context(|| format!("invalid crawl pattern '{}'", p)))
                .collect()
        };

        let mut seeds = Vec::with_capacity(config.seed_urls.len());
        for raw in &config.seed_urls {
            let mut url =
                Url::parse(raw.trim()).with_context(|| format!("invalid seed url '{}'", raw))?;
            url.set_fragment(None);
            seeds.push(url);
        }
        let seed_hosts: HashSet<String> = seeds
            .iter()
            .filter_map(|u| u.host_str().map(str::to_string))
            .collect();

        Ok(Self {
            ctx,
            config,
            client: crawl_client(config, seed_hosts.clone())?,
            follow: compile(&config.follow_patterns)?,
            exclude: compile(&config.exclude_patterns)?,
            seeds,
            seed_hosts,
            robots: HashMap::new(),
        })
    }

    async fn run(mut self) -> Result<Vec<SourceDocument>> {
        let mut queue: VecDeque<(Url, usize)> = VecDeque::new();
        let mut seen: HashSet<String> = HashSet::new();

        for url in &self.seeds {
            if !self.is_excluded(url) && seen.insert(url.to_string()) {
                queue.push_back((url.clone(), 0));
            }
        }

        let mut documents = Vec::new();
        let mut requests = 0usize;

        while let Some((url, depth)) = queue.pop_front() {
            if requests >= self.config.max_pages {
                break;
            }
            if self.config.respect_robots && !self.robots_allow(&url).await {
                debug!(source = %self.ctx.name, %url, "disallowed by robots.txt");
                continue;
            }

            if requests > 0 && self.config.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.delay_ms)).await;
            }
            requests += 1;

            match self.fetch(&url).await? {
                Fetched::Page {
                    content,
                    content_type,
                    title,
                    links,
                } => {
                    if depth < self.config.max_depth {
                        for link in links {
                            if self.should_follow(&link) && seen.insert(link.to_string()) {
                                queue.push_back((link, depth + 1));
                            }
                        }
                    }

                    let mut metadata = Metadata::new();
                    metadata.insert("url".to_string(), url.to_string());
                    metadata.insert("content_type".to_string(), content_type);
                    metadata.insert("depth".to_string(), depth.to_string());
                    if let Some(title) = title {
                        metadata.insert("title".to_string(), title);
                    }
                    documents.push(self.ctx.document(url.as_str(), content, metadata));
                }
                Fetched::Skipped => {}
            }
        }

        if documents.is_empty() {
            bail!(
                "crawl of source '{}' fetched no pages ({} requests)",
                self.ctx.name,
                requests
            );
        }

        info!(
            source = %self.ctx.name,
            pages = documents.len(),
            requests,
            "crawl finished"
        );
        Ok(documents)
    }

    async fn fetch(&self, url: &Url) -> Result<Fetched> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("failed to fetch {}", url))?;

        let status = resp.status();
        if status.is_redirection() {
            debug!(source = %self.ctx.name, %url, %status, "redirect not followed");
            return Ok(Fetched::Skipped);
        }
        if status.is_client_error() {
            debug!(source = %self.ctx.name, %url, %status, "skipping page");
            return Ok(Fetched::Skipped);
        }
        if !status.is_success() {
            bail!("fetching {} failed with HTTP {}", url, status);
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_string();
        let html = is_html(&content_type);
        if !html && !content_type.to_ascii_lowercase().starts_with("text/") {
            debug!(source = %self.ctx.name, %url, %content_type, "skipping non-text page");
            return Ok(Fetched::Skipped);
        }

        // The final URL after redirects is the base for relative links.
        let base = resp.url().clone();
        let body = resp
            .text()
            .await
            .with_context(|| format!("failed to read body of {}", url))?;

        if html {
            let page = parse_page(&body, &base);
            Ok(Fetched::Page {
                content: page.text,
                content_type,
                title: page.title,
                links: page.links,
            })
        } else {
            Ok(Fetched::Page {
                content: body,
                content_type,
                title: None,
                links: Vec::new(),
            })
        }
    }

    fn is_excluded(&self, url: &Url) -> bool {
        self.exclude.iter().any(|re| re.is_match(url.as_str()))
    }

    fn should_follow(&self, url: &Url) -> bool {
        if self.config.same_domain_only {
            let same = url
                .host_str()
                .map(|h| self.seed_hosts.contains(h))
                .unwrap_or(false);
            if !same {
                return false;
            }
        }
        if self.is_excluded(url) {
            return false;
        }
        self.follow.is_empty() || self.follow.iter().any(|re| re.is_match(url.as_str()))
    }

    async fn robots_allow(&mut self, url: &Url) -> bool {
        let origin = url.origin().ascii_serialization();
        if !self.robots.contains_key(&origin) {
            let rules = self.fetch_robots(&origin).await;
            self.robots.insert(origin.clone(), rules);
        }

        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        self.robots
            .get(&origin)
            .map(|rules| rules.allows(&path))
            .unwrap_or(true)
    }

    async fn fetch_robots(&self, origin: &str) -> RobotsRules {
        let robots_url = format!("{}/robots.txt", origin);
        let body = match self.client.get(&robots_url).send().await {
            Ok(resp) if resp.status().is_success() => resp.text().await.ok(),
            _ => None,
        };
        match body {
            Some(body) => RobotsRules::parse(&body, ROBOTS_AGENT),
            None => {
                debug!(source = %self.ctx.name, url = %robots_url, "no robots.txt, allowing all");
                RobotsRules::default()
            }
        }
    }
}

// ============ robots.txt ============

#[derive(Debug, Clone, PartialEq, Eq)]
struct RobotsRule {
    allow: bool,
    pattern: String,
}

/// Allow/Disallow rules that apply to one user agent.
#[derive(Debug, Clone, Default)]
struct RobotsRules {
    rules: Vec<RobotsRule>,
}

impl RobotsRules {
    /// Rules from the groups naming `agent`, or the `*` groups when no
    /// group names it.
    fn parse(body: &str, agent: &str) -> Self {
        let agent = agent.to_ascii_lowercase();
        let mut specific = Vec::new();
        let mut wildcard = Vec::new();
        let mut found_specific = false;

        let mut group_agents: Vec<String> = Vec::new();
        let mut in_rules = false;

        for line in body.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let field = field.trim().to_ascii_lowercase();
            let value = value.trim();

            match field.as_str() {
                "user-agent" => {
                    if in_rules {
                        group_agents.clear();
                        in_rules = false;
                    }
                    group_agents.push(value.to_ascii_lowercase());
                }
                "allow" | "disallow" => {
                    in_rules = true;
                    // An empty Disallow permits everything.
                    if value.is_empty() {
                        continue;
                    }
                    let rule = RobotsRule {
                        allow: field == "allow",
                        pattern: value.to_string(),
                    };
                    if group_agents.iter().any(|a| *a == agent) {
                        found_specific = true;
                        specific.push(rule.clone());
                    }
                    if group_agents.iter().any(|a| a == "*") {
                        wildcard.push(rule);
                    }
                }
                _ => {}
            }
        }

        Self {
            rules: if found_specific { specific } else { wildcard },
        }
    }

    /// Longest matching rule wins; on a tie, Allow wins.
    fn allows(&self, path: &str) -> bool {
        let mut best: Option<&RobotsRule> = None;
        for rule in &self.rules {
            if !robots_match(&rule.pattern, path) {
                continue;
            }
            best = match best {
                Some(b)
                    if b.pattern.len() > rule.pattern.len()
                        || (b.pattern.len() == rule.pattern.len() && b.allow) =>
                {
                    Some(b)
                }
                _ => Some(rule),
            };
        }
        best.map(|r| r.allow).unwrap_or(true)
    }
}

/// Prefix match with `*` wildcards and a trailing `$` end anchor.
fn robots_match(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };
    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or("");
    let Some(mut rest) = path.strip_prefix(first) else {
        return false;
    };

    let parts: Vec<&str> = parts.collect();
    for (i, part) in parts.iter().enumerate() {
        let last = i == parts.len() - 1;
        if last && anchored {
            return rest.ends_with(part);
        }
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    !anchored || rest.is_empty()
}
