//! HTML to text for the URL and web-crawl connectors.
//!
//! The main content element (`article`, `main`, `[role='main']`, …) is
//! preferred over `body`. Script and style text is dropped, and each
//! remaining text node becomes one line with its whitespace collapsed.

use scraper::{ElementRef, Html, Selector};
use url::Url;

const MAIN_SELECTORS: &str =
    "article, main, .article-content, .post-content, .entry-content, [role='main']";
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "svg"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub title: Option<String>,
    pub text: String,
    /// Absolute `http(s)` link targets without fragments, in document order.
    pub links: Vec<Url>,
}

fn first<'a>(document: &'a Html, css: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    let found = document.select(&selector).next();
    found
}

/// Parse `html` fetched from `base`.
pub fn parse_page(html: &str, base: &Url) -> Page {
    let document = Html::parse_document(html);

    let title = first(&document, "title")
        .map(|t| collapse_whitespace(&t.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    let content = first(&document, MAIN_SELECTORS).or_else(|| first(&document, "body"));
    let text = content.map(visible_text).unwrap_or_default();

    let mut links = Vec::new();
    if let Ok(anchors) = Selector::parse("a[href]") {
        for anchor in document.select(&anchors) {
            if let Some(link) = anchor.value().attr("href").and_then(|h| resolve_link(base, h)) {
                if !links.contains(&link) {
                    links.push(link);
                }
            }
        }
    }

    Page { title, text, links }
}

fn visible_text(root: ElementRef<'_>) -> String {
    let mut lines = Vec::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .map(|e| SKIPPED_ELEMENTS.contains(&e.name()))
                .unwrap_or(false)
        });
        if hidden {
            continue;
        }
        let line = collapse_whitespace(text);
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines.join("\n")
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Resolve an `href` against `base`, keeping only `http(s)` targets.
pub fn resolve_link(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let mut url = base.join(href).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

/// Whether a `Content-Type` header value denotes HTML.
pub fn is_html(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.starts_with("text/html") || ct.starts_with("application/xhtml")
}
