//! URL list connector.
//!
//! Fetches each configured URL once per run, in order. HTML responses are
//! reduced to visible text; any other textual response is used verbatim.
//! One failed fetch fails the whole source.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;
use url::Url;

use ragbox_core::models::{Metadata, SourceDocument};

use crate::config::UrlSource;
use crate::html::{is_html, parse_page};
use crate::traits::{Connector, SourceContext};

/// `User-Agent` sent by every connector that speaks HTTP.
pub const USER_AGENT: &str = concat!("ragbox/", env!("CARGO_PKG_VERSION"));

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the HTTP client shared by a connector's requests.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()?)
}

pub struct UrlConnector {
    ctx: SourceContext,
    config: UrlSource,
}

impl UrlConnector {
    pub fn new(ctx: SourceContext, config: UrlSource) -> Self {
        Self { ctx, config }
    }
}

#[async_trait]
impl Connector for UrlConnector {
    fn name(&self) -> &str {
        &self.ctx.name
    }

    fn description(&self) -> &str {
        "Fetch a fixed list of URLs"
    }

    fn connector_type(&self) -> &str {
        "url"
    }

    async fn scan(&self) -> Result<Vec<SourceDocument>> {
        let client = http_client(DEFAULT_TIMEOUT)?;
        let mut documents = Vec::with_capacity(self.config.urls.len());
        for raw in &self.config.urls {
            documents.push(fetch_document(&client, &self.ctx, raw).await?);
        }
        Ok(documents)
    }
}

/// Fetch one URL and turn it into a document with id `{source}:{url}`.
pub async fn fetch_document(
    client: &reqwest::Client,
    ctx: &SourceContext,
    raw_url: &str,
) -> Result<SourceDocument> {
    let url = Url::parse(raw_url.trim()).with_context(|| format!("invalid URL '{}'", raw_url))?;
    let resp = client
        .get(url.clone())
        .send()
        .await
        .with_context(|| format!("failed to fetch {}", url))?;

    let status = resp.status();
    if !status.is_success() {
        bail!("fetching {} failed with HTTP {}", url, status);
    }
    let content_type = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("text/plain")
        .to_string();
    let body = resp
        .text()
        .await
        .with_context(|| format!("failed to read body of {}", url))?;

    let mut metadata = Metadata::new();
    metadata.insert("url".to_string(), url.to_string());
    metadata.insert("content_type".to_string(), content_type.clone());

    let content = if is_html(&content_type) {
        let page = parse_page(&body, &url);
        if let Some(title) = page.title {
            metadata.insert("title".to_string(), title);
        }
        page.text
    } else {
        body
    };

    debug!(source = %ctx.name, %url, bytes = content.len(), "fetched url");
    Ok(ctx.document(url.as_str(), content, metadata))
}
