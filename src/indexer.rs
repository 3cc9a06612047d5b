//! Bindings to the RAG collaborator.
//!
//! [`HttpIndexer`] talks to a remote collaborator over JSON:
//!
//! | Operation | Request | Response |
//! |-----------|---------|----------|
//! | ingest | `POST {url}/api/v1/index/documents` with `{documentId, content, metadata}` | `{"chunks": n}` |
//! | delete | `DELETE {url}/api/v1/index/documents/{documentId}` | any 2xx; 404 counts as deleted |
//!
//! Rate-limited (429) and 5xx responses, as well as network errors, are
//! retried with exponential backoff. Other 4xx responses fail immediately.
//!
//! With `provider = "memory"` the in-process [`MemoryIndexer`] is used
//! instead, which is only useful for dry runs and tests.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use ragbox_core::index::memory::MemoryIndexer;
use ragbox_core::index::Indexer;
use ragbox_core::models::Metadata;

use crate::config::{IndexConfig, IndexProvider};

const DOCUMENTS_PATH: [&str; 4] = ["api", "v1", "index", "documents"];

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestRequest<'a> {
    document_id: &'a str,
    content: &'a str,
    metadata: &'a Metadata,
}

#[derive(Deserialize)]
struct IngestResponse {
    chunks: usize,
}

pub struct HttpIndexer {
    client: reqwest::Client,
    base: Url,
    api_key: Option<String>,
    max_retries: u32,
}

impl HttpIndexer {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let raw = config
            .url
            .as_deref()
            .ok_or_else(|| anyhow!("index.url is required for the http provider"))?;
        let base = Url::parse(raw).with_context(|| format!("invalid index.url '{}'", raw))?;
        if base.cannot_be_a_base() {
            bail!("index.url '{}' cannot be used as a base URL", raw);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base,
            api_key: config.api_key.clone(),
            max_retries: config.max_retries,
        })
    }

    fn documents_url(&self, document_id: Option<&str>) -> Result<Url> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| anyhow!("index.url cannot be a base URL"))?;
            segments.pop_if_empty();
            segments.extend(DOCUMENTS_PATH);
            if let Some(id) = document_id {
                segments.push(id);
            }
        }
        Ok(url)
    }

    /// Send a request, retrying transient failures. Returns the final
    /// response whatever its status, or the last network error.
    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&IngestRequest<'_>>,
    ) -> Result<reqwest::Response> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut req = self.client.request(method.clone(), url.clone());
            if let Some(key) = &self.api_key {
                req = req.bearer_auth(key);
            }
            if let Some(body) = body {
                req = req.json(body);
            }

            match req.send().await {
                Ok(resp)
                    if resp.status() == StatusCode::TOO_MANY_REQUESTS
                        || resp.status().is_server_error() =>
                {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    warn!(%status, attempt, "index request failed, will retry");
                    last_err = Some(anyhow!("index API error {}: {}", status, truncate(&text)));
                }
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    warn!(error = %e, attempt, "index request failed, will retry");
                    last_err = Some(e.into());
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("index request failed after retries")))
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(500).collect()
}

#[async_trait]
impl Indexer for HttpIndexer {
    async fn ingest_text(
        &self,
        content: &str,
        document_id: &str,
        metadata: &Metadata,
    ) -> Result<usize> {
        let body = IngestRequest {
            document_id,
            content,
            metadata,
        };
        let resp = self
            .send(Method::POST, self.documents_url(None)?, Some(&body))
            .await
            .with_context(|| format!("failed to ingest '{}'", document_id))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!(
                "index rejected '{}' (HTTP {}): {}",
                document_id,
                status,
                truncate(&text)
            );
        }

        let parsed: IngestResponse = resp
            .json()
            .await
            .with_context(|| format!("invalid ingest response for '{}'", document_id))?;
        debug!(document_id, chunks = parsed.chunks, "ingested");
        Ok(parsed.chunks)
    }

    async fn delete_document(&self, document_id: &str) -> Result<()> {
        let resp = self
            .send(Method::DELETE, self.documents_url(Some(document_id))?, None)
            .await
            .with_context(|| format!("failed to delete '{}'", document_id))?;

        let status = resp.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        bail!(
            "index refused to delete '{}' (HTTP {}): {}",
            document_id,
            status,
            truncate(&text)
        )
    }
}

/// Build the indexer selected by `[index]`.
pub fn build_indexer(config: &IndexConfig) -> Result<Arc<dyn Indexer>> {
    match config.provider {
        IndexProvider::Http => {
            let indexer = HttpIndexer::new(config)?;
            info!(url = %indexer.base, "using HTTP index");
            Ok(Arc::new(indexer))
        }
        IndexProvider::Memory => {
            info!("using in-memory index; indexed content is discarded on exit");
            Ok(Arc::new(MemoryIndexer::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indexer(url: &str) -> HttpIndexer {
        HttpIndexer::new(&IndexConfig {
            provider: IndexProvider::Http,
            url: Some(url.to_string()),
            ..IndexConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn document_urls_escape_ids() {
        let idx = indexer("http://localhost:8080");
        assert_eq!(
            idx.documents_url(None).unwrap().as_str(),
            "http://localhost:8080/api/v1/index/documents"
        );
        assert_eq!(
            idx.documents_url(Some("docs:guide/intro.md")).unwrap().as_str(),
            "http://localhost:8080/api/v1/index/documents/docs:guide%2Fintro.md"
        );
    }

    #[test]
    fn base_path_is_preserved() {
        let idx = indexer("http://rag.internal/prefix/");
        assert_eq!(
            idx.documents_url(None).unwrap().as_str(),
            "http://rag.internal/prefix/api/v1/index/documents"
        );
    }

    #[test]
    fn missing_url_is_an_error() {
        assert!(HttpIndexer::new(&IndexConfig {
            provider: IndexProvider::Http,
            ..IndexConfig::default()
        })
        .is_err());
    }
}
