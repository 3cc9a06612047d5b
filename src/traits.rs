//! Connector trait and the per-source context connectors share.
//!
//! Every source kind has a connector that enumerates its documents as
//! [`SourceDocument`]s. Connectors never touch the registry or the index;
//! the [`SourceRunner`](crate::runner::SourceRunner) decides what to do
//! with what they return.

use anyhow::Result;
use async_trait::async_trait;

use ragbox_core::models::{Metadata, SourceDocument};

use crate::config::SourceConfig;

#[async_trait]
pub trait Connector: Send + Sync {
    /// The configured source name (e.g. `"docs"`).
    fn name(&self) -> &str;

    /// One-line description, shown by `ragbox sources`.
    fn description(&self) -> &str;

    /// Source type identifier (`"directory"`, `"web_crawl"`, …).
    fn connector_type(&self) -> &str;

    /// Enumerate the source's current documents, in a stable order.
    ///
    /// An error means the whole enumeration failed; callers must not treat
    /// a failed scan as "the source is now empty".
    async fn scan(&self) -> Result<Vec<SourceDocument>>;
}

/// Identity and metadata every document from one source carries.
#[derive(Debug, Clone)]
pub struct SourceContext {
    pub name: String,
    pub metadata: Metadata,
}

impl SourceContext {
    pub fn new(name: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            name: name.into(),
            metadata,
        }
    }

    pub fn from_config(source: &SourceConfig) -> Self {
        Self::new(source.name.clone(), source.metadata.clone())
    }

    /// Document id for an item identified by `local_id` within this source.
    pub fn document_id(&self, local_id: &str) -> String {
        format!("{}:{}", self.name, local_id)
    }

    /// Build a document, layering connector metadata, then configured
    /// metadata, then the `source` tag.
    pub fn document(&self, local_id: &str, content: String, extra: Metadata) -> SourceDocument {
        let mut metadata = extra;
        metadata.extend(self.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        metadata.insert("source".to_string(), self.name.clone());
        SourceDocument::new(self.document_id(local_id), content, metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_merges_metadata_and_tags_source() {
        let mut configured = Metadata::new();
        configured.insert("team".to_string(), "platform".to_string());
        configured.insert("path".to_string(), "overridden".to_string());
        configured.insert("source".to_string(), "spoofed".to_string());
        let ctx = SourceContext::new("docs", configured);

        let mut extra = Metadata::new();
        extra.insert("path".to_string(), "guide/intro.md".to_string());
        let doc = ctx.document("guide/intro.md", "body".to_string(), extra);

        assert_eq!(doc.document_id, "docs:guide/intro.md");
        assert_eq!(doc.metadata["team"], "platform");
        assert_eq!(doc.metadata["path"], "overridden");
        assert_eq!(doc.metadata["source"], "docs");
    }
}
