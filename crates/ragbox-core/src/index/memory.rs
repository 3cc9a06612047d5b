//! In-memory [`Indexer`] used by tests and `provider = "memory"` runs.
//!
//! Splits content with [`split_text`](crate::chunk::split_text) and keeps
//! the chunks per document. Replacement is atomic: the new chunks are
//! computed before the old ones are swapped out under the write lock.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::chunk::split_text;
use crate::models::Metadata;

use super::Indexer;

const DEFAULT_MAX_TOKENS: usize = 700;

struct IndexedDocument {
    chunks: Vec<String>,
    metadata: Metadata,
}

pub struct MemoryIndexer {
    max_tokens: usize,
    docs: RwLock<HashMap<String, IndexedDocument>>,
}

impl MemoryIndexer {
    pub fn new() -> Self {
        Self::with_max_tokens(DEFAULT_MAX_TOKENS)
    }

    pub fn with_max_tokens(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            docs: RwLock::new(HashMap::new()),
        }
    }

    pub fn contains(&self, document_id: &str) -> bool {
        self.docs
            .read()
            .map(|docs| docs.contains_key(document_id))
            .unwrap_or(false)
    }

    pub fn document_count(&self) -> usize {
        self.docs.read().map(|docs| docs.len()).unwrap_or(0)
    }

    /// Chunk texts currently indexed for `document_id`.
    pub fn chunks(&self, document_id: &str) -> Option<Vec<String>> {
        self.docs
            .read()
            .ok()
            .and_then(|docs| docs.get(document_id).map(|d| d.chunks.clone()))
    }

    pub fn metadata(&self, document_id: &str) -> Option<Metadata> {
        self.docs
            .read()
            .ok()
            .and_then(|docs| docs.get(document_id).map(|d| d.metadata.clone()))
    }

    fn store(&self, content: &str, document_id: &str, metadata: &Metadata) -> Result<usize> {
        let chunks = split_text(content, self.max_tokens);
        let count = chunks.len();
        self.docs
            .write()
            .map_err(|_| anyhow!("memory index lock poisoned"))?
            .insert(
                document_id.to_string(),
                IndexedDocument {
                    chunks,
                    metadata: metadata.clone(),
                },
            );
        Ok(count)
    }
}

impl Default for MemoryIndexer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Indexer for MemoryIndexer {
    async fn ingest_text(
        &self,
        content: &str,
        document_id: &str,
        metadata: &Metadata,
    ) -> Result<usize> {
        self.store(content, document_id, metadata)
    }

    async fn delete_document(&self, document_id: &str) -> Result<()> {
        self.docs
            .write()
            .map_err(|_| anyhow!("memory index lock poisoned"))?
            .remove(document_id);
        Ok(())
    }

    async fn replace_document(
        &self,
        content: &str,
        document_id: &str,
        metadata: &Metadata,
    ) -> Result<usize> {
        self.store(content, document_id, metadata)
    }
}
