//! Idempotent document upsert.
//!
//! [`SyncEngine`] classifies each incoming document against the registry
//! and drives the RAG collaborator only when content actually changed:
//!
//! ```text
//!              registry.get(id)
//!                    │
//!      ┌─────────────┼──────────────────────┐
//!      ▼             ▼                      ▼
//!    absent     same fingerprint     different fingerprint
//!      │             │                      │
//!   replace     return unchanged     mark entry dirty
//!   put entry   (no index calls)     replace indexed content
//!   created                          commit new entry
//!                                    updated
//! ```
//!
//! A change marks the registry entry dirty (empty fingerprint) before the
//! collaborator is touched and commits the new fingerprint only after the
//! replacement succeeded. Any failure in between leaves a dirty entry, which
//! the next pass re-indexes, instead of an entry claiming content that is no
//! longer in the index.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::hash::content_hash;
use crate::index::Indexer;
use crate::models::{
    Metadata, RegistryEntry, SourceDocument, SyncInfo, SyncReport, UpsertAction, UpsertOutcome,
};
use crate::prune::Pruner;
use crate::registry::Registry;

/// One document to upsert.
#[derive(Debug, Clone, Copy)]
pub struct UpsertRequest<'a> {
    pub document_id: &'a str,
    pub content: &'a str,
    pub metadata: &'a Metadata,
    /// Fingerprint computed by the caller. Trusted without verification.
    pub content_hash: Option<&'a str>,
    pub collection: Option<&'a str>,
}

impl<'a> UpsertRequest<'a> {
    pub fn new(document_id: &'a str, content: &'a str, metadata: &'a Metadata) -> Self {
        Self {
            document_id,
            content,
            metadata,
            content_hash: None,
            collection: None,
        }
    }

    pub fn from_document(doc: &'a SourceDocument) -> Self {
        Self::new(&doc.document_id, &doc.content, &doc.metadata)
    }

    pub fn with_hash(mut self, hash: Option<&'a str>) -> Self {
        self.content_hash = hash;
        self
    }

    pub fn in_collection(mut self, collection: Option<&'a str>) -> Self {
        self.collection = collection;
        self
    }
}

/// Upsert engine over a [`Registry`] and an [`Indexer`].
#[derive(Clone)]
pub struct SyncEngine {
    registry: Arc<dyn Registry>,
    indexer: Arc<dyn Indexer>,
}

impl SyncEngine {
    pub fn new(registry: Arc<dyn Registry>, indexer: Arc<dyn Indexer>) -> Self {
        Self { registry, indexer }
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    pub fn indexer(&self) -> &Arc<dyn Indexer> {
        &self.indexer
    }

    pub fn pruner(&self) -> Pruner {
        Pruner::new(self.registry.clone(), self.indexer.clone())
    }

    /// Create or update `document_id`, skipping the collaborator entirely
    /// when the fingerprint is unchanged.
    pub async fn upsert(
        &self,
        document_id: &str,
        content: &str,
        metadata: &Metadata,
        provided_hash: Option<&str>,
    ) -> SyncResult<UpsertOutcome> {
        self.upsert_request(
            UpsertRequest::new(document_id, content, metadata).with_hash(provided_hash),
        )
        .await
    }

    pub async fn upsert_request(&self, req: UpsertRequest<'_>) -> SyncResult<UpsertOutcome> {
        let hash = match req.content_hash.map(str::trim) {
            Some(h) if !h.is_empty() => h.to_string(),
            _ => content_hash(req.content),
        };

        let existing = self
            .registry
            .get(req.document_id)
            .await
            .map_err(SyncError::Registry)?;

        match existing {
            None => self.create(req, hash).await,
            Some(entry) if entry.content_hash == hash => {
                debug!(document_id = %req.document_id, "content unchanged");
                self.adopt_collection(&req, entry.clone()).await?;
                Ok(UpsertOutcome {
                    document_id: req.document_id.to_string(),
                    chunks: entry.chunk_count,
                    action: UpsertAction::Unchanged,
                    message: "Content unchanged, skipped re-indexing".to_string(),
                })
            }
            Some(entry) => self.update(req, hash, entry).await,
        }
    }

    /// Move an unchanged entry into the requested collection, so a document
    /// first upserted by hand is pruned with the source that now produces it.
    async fn adopt_collection(
        &self,
        req: &UpsertRequest<'_>,
        mut entry: RegistryEntry,
    ) -> SyncResult<()> {
        let Some(collection) = req.collection else {
            return Ok(());
        };
        if entry.collection.as_deref() == Some(collection) {
            return Ok(());
        }
        entry.collection = Some(collection.to_string());
        entry.updated_at = Utc::now();
        self.registry
            .put(&entry)
            .await
            .map_err(SyncError::Registry)
    }

    /// The id is unregistered, but the index may still hold content from a
    /// pass whose registry write failed, so creation replaces rather than
    /// appends.
    async fn create(&self, req: UpsertRequest<'_>, hash: String) -> SyncResult<UpsertOutcome> {
        let chunks = self
            .indexer
            .replace_document(req.content, req.document_id, req.metadata)
            .await
            .map_err(SyncError::Indexing)?;

        let now = Utc::now();
        let entry = RegistryEntry {
            document_id: req.document_id.to_string(),
            content_hash: hash,
            chunk_count: chunks,
            metadata: req.metadata.clone(),
            collection: req.collection.map(str::to_string),
            indexed_at: now,
            updated_at: now,
        };
        self.registry
            .put(&entry)
            .await
            .map_err(SyncError::Registry)?;

        debug!(document_id = %req.document_id, chunks, "document created");
        Ok(UpsertOutcome {
            document_id: req.document_id.to_string(),
            chunks,
            action: UpsertAction::Created,
            message: format!("Document indexed with {} chunks", chunks),
        })
    }

    async fn update(
        &self,
        req: UpsertRequest<'_>,
        hash: String,
        mut entry: RegistryEntry,
    ) -> SyncResult<UpsertOutcome> {
        if !entry.is_dirty() {
            let mut dirty = entry.clone();
            dirty.content_hash.clear();
            self.registry
                .put(&dirty)
                .await
                .map_err(SyncError::Registry)?;
        }

        let chunks = self
            .indexer
            .replace_document(req.content, req.document_id, req.metadata)
            .await
            .map_err(SyncError::Indexing)?;

        entry.content_hash = hash;
        entry.chunk_count = chunks;
        entry.metadata = req.metadata.clone();
        if req.collection.is_some() {
            entry.collection = req.collection.map(str::to_string);
        }
        entry.updated_at = Utc::now();
        self.registry
            .put(&entry)
            .await
            .map_err(SyncError::Registry)?;

        debug!(document_id = %req.document_id, chunks, "document updated");
        Ok(UpsertOutcome {
            document_id: req.document_id.to_string(),
            chunks,
            action: UpsertAction::Updated,
            message: format!("Document re-indexed with {} chunks", chunks),
        })
    }

    /// Delete one document from the collaborator and the registry.
    ///
    /// Returns whether the registry knew the id.
    pub async fn delete(&self, document_id: &str) -> SyncResult<bool> {
        let known = self
            .registry
            .get(document_id)
            .await
            .map_err(SyncError::Registry)?
            .is_some();
        self.indexer
            .delete_document(document_id)
            .await
            .map_err(SyncError::Indexing)?;
        self.registry
            .remove(document_id)
            .await
            .map_err(SyncError::Registry)?;
        Ok(known)
    }

    /// Delete every registered document. Returns the number removed.
    pub async fn clear(&self) -> SyncResult<usize> {
        self.pruner().prune(&HashSet::new()).await
    }

    /// Finish an externally driven full sync: prune everything outside
    /// `keep_ids` (when given) and record the completion time.
    pub async fn sync(&self, keep_ids: Option<&HashSet<String>>) -> SyncResult<SyncReport> {
        let pruned_count = match keep_ids {
            Some(keep) => self.pruner().prune(keep).await?,
            None => 0,
        };
        self.registry
            .mark_sync_complete()
            .await
            .map_err(SyncError::Registry)?;
        let info = self.sync_info().await?;
        Ok(SyncReport { pruned_count, info })
    }

    pub async fn sync_info(&self) -> SyncResult<SyncInfo> {
        self.registry.sync_info().await.map_err(SyncError::Registry)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use anyhow::{bail, Result};
    use async_trait::async_trait;

    use super::*;
    use crate::index::memory::MemoryIndexer;
    use crate::registry::memory::InMemoryRegistry;

    /// Wraps a [`MemoryIndexer`], counting calls and optionally failing ingests.
    #[derive(Default)]
    struct CountingIndexer {
        inner: MemoryIndexer,
        ingests: AtomicUsize,
        deletes: AtomicUsize,
        fail_ingest: AtomicBool,
    }

    impl CountingIndexer {
        fn calls(&self) -> usize {
            self.ingests.load(Ordering::SeqCst) + self.deletes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Indexer for CountingIndexer {
        async fn ingest_text(&self, content: &str, id: &str, metadata: &Metadata) -> Result<usize> {
            self.ingests.fetch_add(1, Ordering::SeqCst);
            if self.fail_ingest.load(Ordering::SeqCst) {
                bail!("collaborator rejected {}", id);
            }
            self.inner.ingest_text(content, id, metadata).await
        }

        async fn delete_document(&self, id: &str) -> Result<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            self.inner.delete_document(id).await
        }
    }

    fn setup() -> (Arc<InMemoryRegistry>, Arc<CountingIndexer>, SyncEngine) {
        let registry = Arc::new(InMemoryRegistry::new());
        let indexer = Arc::new(CountingIndexer::default());
        let engine = SyncEngine::new(registry.clone(), indexer.clone());
        (registry, indexer, engine)
    }

    #[tokio::test]
    async fn second_identical_upsert_is_unchanged_without_index_calls() {
        let (_registry, indexer, engine) = setup();
        let meta = Metadata::new();

        let first = engine.upsert("doc-1", "hello", &meta, None).await.unwrap();
        assert_eq!(first.action, UpsertAction::Created);
        let calls_after_first = indexer.calls();

        let second = engine.upsert("doc-1", "hello", &meta, None).await.unwrap();
        assert_eq!(second.action, UpsertAction::Unchanged);
        assert_eq!(second.chunks, first.chunks);
        assert_eq!(indexer.calls(), calls_after_first);
    }

    #[tokio::test]
    async fn changed_content_is_updated_and_hash_stored() {
        let (registry, indexer, engine) = setup();
        let meta = Metadata::new();

        engine.upsert("doc-1", "content A", &meta, None).await.unwrap();
        let out = engine.upsert("doc-1", "content B", &meta, None).await.unwrap();
        assert_eq!(out.action, UpsertAction::Updated);

        let entry = registry.get("doc-1").await.unwrap().unwrap();
        assert_eq!(entry.content_hash, content_hash("content B"));
        assert_eq!(indexer.inner.chunks("doc-1").unwrap(), vec!["content B".to_string()]);
    }

    #[tokio::test]
    async fn provided_hash_is_trusted() {
        let (registry, _indexer, engine) = setup();
        let meta = Metadata::new();

        engine
            .upsert("doc-1", "body", &meta, Some("caller-hash"))
            .await
            .unwrap();
        assert_eq!(
            registry.get("doc-1").await.unwrap().unwrap().content_hash,
            "caller-hash"
        );

        // Different body, same caller hash: the engine does not re-verify.
        let out = engine
            .upsert("doc-1", "other body", &meta, Some("caller-hash"))
            .await
            .unwrap();
        assert_eq!(out.action, UpsertAction::Unchanged);
    }

    #[tokio::test]
    async fn failed_update_leaves_entry_dirty_for_resync() {
        let (registry, indexer, engine) = setup();
        let meta = Metadata::new();

        engine.upsert("doc-1", "v1", &meta, None).await.unwrap();
        indexer.fail_ingest.store(true, Ordering::SeqCst);

        let err = engine.upsert("doc-1", "v2", &meta, None).await.unwrap_err();
        assert!(matches!(err, SyncError::Indexing(_)));

        let entry = registry.get("doc-1").await.unwrap().unwrap();
        assert!(entry.is_dirty());

        // Reverting to the old content must still re-index, not report unchanged.
        indexer.fail_ingest.store(false, Ordering::SeqCst);
        let out = engine.upsert("doc-1", "v1", &meta, None).await.unwrap();
        assert_eq!(out.action, UpsertAction::Updated);
        assert!(indexer.inner.contains("doc-1"));
        assert!(!registry.get("doc-1").await.unwrap().unwrap().is_dirty());
    }

    #[tokio::test]
    async fn failed_create_writes_nothing() {
        let (registry, indexer, engine) = setup();
        indexer.fail_ingest.store(true, Ordering::SeqCst);

        let err = engine
            .upsert("doc-1", "body", &Metadata::new(), None)
            .await
            .unwrap_err();
        assert!(!err.is_registry());
        assert!(registry.get("doc-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn collection_is_recorded() {
        let (registry, _indexer, engine) = setup();
        let meta = Metadata::new();
        engine
            .upsert_request(UpsertRequest::new("doc-1", "body", &meta).in_collection(Some("docs")))
            .await
            .unwrap();
        assert_eq!(registry.count_by_collection("docs").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unchanged_document_joins_requested_collection() {
        let (registry, indexer, engine) = setup();
        let meta = Metadata::new();
        engine.upsert("docs:a.md", "body", &meta, None).await.unwrap();
        let calls = indexer.calls();

        let out = engine
            .upsert_request(
                UpsertRequest::new("docs:a.md", "body", &meta).in_collection(Some("docs")),
            )
            .await
            .unwrap();

        assert_eq!(out.action, UpsertAction::Unchanged);
        assert_eq!(indexer.calls(), calls);
        assert_eq!(
            registry.get("docs:a.md").await.unwrap().unwrap().collection.as_deref(),
            Some("docs")
        );
        assert_eq!(
            engine
                .pruner()
                .prune_collection("docs", &HashSet::new())
                .await
                .unwrap(),
            1
        );
    }

    /// Appends chunks on every ingest, like a collaborator without
    /// per-id replacement.
    #[derive(Default)]
    struct AppendingIndexer {
        chunks: std::sync::Mutex<std::collections::HashMap<String, Vec<String>>>,
    }

    impl AppendingIndexer {
        fn chunk_count(&self, id: &str) -> usize {
            self.chunks.lock().unwrap().get(id).map_or(0, Vec::len)
        }
    }

    #[async_trait]
    impl Indexer for AppendingIndexer {
        async fn ingest_text(&self, content: &str, id: &str, _: &Metadata) -> Result<usize> {
            let mut chunks = self.chunks.lock().unwrap();
            let doc = chunks.entry(id.to_string()).or_default();
            doc.push(content.to_string());
            Ok(doc.len())
        }

        async fn delete_document(&self, id: &str) -> Result<()> {
            self.chunks.lock().unwrap().remove(id);
            Ok(())
        }
    }

    /// Fails the next `put` when armed, then behaves like the inner registry.
    #[derive(Default)]
    struct FlakyRegistry {
        inner: InMemoryRegistry,
        fail_put: AtomicBool,
    }

    #[async_trait]
    impl Registry for FlakyRegistry {
        async fn get(&self, id: &str) -> Result<Option<RegistryEntry>> {
            self.inner.get(id).await
        }
        async fn put(&self, entry: &RegistryEntry) -> Result<()> {
            if self.fail_put.swap(false, Ordering::SeqCst) {
                bail!("registry unavailable");
            }
            self.inner.put(entry).await
        }
        async fn remove(&self, id: &str) -> Result<()> {
            self.inner.remove(id).await
        }
        async fn clear(&self) -> Result<()> {
            self.inner.clear().await
        }
        async fn count(&self) -> Result<usize> {
            self.inner.count().await
        }
        async fn count_by_collection(&self, c: &str) -> Result<usize> {
            self.inner.count_by_collection(c).await
        }
        async fn list_ids(&self) -> Result<std::collections::BTreeSet<String>> {
            self.inner.list_ids().await
        }
        async fn list_ids_by_collection(
            &self,
            c: &str,
        ) -> Result<std::collections::BTreeSet<String>> {
            self.inner.list_ids_by_collection(c).await
        }
        async fn list_collections(&self) -> Result<std::collections::BTreeSet<String>> {
            self.inner.list_collections().await
        }
        async fn total_chunks(&self) -> Result<usize> {
            self.inner.total_chunks().await
        }
        async fn mark_sync_complete(&self) -> Result<()> {
            self.inner.mark_sync_complete().await
        }
        async fn sync_info(&self) -> Result<SyncInfo> {
            self.inner.sync_info().await
        }
    }

    #[tokio::test]
    async fn create_after_lost_registry_write_does_not_duplicate_chunks() {
        let registry = Arc::new(FlakyRegistry::default());
        let indexer = Arc::new(AppendingIndexer::default());
        let engine = SyncEngine::new(registry.clone(), indexer.clone());
        let meta = Metadata::new();

        registry.fail_put.store(true, Ordering::SeqCst);
        let err = engine.upsert("doc-1", "body", &meta, None).await.unwrap_err();
        assert!(err.is_registry());
        assert_eq!(indexer.chunk_count("doc-1"), 1);

        let out = engine.upsert("doc-1", "body", &meta, None).await.unwrap();
        assert_eq!(out.action, UpsertAction::Created);
        assert_eq!(out.chunks, 1);
        assert_eq!(indexer.chunk_count("doc-1"), 1);
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let (registry, indexer, engine) = setup();
        let meta = Metadata::new();
        for id in ["a", "b", "c"] {
            engine.upsert(id, id, &meta, None).await.unwrap();
        }

        assert!(engine.delete("a").await.unwrap());
        assert!(!engine.delete("a").await.unwrap());
        assert!(!indexer.inner.contains("a"));

        assert_eq!(engine.clear().await.unwrap(), 2);
        assert_eq!(registry.count().await.unwrap(), 0);
        assert_eq!(indexer.inner.document_count(), 0);
    }

    #[tokio::test]
    async fn sync_prunes_and_marks_complete() {
        let (_registry, _indexer, engine) = setup();
        let meta = Metadata::new();
        for id in ["a", "b", "c"] {
            engine.upsert(id, id, &meta, None).await.unwrap();
        }

        let keep: HashSet<String> = ["a".to_string(), "c".to_string()].into();
        let report = engine.sync(Some(&keep)).await.unwrap();
        assert_eq!(report.pruned_count, 1);
        assert_eq!(report.info.document_count, 2);
        assert!(report.info.last_sync_time.is_some());

        let report = engine.sync(None).await.unwrap();
        assert_eq!(report.pruned_count, 0);
    }
}
