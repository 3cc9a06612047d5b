//! Runs one configured source end to end.
//!
//! Sources fall into two families:
//!
//! - **Incremental** (directory, object store, web crawl): every scanned
//!   document goes through [`SyncEngine::upsert_request`] under the source's
//!   collection, then registered ids the scan no longer produced are pruned.
//!   Any error fails the whole source.
//! - **Full ingest** (URL list, database): every document is re-indexed
//!   unconditionally and nothing is registered or pruned. A URL source
//!   fails as a whole; a database source isolates failures per row and
//!   reports them in `failed`.
//!
//! The runner never returns an error: failures end up in
//! [`IngestionResult::error`], so one broken source cannot stop the
//! orchestrator from running the next.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use ragbox_core::models::{IngestionResult, IngestionTally};
use ragbox_core::{SyncEngine, SyncError, SyncResult, UpsertRequest};

use crate::config::{SourceConfig, SourceKind};
use crate::connector_db::DatabaseConnector;
use crate::connector_dir::DirectoryConnector;
use crate::connector_s3::ObjectStoreConnector;
use crate::connector_url::UrlConnector;
use crate::connector_web::WebCrawlConnector;
use crate::traits::{Connector, SourceContext};

/// Build the connector for a configured source.
pub fn connector_for(source: &SourceConfig) -> Box<dyn Connector> {
    let ctx = SourceContext::from_config(source);
    match &source.kind {
        SourceKind::Directory(c) => Box::new(DirectoryConnector::new(ctx, c.clone())),
        SourceKind::Url(c) => Box::new(UrlConnector::new(ctx, c.clone())),
        SourceKind::Database(c) => Box::new(DatabaseConnector::new(ctx, c.clone())),
        SourceKind::ObjectStore(c) => Box::new(ObjectStoreConnector::new(ctx, c.clone())),
        SourceKind::WebCrawl(c) => Box::new(WebCrawlConnector::new(ctx, c.clone())),
    }
}

#[derive(Clone)]
pub struct SourceRunner {
    engine: Arc<SyncEngine>,
}

impl SourceRunner {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Run `source` once and report what happened.
    pub async fn run(&self, source: &SourceConfig) -> IngestionResult {
        let start = Utc::now();
        let source_type = source.source_type();

        let tally = match &source.kind {
            SourceKind::Directory(_) | SourceKind::ObjectStore(_) | SourceKind::WebCrawl(_) => {
                self.sync_pass(&source.name, connector_for(source).as_ref())
                    .await
            }
            SourceKind::Url(_) => self.full_ingest(connector_for(source).as_ref()).await,
            SourceKind::Database(db) => {
                let connector = DatabaseConnector::new(SourceContext::from_config(source), db.clone());
                self.ingest_rows(&connector).await
            }
        };

        self.finish(&source.name, source_type, start, tally)
    }

    /// Full ingest of an unregistered, ad-hoc connector (`ingest-dir`,
    /// `ingest-urls`).
    pub async fn run_once(&self, connector: &dyn Connector) -> IngestionResult {
        let start = Utc::now();
        let tally = self.full_ingest(connector).await;
        self.finish(connector.name(), connector.connector_type(), start, tally)
    }

    fn finish(
        &self,
        name: &str,
        source_type: &str,
        start: chrono::DateTime<Utc>,
        tally: SyncResult<IngestionTally>,
    ) -> IngestionResult {
        match tally {
            Ok(tally) => {
                let result = tally.finish(name, source_type, start);
                info!(
                    source = %name,
                    source_type,
                    added = result.added,
                    updated = result.updated,
                    deleted = result.deleted,
                    unchanged = result.unchanged,
                    failed = result.failed,
                    duration_ms = result.duration_ms(),
                    "source finished"
                );
                result
            }
            Err(e) => {
                error!(source = %name, source_type, error = %e, "source failed");
                IngestionResult::source_failed(name, source_type, start, e)
            }
        }
    }

    /// Upsert every scanned document, then prune the source's orphans.
    async fn sync_pass(&self, name: &str, connector: &dyn Connector) -> SyncResult<IngestionTally> {
        let documents = connector.scan().await.map_err(SyncError::Adapter)?;

        let mut tally = IngestionTally::default();
        let mut seen = HashSet::with_capacity(documents.len());
        for doc in &documents {
            let outcome = self
                .engine
                .upsert_request(UpsertRequest::from_document(doc).in_collection(Some(name)))
                .await?;
            tally.record(outcome.action);
            seen.insert(doc.document_id.clone());
        }

        tally.deleted = self.engine.pruner().prune_collection(name, &seen).await?;
        Ok(tally)
    }

    /// Re-index everything the connector returns; the first failure fails
    /// the source.
    async fn full_ingest(&self, connector: &dyn Connector) -> SyncResult<IngestionTally> {
        let documents = connector.scan().await.map_err(SyncError::Adapter)?;

        let mut tally = IngestionTally::default();
        for doc in &documents {
            self.engine
                .indexer()
                .replace_document(&doc.content, &doc.document_id, &doc.metadata)
                .await
                .map_err(SyncError::Indexing)?;
            tally.added += 1;
        }
        Ok(tally)
    }

    /// Database ingest: a bad row or a rejected ingest counts as `failed`
    /// and the remaining rows still run.
    async fn ingest_rows(&self, connector: &DatabaseConnector) -> SyncResult<IngestionTally> {
        let rows = connector.scan_rows().await.map_err(SyncError::Adapter)?;

        let mut tally = IngestionTally::default();
        for row in rows {
            let doc = match row {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(source = %connector.name(), error = %format!("{:#}", e), "row failed");
                    tally.failed += 1;
                    continue;
                }
            };
            match self
                .engine
                .indexer()
                .replace_document(&doc.content, &doc.document_id, &doc.metadata)
                .await
            {
                Ok(_) => tally.added += 1,
                Err(e) => {
                    warn!(
                        source = %connector.name(),
                        document_id = %doc.document_id,
                        error = %format!("{:#}", e),
                        "row failed to index"
                    );
                    tally.failed += 1;
                }
            }
        }
        Ok(tally)
    }
}
