//! Sequential driver over the configured sources.
//!
//! Passes (`run_all`, `run_source`) are serialized by an async mutex so a
//! scheduled pass and a manual trigger never interleave. [`SyncStatus`] sits
//! behind its own lock and is replaced wholesale when a pass ends, so
//! `status()` never waits for a running pass and never sees a half-written
//! snapshot.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use ragbox_core::models::{IngestionResult, Metadata, SyncStatus};
use ragbox_core::SyncEngine;

use crate::config::{default_file_patterns, DirectorySource, SourceConfig, UrlSource};
use crate::connector_dir::DirectoryConnector;
use crate::connector_url::UrlConnector;
use crate::runner::SourceRunner;
use crate::traits::SourceContext;

/// Source name given to `ingest_directory` documents.
pub const ADHOC_DIRECTORY_SOURCE: &str = "ingest-dir";
/// Source name given to `ingest_urls` documents.
pub const ADHOC_URL_SOURCE: &str = "ingest-urls";

pub struct Orchestrator {
    runner: SourceRunner,
    sources: Vec<SourceConfig>,
    status: RwLock<SyncStatus>,
    run_lock: Mutex<()>,
}

impl Orchestrator {
    pub fn new(engine: Arc<SyncEngine>, sources: Vec<SourceConfig>) -> Self {
        Self {
            runner: SourceRunner::new(engine),
            sources,
            status: RwLock::new(SyncStatus::default()),
            run_lock: Mutex::new(()),
        }
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        self.runner.engine()
    }

    /// Run every enabled source in configuration order.
    ///
    /// A failing source is recorded in its result and the next one still
    /// runs. The status snapshot is replaced once all sources finished.
    pub async fn run_all(&self) -> Vec<IngestionResult> {
        let _guard = self.run_lock.lock().await;
        let run_id = Uuid::new_v4();
        self.set_running(true).await;

        let enabled: Vec<&SourceConfig> = self.sources.iter().filter(|s| s.enabled).collect();
        info!(%run_id, sources = enabled.len(), "sync pass started");

        let mut results = Vec::with_capacity(enabled.len());
        for source in enabled {
            results.push(self.runner.run(source).await);
        }

        let failed = results.iter().filter(|r| !r.is_success()).count();
        if failed > 0 {
            warn!(%run_id, failed, total = results.len(), "sync pass finished with failures");
        } else {
            info!(%run_id, total = results.len(), "sync pass finished");
        }

        let mut status = self.status.write().await;
        let next_scheduled_run = status.next_scheduled_run;
        *status = SyncStatus {
            running: false,
            last_run: Some(Utc::now()),
            last_results: results.clone(),
            next_scheduled_run,
        };
        results
    }

    /// Run one configured source by name, enabled or not.
    ///
    /// Returns `None` for an unknown name. Only this source's entry in
    /// `last_results` is replaced.
    pub async fn run_source(&self, name: &str) -> Option<IngestionResult> {
        let source = self.sources.iter().find(|s| s.name == name)?;

        let _guard = self.run_lock.lock().await;
        let run_id = Uuid::new_v4();
        info!(%run_id, source = %name, enabled = source.enabled, "single-source run started");
        self.set_running(true).await;

        let result = self.runner.run(source).await;

        let mut status = self.status.write().await;
        let mut last_results = status.last_results.clone();
        match last_results.iter_mut().find(|r| r.source_name == name) {
            Some(slot) => *slot = result.clone(),
            None => last_results.push(result.clone()),
        }
        let next_scheduled_run = status.next_scheduled_run;
        *status = SyncStatus {
            running: false,
            last_run: Some(Utc::now()),
            last_results,
            next_scheduled_run,
        };
        Some(result)
    }

    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    pub fn list_sources(&self) -> &[SourceConfig] {
        &self.sources
    }

    /// Record when the scheduler will next call [`run_all`](Self::run_all).
    pub async fn set_next_run(&self, at: Option<DateTime<Utc>>) {
        let mut status = self.status.write().await;
        let mut next = status.clone();
        next.next_scheduled_run = at;
        *status = next;
    }

    /// One-shot full ingest of a directory outside the configured sources.
    ///
    /// Empty `patterns` means the default text patterns (`md`, `txt`).
    pub async fn ingest_directory(
        &self,
        path: impl Into<PathBuf>,
        patterns: Vec<String>,
        recursive: bool,
        metadata: Metadata,
    ) -> IngestionResult {
        let config = DirectorySource {
            path: path.into(),
            file_patterns: if patterns.is_empty() {
                default_file_patterns()
            } else {
                patterns
            },
            recursive,
            max_depth: None,
        };
        let connector =
            DirectoryConnector::new(SourceContext::new(ADHOC_DIRECTORY_SOURCE, metadata), config);
        self.runner.run_once(&connector).await
    }

    /// One-shot full ingest of a URL list outside the configured sources.
    pub async fn ingest_urls(&self, urls: Vec<String>, metadata: Metadata) -> IngestionResult {
        let connector = UrlConnector::new(
            SourceContext::new(ADHOC_URL_SOURCE, metadata),
            UrlSource { urls },
        );
        self.runner.run_once(&connector).await
    }

    async fn set_running(&self, running: bool) {
        let mut status = self.status.write().await;
        let mut next = status.clone();
        next.running = running;
        *status = next;
    }
}
