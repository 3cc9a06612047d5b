//! Core data models shared by the sync engine, the registry, and the
//! application crate.
//!
//! These types describe the documents that flow from source connectors
//! into the upsert engine, the durable registry records that make upserts
//! idempotent, and the per-source results surfaced as run status.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// String-to-string metadata attached to documents and registry entries.
///
/// A `BTreeMap` keeps serialization order stable, which matters for
/// `metadata_json` columns and test fixtures.
pub type Metadata = BTreeMap<String, String>;

/// A document tuple produced by a source connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    /// Identifier stable across runs (e.g. `"docs:guide/intro.md"`).
    pub document_id: String,
    /// Full text content.
    pub content: String,
    /// Metadata, already merged with the source's configured metadata and
    /// the `source` tag.
    pub metadata: Metadata,
}

impl SourceDocument {
    pub fn new(document_id: impl Into<String>, content: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            document_id: document_id.into(),
            content: content.into(),
            metadata,
        }
    }
}

/// Durable record of the last indexed state of one document.
///
/// Created on the first successful ingest of a document id, rewritten on
/// every content change, and removed only by an explicit delete or by the
/// pruner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub document_id: String,
    /// Fingerprint of the last indexed content. Empty while a change is in
    /// flight (see [`RegistryEntry::is_dirty`]).
    pub content_hash: String,
    pub chunk_count: usize,
    pub metadata: Metadata,
    pub collection: Option<String>,
    pub indexed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RegistryEntry {
    /// An entry whose fingerprint was cleared before re-indexing started.
    ///
    /// A dirty entry never matches a real fingerprint, so the next upsert
    /// for its id re-indexes the content.
    pub fn is_dirty(&self) -> bool {
        self.content_hash.is_empty()
    }
}

/// What an upsert did with a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertAction {
    Created,
    Updated,
    Unchanged,
}

impl UpsertAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpsertAction::Created => "created",
            UpsertAction::Updated => "updated",
            UpsertAction::Unchanged => "unchanged",
        }
    }
}

impl fmt::Display for UpsertAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single [`SyncEngine::upsert`](crate::engine::SyncEngine::upsert).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertOutcome {
    pub document_id: String,
    pub chunks: usize,
    pub action: UpsertAction,
    pub message: String,
}

/// Outcome of one source run.
///
/// `error` is set only when the whole source failed, in which case every
/// count is zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionResult {
    pub source_name: String,
    pub source_type: String,
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub error: Option<String>,
}

impl IngestionResult {
    /// Build the result of a source that failed before producing counts.
    pub fn source_failed(
        source_name: &str,
        source_type: &str,
        start_time: DateTime<Utc>,
        error: impl fmt::Display,
    ) -> Self {
        Self {
            source_name: source_name.to_string(),
            source_type: source_type.to_string(),
            added: 0,
            updated: 0,
            deleted: 0,
            unchanged: 0,
            failed: 0,
            start_time,
            end_time: Utc::now(),
            error: Some(error.to_string()),
        }
    }

    pub fn total_processed(&self) -> usize {
        self.added + self.updated + self.unchanged + self.failed
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn duration_ms(&self) -> i64 {
        (self.end_time - self.start_time).num_milliseconds()
    }
}

/// Running counters for a source pass, frozen into an [`IngestionResult`]
/// by [`IngestionTally::finish`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestionTally {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl IngestionTally {
    pub fn record(&mut self, action: UpsertAction) {
        match action {
            UpsertAction::Created => self.added += 1,
            UpsertAction::Updated => self.updated += 1,
            UpsertAction::Unchanged => self.unchanged += 1,
        }
    }

    pub fn finish(
        self,
        source_name: &str,
        source_type: &str,
        start_time: DateTime<Utc>,
    ) -> IngestionResult {
        IngestionResult {
            source_name: source_name.to_string(),
            source_type: source_type.to_string(),
            added: self.added,
            updated: self.updated,
            deleted: self.deleted,
            unchanged: self.unchanged,
            failed: self.failed,
            start_time,
            end_time: Utc::now(),
            error: None,
        }
    }
}

/// Process-wide view of the most recent sync pass.
///
/// Replaced wholesale at the end of each pass; readers always see either the
/// previous or the next complete snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub running: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub last_results: Vec<IngestionResult>,
    pub next_scheduled_run: Option<DateTime<Utc>>,
}

/// Registry-level bookkeeping for keep-set syncs driven by external callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncInfo {
    pub last_sync_time: Option<DateTime<Utc>>,
    pub document_count: usize,
    pub chunk_count: usize,
}

/// Result of [`SyncEngine::sync`](crate::engine::SyncEngine::sync).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub pruned_count: usize,
    pub info: SyncInfo,
}
