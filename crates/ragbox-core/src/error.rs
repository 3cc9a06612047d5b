//! Typed error kinds for the sync subsystem.
//!
//! Connectors and backends report failures as `anyhow::Error`; the engine
//! classifies them into a [`SyncError`] so callers can apply the right
//! isolation policy. A [`SyncError::Registry`] must always propagate, since
//! without the registry an upsert cannot be idempotent.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed or unsupported configuration (source type, schedule, patterns).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A connector could not enumerate its source.
    #[error("adapter error: {0:#}")]
    Adapter(anyhow::Error),

    /// The RAG collaborator rejected an ingest or delete.
    #[error("indexing error: {0:#}")]
    Indexing(anyhow::Error),

    /// The registry backend is unavailable or failed.
    #[error("registry error: {0:#}")]
    Registry(anyhow::Error),
}

impl SyncError {
    pub fn is_registry(&self) -> bool {
        matches!(self, SyncError::Registry(_))
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
