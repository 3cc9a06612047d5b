//! SQLite-backed [`Registry`] implementation.
//!
//! One row per document in `registry_entries`; metadata is stored as a JSON
//! object and timestamps as Unix milliseconds. Concurrent callers share the
//! pool, and SQLite serializes the writes.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use ragbox_core::models::{Metadata, RegistryEntry, SyncInfo};
use ragbox_core::registry::memory::InMemoryRegistry;
use ragbox_core::registry::Registry;

use crate::config::{RegistryBackend, RegistryConfig};
use crate::{db, migrate};

pub struct SqliteRegistry {
    pool: SqlitePool,
}

impl SqliteRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the database at `path` and make sure the schema exists.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Open the registry backend selected by `[registry]`.
pub async fn build_registry(config: &RegistryConfig) -> Result<Arc<dyn Registry>> {
    match config.backend {
        RegistryBackend::Sqlite => Ok(Arc::new(SqliteRegistry::open(&config.path).await?)),
        RegistryBackend::Memory => Ok(Arc::new(InMemoryRegistry::new())),
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn row_to_entry(row: &SqliteRow) -> Result<RegistryEntry> {
    let document_id: String = row.get("document_id");
    let metadata_json: String = row.get("metadata_json");
    let metadata: Metadata = serde_json::from_str(&metadata_json)
        .with_context(|| format!("corrupt metadata_json for '{}'", document_id))?;
    let chunk_count: i64 = row.get("chunk_count");

    Ok(RegistryEntry {
        document_id,
        content_hash: row.get("content_hash"),
        chunk_count: usize::try_from(chunk_count).unwrap_or(0),
        metadata,
        collection: row.get("collection"),
        indexed_at: millis_to_datetime(row.get("indexed_at")),
        updated_at: millis_to_datetime(row.get("updated_at")),
    })
}

#[async_trait]
impl Registry for SqliteRegistry {
    async fn get(&self, document_id: &str) -> Result<Option<RegistryEntry>> {
        let row = sqlx::query(
            "SELECT document_id, content_hash, chunk_count, metadata_json, collection, indexed_at, updated_at
             FROM registry_entries WHERE document_id = ?",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_entry).transpose()
    }

    async fn put(&self, entry: &RegistryEntry) -> Result<()> {
        let metadata_json = serde_json::to_string(&entry.metadata)?;
        sqlx::query(
            r#"
            INSERT INTO registry_entries (document_id, content_hash, chunk_count, metadata_json,
                                          collection, indexed_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(document_id) DO UPDATE SET
                content_hash = excluded.content_hash,
                chunk_count = excluded.chunk_count,
                metadata_json = excluded.metadata_json,
                collection = excluded.collection,
                indexed_at = excluded.indexed_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&entry.document_id)
        .bind(&entry.content_hash)
        .bind(entry.chunk_count as i64)
        .bind(&metadata_json)
        .bind(&entry.collection)
        .bind(entry.indexed_at.timestamp_millis())
        .bind(entry.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, document_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM registry_entries WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM registry_entries")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM registry_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn count_by_collection(&self, collection: &str) -> Result<usize> {
        let n: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM registry_entries WHERE collection = ?")
                .bind(collection)
                .fetch_one(&self.pool)
                .await?;
        Ok(n as usize)
    }

    async fn list_ids(&self) -> Result<BTreeSet<String>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT document_id FROM registry_entries")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().collect())
    }

    async fn list_ids_by_collection(&self, collection: &str) -> Result<BTreeSet<String>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT document_id FROM registry_entries WHERE collection = ?")
                .bind(collection)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids.into_iter().collect())
    }

    async fn list_collections(&self) -> Result<BTreeSet<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT collection FROM registry_entries WHERE collection IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(names.into_iter().collect())
    }

    async fn total_chunks(&self) -> Result<usize> {
        let n: i64 =
            sqlx::query_scalar("SELECT COALESCE(SUM(chunk_count), 0) FROM registry_entries")
                .fetch_one(&self.pool)
                .await?;
        Ok(n as usize)
    }

    async fn mark_sync_complete(&self) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (id, last_sync_at) VALUES (1, ?)
            ON CONFLICT(id) DO UPDATE SET last_sync_at = excluded.last_sync_at
            "#,
        )
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn sync_info(&self) -> Result<SyncInfo> {
        let last_sync: Option<i64> =
            sqlx::query_scalar::<_, Option<i64>>("SELECT last_sync_at FROM sync_state WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?
                .flatten();

        Ok(SyncInfo {
            last_sync_time: last_sync.map(millis_to_datetime),
            document_count: self.count().await?,
            chunk_count: self.total_chunks().await?,
        })
    }
}
