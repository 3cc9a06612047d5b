//! In-memory [`Registry`] implementation for tests and throwaway runs.
//!
//! Uses a `HashMap` behind `std::sync::RwLock`. Nothing survives a restart.

use std::collections::{BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{RegistryEntry, SyncInfo};

use super::Registry;

#[derive(Default)]
struct State {
    entries: HashMap<String, RegistryEntry>,
    last_sync: Option<DateTime<Utc>>,
}

/// Volatile registry keyed by document id.
#[derive(Default)]
pub struct InMemoryRegistry {
    state: RwLock<State>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| anyhow!("in-memory registry lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| anyhow!("in-memory registry lock poisoned"))
    }
}

#[async_trait]
impl Registry for InMemoryRegistry {
    async fn get(&self, document_id: &str) -> Result<Option<RegistryEntry>> {
        Ok(self.read()?.entries.get(document_id).cloned())
    }

    async fn put(&self, entry: &RegistryEntry) -> Result<()> {
        self.write()?
            .entries
            .insert(entry.document_id.clone(), entry.clone());
        Ok(())
    }

    async fn remove(&self, document_id: &str) -> Result<()> {
        self.write()?.entries.remove(document_id);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.write()?.entries.clear();
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read()?.entries.len())
    }

    async fn count_by_collection(&self, collection: &str) -> Result<usize> {
        Ok(self
            .read()?
            .entries
            .values()
            .filter(|e| e.collection.as_deref() == Some(collection))
            .count())
    }

    async fn list_ids(&self) -> Result<BTreeSet<String>> {
        Ok(self.read()?.entries.keys().cloned().collect())
    }

    async fn list_ids_by_collection(&self, collection: &str) -> Result<BTreeSet<String>> {
        Ok(self
            .read()?
            .entries
            .values()
            .filter(|e| e.collection.as_deref() == Some(collection))
            .map(|e| e.document_id.clone())
            .collect())
    }

    async fn list_collections(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .read()?
            .entries
            .values()
            .filter_map(|e| e.collection.clone())
            .collect())
    }

    async fn total_chunks(&self) -> Result<usize> {
        Ok(self.read()?.entries.values().map(|e| e.chunk_count).sum())
    }

    async fn mark_sync_complete(&self) -> Result<()> {
        self.write()?.last_sync = Some(Utc::now());
        Ok(())
    }

    async fn sync_info(&self) -> Result<SyncInfo> {
        let state = self.read()?;
        Ok(SyncInfo {
            last_sync_time: state.last_sync,
            document_count: state.entries.len(),
            chunk_count: state.entries.values().map(|e| e.chunk_count).sum(),
        })
    }
}
