//! Document registry abstraction.
//!
//! The [`Registry`] trait is the durable map `document id → RegistryEntry`
//! that makes upserts idempotent. The engine only ever calls these
//! operations; each backend owns the consistency of its own storage and
//! must tolerate concurrent calls from the scheduler loop and from
//! on-demand triggers.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`get`](Registry::get) | Look up the entry for one document |
//! | [`put`](Registry::put) | Insert or overwrite an entry |
//! | [`remove`](Registry::remove) | Delete one entry |
//! | [`clear`](Registry::clear) | Delete every entry |
//! | [`count`](Registry::count) / [`count_by_collection`](Registry::count_by_collection) | Entry counts |
//! | [`list_ids`](Registry::list_ids) / [`list_ids_by_collection`](Registry::list_ids_by_collection) | Known ids |
//! | [`list_collections`](Registry::list_collections) | Distinct collection names |
//! | [`find_orphans`](Registry::find_orphans) | Registered ids outside a keep set |
//! | [`mark_sync_complete`](Registry::mark_sync_complete) / [`sync_info`](Registry::sync_info) | Last full-sync bookkeeping |

pub mod memory;

use std::collections::{BTreeSet, HashSet};

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{RegistryEntry, SyncInfo};

#[async_trait]
pub trait Registry: Send + Sync {
    async fn get(&self, document_id: &str) -> Result<Option<RegistryEntry>>;

    async fn put(&self, entry: &RegistryEntry) -> Result<()>;

    async fn remove(&self, document_id: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;

    async fn count(&self) -> Result<usize>;

    async fn count_by_collection(&self, collection: &str) -> Result<usize>;

    async fn list_ids(&self) -> Result<BTreeSet<String>>;

    async fn list_ids_by_collection(&self, collection: &str) -> Result<BTreeSet<String>>;

    async fn list_collections(&self) -> Result<BTreeSet<String>>;

    /// Sum of `chunk_count` over all entries.
    async fn total_chunks(&self) -> Result<usize>;

    /// Registered ids that are not in `keep_ids`.
    async fn find_orphans(&self, keep_ids: &HashSet<String>) -> Result<BTreeSet<String>> {
        let ids = self.list_ids().await?;
        Ok(ids.into_iter().filter(|id| !keep_ids.contains(id)).collect())
    }

    /// Record that an external full sync finished now.
    async fn mark_sync_complete(&self) -> Result<()>;

    async fn sync_info(&self) -> Result<SyncInfo>;
}
