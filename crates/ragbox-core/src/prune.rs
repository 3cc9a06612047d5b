//! Orphan pruning.
//!
//! An orphan is a registered document id that the caller no longer wants
//! indexed: either it is missing from an externally supplied keep set, or it
//! was not produced by its source's latest enumeration. Each orphan is
//! deleted from the collaborator first and from the registry second, so an
//! orphan whose index delete fails stays registered and is retried on the
//! next prune.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{SyncError, SyncResult};
use crate::index::Indexer;
use crate::registry::Registry;

pub struct Pruner {
    registry: Arc<dyn Registry>,
    indexer: Arc<dyn Indexer>,
}

impl Pruner {
    pub fn new(registry: Arc<dyn Registry>, indexer: Arc<dyn Indexer>) -> Self {
        Self { registry, indexer }
    }

    /// Delete every registered document whose id is not in `keep_ids`.
    ///
    /// Returns the number of orphans actually deleted. A failure on one
    /// orphan is logged and does not stop the others.
    pub async fn prune(&self, keep_ids: &HashSet<String>) -> SyncResult<usize> {
        let orphans = self
            .registry
            .find_orphans(keep_ids)
            .await
            .map_err(SyncError::Registry)?;
        Ok(self.delete_orphans(orphans).await)
    }

    /// Like [`prune`](Pruner::prune), restricted to one collection.
    pub async fn prune_collection(
        &self,
        collection: &str,
        keep_ids: &HashSet<String>,
    ) -> SyncResult<usize> {
        let orphans: BTreeSet<String> = self
            .registry
            .list_ids_by_collection(collection)
            .await
            .map_err(SyncError::Registry)?
            .into_iter()
            .filter(|id| !keep_ids.contains(id))
            .collect();
        Ok(self.delete_orphans(orphans).await)
    }

    async fn delete_orphans(&self, orphans: BTreeSet<String>) -> usize {
        if orphans.is_empty() {
            return 0;
        }

        let total = orphans.len();
        let mut deleted = 0;
        for id in orphans {
            if let Err(e) = self.indexer.delete_document(&id).await {
                warn!(document_id = %id, error = %e, "failed to delete orphan from index");
                continue;
            }
            if let Err(e) = self.registry.remove(&id).await {
                warn!(document_id = %id, error = %e, "failed to remove orphan from registry");
                continue;
            }
            deleted += 1;
        }

        info!(deleted, total, "pruned orphaned documents");
        deleted
    }
}
