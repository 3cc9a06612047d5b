//! Boundary to the RAG collaborator.
//!
//! Chunking, embedding, and vector storage live outside this codebase. The
//! [`Indexer`] trait is the narrow surface the sync engine drives: ingest a
//! document's text under its id, delete everything indexed under an id, or
//! replace one with the other.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Metadata;

#[async_trait]
pub trait Indexer: Send + Sync {
    /// Index `content` under `document_id`, returning the number of chunks
    /// the collaborator produced.
    async fn ingest_text(&self, content: &str, document_id: &str, metadata: &Metadata)
        -> Result<usize>;

    /// Remove everything indexed under `document_id`. Deleting an unknown id
    /// is not an error.
    async fn delete_document(&self, document_id: &str) -> Result<()>;

    /// Swap the indexed content of `document_id` for `content`.
    ///
    /// The default deletes then ingests, so a failure between the two steps
    /// leaves nothing indexed for the id. Collaborators that can swap
    /// atomically should override this.
    async fn replace_document(
        &self,
        content: &str,
        document_id: &str,
        metadata: &Metadata,
    ) -> Result<usize> {
        self.delete_document(document_id).await?;
        self.ingest_text(content, document_id, metadata).await
    }
}
