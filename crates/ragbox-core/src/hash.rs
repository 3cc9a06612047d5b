//! Content fingerprinting.
//!
//! Documents are fingerprinted with SHA-256 and hex-encoded. The same digest
//! is what SDK callers compute client-side when they pass a pre-computed
//! hash to [`SyncEngine::upsert`](crate::engine::SyncEngine::upsert), so the
//! encoding must stay lowercase hex.

use sha2::{Digest, Sha256};

/// Compute the lowercase hex SHA-256 of `content`.
///
/// ```rust
/// use ragbox_core::hash::content_hash;
///
/// assert_eq!(content_hash("a"), content_hash(b"a".as_slice()));
/// assert_eq!(content_hash("").len(), 64);
/// ```
pub fn content_hash(content: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_ref());
    format!("{:x}", hasher.finalize())
}
