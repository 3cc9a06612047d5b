//! # ragbox core
//!
//! Runtime-agnostic logic for ragbox's incremental document sync: data
//! models, content fingerprinting, the registry and indexer traits with
//! in-memory implementations, the idempotent upsert engine, orphan pruning,
//! and schedule parsing.
//!
//! This crate has no tokio, sqlx, or network dependencies. Source
//! connectors, the SQLite registry, the HTTP indexer, and the scheduler loop
//! live in the `ragbox` application crate.

pub mod chunk;
pub mod engine;
pub mod error;
pub mod hash;
pub mod index;
pub mod models;
pub mod prune;
pub mod registry;
pub mod schedule;

pub use engine::{SyncEngine, UpsertRequest};
pub use error::{SyncError, SyncResult};
pub use index::Indexer;
pub use registry::Registry;
