//! # ragbox
//!
//! Incremental document sync for a RAG index.
//!
//! ragbox discovers documents in external sources, fingerprints their
//! content, and pushes only new or changed documents to the RAG
//! collaborator. Documents that disappear from a source are pruned from the
//! index. A daemon repeats the pass on a schedule.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌────────────┐   ┌─────────────┐
//! │  Connectors  │──▶│ SourceRunner │──▶│ SyncEngine │──▶│   Indexer   │
//! │ dir/url/db/  │   │ sync | full  │   │  upsert +  │   │ (RAG HTTP)  │
//! │  s3/crawl    │   │   ingest     │   │   prune    │   └─────────────┘
//! └──────────────┘   └──────┬───────┘   └─────┬──────┘
//!                           │                 ▼
//!                  ┌────────┴──────┐    ┌────────────┐
//!                  │ Orchestrator  │    │  Registry  │
//!                  │  + Scheduler  │    │  (SQLite)  │
//!                  └───────────────┘    └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ragbox init                     # create the registry database
//! ragbox sources                  # show configured sources
//! ragbox run                      # one pass over every enabled source
//! ragbox run docs                 # just the `docs` source
//! ragbox daemon                   # repeat on `[ingestion].schedule`
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and `INGEST_*` overrides |
//! | [`connector_dir`], [`connector_url`], [`connector_db`], [`connector_s3`], [`connector_web`] | Source connectors |
//! | [`runner`] | Runs one source: sync pass or full ingest |
//! | [`orchestrator`] | Sequential pass over all sources, status snapshot |
//! | [`scheduler`] | Interval loop for the daemon |
//! | [`sqlite_registry`] | SQLite registry backend |
//! | [`indexer`] | HTTP binding to the RAG collaborator |
//! | [`db`], [`migrate`] | Database connection and schema |

pub mod config;
pub mod connector_db;
pub mod connector_dir;
pub mod connector_s3;
pub mod connector_url;
pub mod connector_web;
pub mod db;
pub mod html;
pub mod indexer;
pub mod migrate;
pub mod orchestrator;
pub mod patterns;
pub mod runner;
pub mod scheduler;
pub mod sources;
pub mod sqlite_registry;
pub mod traits;

pub use ragbox_core;
