//! End-to-end sync passes over directory sources with a SQLite registry.

mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tempfile::TempDir;

use common::FlakyIndexer;
use ragbox::config::{DirectorySource, SourceConfig, SourceKind};
use ragbox::orchestrator::Orchestrator;
use ragbox::ragbox_core::hash::content_hash;
use ragbox::ragbox_core::models::{IngestionResult, Metadata};
use ragbox::ragbox_core::{Registry, SyncEngine};
use ragbox::sqlite_registry::SqliteRegistry;

fn dir_source(name: &str, path: &Path) -> SourceConfig {
    let mut metadata = Metadata::new();
    metadata.insert("team".to_string(), "docs".to_string());
    SourceConfig {
        name: name.to_string(),
        enabled: true,
        metadata,
        kind: SourceKind::Directory(DirectorySource {
            path: path.to_path_buf(),
            file_patterns: vec!["md".to_string(), "txt".to_string()],
            recursive: true,
            max_depth: None,
        }),
    }
}

struct Harness {
    _tmp: TempDir,
    docs: PathBuf,
    db_path: PathBuf,
    registry: Arc<SqliteRegistry>,
    indexer: Arc<FlakyIndexer>,
    orchestrator: Orchestrator,
}

async fn harness(extra_sources: Vec<SourceConfig>) -> Harness {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    fs::create_dir_all(&docs).unwrap();
    fs::write(docs.join("alpha.md"), "# Alpha\n\nFirst document.").unwrap();
    fs::write(docs.join("beta.txt"), "Second document.").unwrap();

    let db_path = tmp.path().join("data/registry.sqlite");
    let registry = Arc::new(SqliteRegistry::open(&db_path).await.unwrap());
    let indexer = Arc::new(FlakyIndexer::new());
    let engine = Arc::new(SyncEngine::new(registry.clone(), indexer.clone()));

    let mut sources = extra_sources;
    sources.push(dir_source("docs", &docs));
    let orchestrator = Orchestrator::new(engine, sources);

    Harness {
        _tmp: tmp,
        docs,
        db_path,
        registry,
        indexer,
        orchestrator,
    }
}

/// `(added, updated, deleted, unchanged, failed)` of the last result.
fn counts(results: &[IngestionResult]) -> (usize, usize, usize, usize, usize) {
    let r = results.last().unwrap();
    assert!(r.is_success(), "unexpected error: {:?}", r.error);
    (r.added, r.updated, r.deleted, r.unchanged, r.failed)
}

#[tokio::test]
async fn added_unchanged_updated_deleted() {
    let h = harness(Vec::new()).await;

    let first = h.orchestrator.run_all().await;
    assert_eq!(counts(&first), (2, 0, 0, 0, 0));

    let calls_before = h.indexer.calls();
    let second = h.orchestrator.run_all().await;
    assert_eq!(counts(&second), (0, 0, 0, 2, 0));
    assert_eq!(h.indexer.calls(), calls_before, "unchanged docs must not reach the indexer");

    fs::write(h.docs.join("alpha.md"), "# Alpha\n\nRewritten.").unwrap();
    let third = h.orchestrator.run_all().await;
    assert_eq!(counts(&third), (0, 1, 0, 1, 0));
    let entry = h.registry.get("docs:alpha.md").await.unwrap().unwrap();
    assert_eq!(entry.content_hash, content_hash("# Alpha\n\nRewritten."));
    assert_eq!(entry.collection.as_deref(), Some("docs"));
    assert_eq!(entry.metadata["team"], "docs");

    fs::remove_file(h.docs.join("beta.txt")).unwrap();
    let fourth = h.orchestrator.run_all().await;
    assert_eq!(counts(&fourth), (0, 0, 1, 1, 0));
    assert!(h.registry.get("docs:beta.txt").await.unwrap().is_none());
    assert!(!h.indexer.inner.contains("docs:beta.txt"));
    assert!(h.indexer.inner.contains("docs:alpha.md"));
}

#[tokio::test]
async fn failing_source_does_not_stop_the_next() {
    let tmp = TempDir::new().unwrap();
    let broken = dir_source("broken", &tmp.path().join("does-not-exist"));
    let h = harness(vec![broken]).await;

    let results = h.orchestrator.run_all().await;
    assert_eq!(results.len(), 2);

    let broken = &results[0];
    assert_eq!(broken.source_name, "broken");
    assert_eq!((broken.added, broken.updated, broken.failed), (0, 0, 0));
    assert!(broken.error.is_some());

    let docs = &results[1];
    assert!(docs.is_success());
    assert_eq!(docs.added, 2);

    let status = h.orchestrator.status().await;
    assert_eq!(status.last_results.len(), 2);
    assert!(!status.last_results[0].is_success());
}

#[tokio::test]
async fn failed_update_is_retried_next_pass() {
    let h = harness(Vec::new()).await;
    h.orchestrator.run_all().await;

    fs::write(h.docs.join("alpha.md"), "new alpha").unwrap();
    h.indexer.fail_on(&["docs:alpha.md"]);
    let failed = h.orchestrator.run_all().await;
    assert!(!failed[0].is_success());

    // The entry must not still claim the old content is indexed.
    let entry = h.registry.get("docs:alpha.md").await.unwrap().unwrap();
    assert!(entry.is_dirty());

    h.indexer.fail_on(&[]);
    let retried = h.orchestrator.run_all().await;
    assert_eq!(counts(&retried), (0, 1, 0, 1, 0));
    let entry = h.registry.get("docs:alpha.md").await.unwrap().unwrap();
    assert_eq!(entry.content_hash, content_hash("new alpha"));
    assert_eq!(h.indexer.inner.chunks("docs:alpha.md").unwrap().join(""), "new alpha");
}

#[tokio::test]
async fn registry_survives_restart() {
    let h = harness(Vec::new()).await;
    h.orchestrator.run_all().await;
    let ingests = h.indexer.ingests.load(Ordering::SeqCst);

    // A second registry handle over the same file sees both documents.
    let reopened = Arc::new(SqliteRegistry::open(&h.db_path).await.unwrap());
    assert_eq!(reopened.count().await.unwrap(), 2);
    let engine = Arc::new(SyncEngine::new(reopened, h.indexer.clone()));
    let restarted = Orchestrator::new(engine, vec![dir_source("docs", &h.docs)]);
    let results = restarted.run_all().await;

    assert_eq!(counts(&results), (0, 0, 0, 2, 0));
    assert_eq!(h.indexer.ingests.load(Ordering::SeqCst), ingests);
}
