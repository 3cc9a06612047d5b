//! Database sources: full ingest with per-row failure isolation.

mod common;

use std::path::Path;
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tempfile::TempDir;

use common::FlakyIndexer;
use ragbox::config::{DatabaseSource, SourceConfig, SourceKind};
use ragbox::orchestrator::Orchestrator;
use ragbox::ragbox_core::models::Metadata;
use ragbox::ragbox_core::registry::memory::InMemoryRegistry;
use ragbox::ragbox_core::{Registry, SyncEngine};
use ragbox::runner::SourceRunner;

async fn seed_database(path: &Path, rows: &[(&str, Option<&str>)]) {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    sqlx::query("CREATE TABLE articles (id TEXT PRIMARY KEY, body TEXT, updated_at DATETIME)")
        .execute(&pool)
        .await
        .unwrap();
    for (id, body) in rows {
        sqlx::query("INSERT INTO articles (id, body, updated_at) VALUES (?, ?, '2024-05-01')")
            .bind(*id)
            .bind(*body)
            .execute(&pool)
            .await
            .unwrap();
    }
    pool.close().await;
}

fn db_source(path: &Path, query: &str) -> SourceConfig {
    SourceConfig {
        name: "kb".to_string(),
        enabled: true,
        metadata: Metadata::new(),
        kind: SourceKind::Database(DatabaseSource {
            connection_url: format!("sqlite://{}", path.display()),
            credentials: None,
            query: query.to_string(),
            id_column: "id".to_string(),
            content_column: "body".to_string(),
            updated_at_column: Some("updated_at".to_string()),
        }),
    }
}

#[tokio::test]
async fn one_failing_row_does_not_abort_the_rest() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("kb.sqlite");
    seed_database(
        &path,
        &[("1", Some("first")), ("2", Some("second")), ("3", Some("third"))],
    )
    .await;

    let registry = Arc::new(InMemoryRegistry::new());
    let indexer = Arc::new(FlakyIndexer::new());
    indexer.fail_on(&["kb:2"]);
    let runner = SourceRunner::new(Arc::new(SyncEngine::new(registry.clone(), indexer.clone())));

    let result = runner
        .run(&db_source(&path, "SELECT id, body, updated_at FROM articles ORDER BY id"))
        .await;

    assert!(result.is_success(), "unexpected error: {:?}", result.error);
    assert_eq!(result.source_type, "database");
    assert_eq!((result.added, result.failed), (2, 1));
    assert!(indexer.inner.contains("kb:1"));
    assert!(!indexer.inner.contains("kb:2"));
    assert!(indexer.inner.contains("kb:3"));

    let meta = indexer.inner.metadata("kb:3").unwrap();
    assert_eq!(meta["updated_at"], "2024-05-01");
    assert_eq!(meta["source"], "kb");

    // Full ingest does not register anything.
    assert_eq!(registry.count().await.unwrap(), 0);
}

#[tokio::test]
async fn null_content_counts_as_a_failed_row() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("kb.sqlite");
    seed_database(&path, &[("a", Some("body a")), ("b", None)]).await;

    let engine = SyncEngine::new(
        Arc::new(InMemoryRegistry::new()),
        Arc::new(FlakyIndexer::new()),
    );
    let orchestrator = Orchestrator::new(
        Arc::new(engine),
        vec![db_source(&path, "SELECT id, body, updated_at FROM articles ORDER BY id")],
    );

    let results = orchestrator.run_all().await;
    assert_eq!((results[0].added, results[0].failed), (1, 1));
    assert!(results[0].is_success());
}

#[tokio::test]
async fn broken_query_fails_the_whole_source() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("kb.sqlite");
    seed_database(&path, &[("a", Some("body a"))]).await;

    let runner = SourceRunner::new(Arc::new(SyncEngine::new(
        Arc::new(InMemoryRegistry::new()),
        Arc::new(FlakyIndexer::new()),
    )));
    let result = runner
        .run(&db_source(&path, "SELECT id, body FROM no_such_table"))
        .await;

    assert_eq!((result.added, result.failed), (0, 0));
    assert!(result.error.as_deref().unwrap().contains("query failed"));
}

#[tokio::test]
async fn typed_columns_are_read_as_text() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("kb.sqlite");
    let options = SqliteConnectOptions::new()
        .filename(&path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    sqlx::query(
        "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT, updated_at DATETIME)",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO notes (id, body, updated_at) VALUES
            (7, 'seven', '2024-05-01T10:00:00Z'),
            (8, 'eight', 1714557600)",
    )
    .execute(&pool)
    .await
    .unwrap();
    pool.close().await;

    let indexer = Arc::new(FlakyIndexer::new());
    let runner = SourceRunner::new(Arc::new(SyncEngine::new(
        Arc::new(InMemoryRegistry::new()),
        indexer.clone(),
    )));
    let result = runner
        .run(&db_source(&path, "SELECT id, body, updated_at FROM notes ORDER BY id"))
        .await;

    assert!(result.is_success(), "unexpected error: {:?}", result.error);
    assert_eq!((result.added, result.failed), (2, 0));
    assert_eq!(
        indexer.inner.metadata("kb:7").unwrap()["updated_at"],
        "2024-05-01T10:00:00Z"
    );
    assert_eq!(indexer.inner.metadata("kb:8").unwrap()["updated_at"], "1714557600");
}

#[tokio::test]
async fn unsupported_scheme_fails_the_source() {
    let runner = SourceRunner::new(Arc::new(SyncEngine::new(
        Arc::new(InMemoryRegistry::new()),
        Arc::new(FlakyIndexer::new()),
    )));
    let mut source = db_source(Path::new("unused"), "SELECT 1");
    if let SourceKind::Database(db) = &mut source.kind {
        db.connection_url = "mysql://db.internal/kb".to_string();
    }

    let result = runner.run(&source).await;

    assert_eq!((result.added, result.failed), (0, 0));
    assert!(result
        .error
        .as_deref()
        .unwrap()
        .contains("unsupported connection_url scheme"));
}
