//! # ragbox CLI
//!
//! ## Usage
//!
//! ```bash
//! ragbox --config ./config/ragbox.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragbox init` | Create the registry database and run migrations |
//! | `ragbox sources` | List configured sources |
//! | `ragbox run [name]` | One sync pass over all enabled sources, or one source |
//! | `ragbox daemon` | Run passes on the configured schedule |
//! | `ragbox ingest-dir <path>` | One-shot ingest of a directory |
//! | `ragbox ingest-urls <url>...` | One-shot ingest of URLs |
//! | `ragbox upsert <id> --file <path>` | Upsert one document |
//! | `ragbox delete <id>` | Delete one document |
//! | `ragbox clear` | Delete every registered document |
//! | `ragbox prune --keep-file <path>` | Delete documents outside a keep set |
//! | `ragbox sync-status` | Registry counts and last sync time |
//! | `ragbox documents` | List registered documents |

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ragbox::config::{self, Config, RegistryBackend};
use ragbox::indexer::build_indexer;
use ragbox::orchestrator::Orchestrator;
use ragbox::ragbox_core::models::{IngestionResult, Metadata};
use ragbox::ragbox_core::{Registry, SyncEngine, UpsertRequest};
use ragbox::scheduler::Scheduler;
use ragbox::sources;
use ragbox::sqlite_registry::build_registry;

/// ragbox: incremental document sync for a RAG index.
#[derive(Parser)]
#[command(name = "ragbox", version, about = "Incremental document sync for a RAG index")]
struct Cli {
    /// Path to the configuration file (TOML).
    ///
    /// A missing file means built-in defaults (in-memory index, SQLite
    /// registry under `./data`), still subject to `INGEST_*` overrides.
    #[arg(long, global = true, default_value = "./config/ragbox.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the registry database schema. Safe to run repeatedly.
    Init,

    /// List configured sources.
    Sources,

    /// Run one sync pass over every enabled source, or just `name`.
    ///
    /// A named source runs even when it is disabled.
    Run {
        name: Option<String>,
    },

    /// Run sync passes forever on `[ingestion].schedule`.
    Daemon,

    /// Index a directory once, outside the configured sources.
    IngestDir {
        path: PathBuf,

        /// File patterns (`md`, `*.txt`, `docs/**/*.md`). Repeatable.
        #[arg(long = "pattern")]
        patterns: Vec<String>,

        /// Only read files directly inside `path`.
        #[arg(long)]
        no_recursive: bool,

        /// Metadata as `key=value`. Repeatable.
        #[arg(long = "meta", value_parser = parse_key_val)]
        meta: Vec<(String, String)>,
    },

    /// Index a list of URLs once, outside the configured sources.
    IngestUrls {
        #[arg(required = true)]
        urls: Vec<String>,

        #[arg(long = "meta", value_parser = parse_key_val)]
        meta: Vec<(String, String)>,
    },

    /// Create or update one document, skipping unchanged content.
    Upsert {
        document_id: String,

        /// File holding the document text.
        #[arg(long)]
        file: PathBuf,

        /// Precomputed content fingerprint to use instead of hashing.
        #[arg(long)]
        hash: Option<String>,

        #[arg(long)]
        collection: Option<String>,

        #[arg(long = "meta", value_parser = parse_key_val)]
        meta: Vec<(String, String)>,
    },

    /// Delete one document from the index and the registry.
    Delete { document_id: String },

    /// Delete every registered document.
    Clear,

    /// Delete registered documents missing from the keep set, then mark
    /// the sync complete. Without a keep set, only marks it complete.
    Prune {
        /// File with one document id per line.
        #[arg(long)]
        keep_file: Option<PathBuf>,

        /// Document id to keep. Repeatable.
        #[arg(long = "keep")]
        keep: Vec<String>,
    },

    /// Show registry counts and the last sync time.
    SyncStatus,

    /// List registered document ids.
    Documents {
        #[arg(long)]
        collection: Option<String>,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn metadata(pairs: Vec<(String, String)>) -> Metadata {
    pairs.into_iter().collect()
}

fn load(path: &std::path::Path) -> Result<Config> {
    let mut cfg = if path.exists() {
        config::load_config(path)?
    } else {
        warn!(path = %path.display(), "config file not found; using defaults");
        Config::default()
    };
    config::apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
    Ok(cfg)
}

async fn build_engine(cfg: &Config) -> Result<Arc<SyncEngine>> {
    let registry = build_registry(&cfg.registry).await?;
    let indexer = build_indexer(&cfg.index)?;
    Ok(Arc::new(SyncEngine::new(registry, indexer)))
}

fn print_results(results: &[IngestionResult]) {
    println!(
        "{:<20} {:<13} {:>6} {:>8} {:>8} {:>10} {:>7} {:>9}",
        "SOURCE", "TYPE", "ADDED", "UPDATED", "DELETED", "UNCHANGED", "FAILED", "MS"
    );
    for r in results {
        println!(
            "{:<20} {:<13} {:>6} {:>8} {:>8} {:>10} {:>7} {:>9}",
            r.source_name,
            r.source_type,
            r.added,
            r.updated,
            r.deleted,
            r.unchanged,
            r.failed,
            r.duration_ms()
        );
        if let Some(err) = &r.error {
            println!("  error: {}", err);
        }
    }
}

fn fail_on_errors(results: &[IngestionResult]) -> Result<()> {
    let failed = results.iter().filter(|r| !r.is_success()).count();
    if failed > 0 {
        bail!("{} of {} source(s) failed", failed, results.len());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init()
        .ok();

    let cli = Cli::parse();
    let cfg = load(&cli.config)?;

    let engine = build_engine(&cfg).await?;

    match cli.command {
        Commands::Init => match cfg.registry.backend {
            RegistryBackend::Sqlite => {
                println!("Registry initialized at {}", cfg.registry.path.display())
            }
            RegistryBackend::Memory => println!("In-memory registry; nothing to initialize."),
        },
        Commands::Sources => {
            let orchestrator = Orchestrator::new(engine, cfg.sources);
            sources::print_sources(orchestrator.list_sources());
        }
        Commands::Run { name } => {
            let orchestrator = Orchestrator::new(engine, cfg.sources);
            match name {
                Some(name) => {
                    let result = orchestrator
                        .run_source(&name)
                        .await
                        .with_context(|| format!("no source named '{}'", name))?;
                    print_results(std::slice::from_ref(&result));
                    fail_on_errors(std::slice::from_ref(&result))?;
                }
                None => {
                    let results = orchestrator.run_all().await;
                    print_results(&results);
                    fail_on_errors(&results)?;
                }
            }
        }
        Commands::Daemon => {
            let orchestrator = Arc::new(Orchestrator::new(engine, cfg.sources));
            if cfg.ingestion.enabled && cfg.ingestion.on_startup {
                info!("running startup pass");
                orchestrator.run_all().await;
            }
            let scheduler = Scheduler::from_config(orchestrator, &cfg.ingestion);
            match scheduler.start() {
                Some(handle) => handle.await.context("scheduler task ended")?,
                None => info!("nothing scheduled; exiting"),
            }
        }
        Commands::IngestDir {
            path,
            patterns,
            no_recursive,
            meta,
        } => {
            let orchestrator = Orchestrator::new(engine, Vec::new());
            let result = orchestrator
                .ingest_directory(path, patterns, !no_recursive, metadata(meta))
                .await;
            print_results(std::slice::from_ref(&result));
            fail_on_errors(std::slice::from_ref(&result))?;
        }
        Commands::IngestUrls { urls, meta } => {
            let orchestrator = Orchestrator::new(engine, Vec::new());
            let result = orchestrator.ingest_urls(urls, metadata(meta)).await;
            print_results(std::slice::from_ref(&result));
            fail_on_errors(std::slice::from_ref(&result))?;
        }
        Commands::Upsert {
            document_id,
            file,
            hash,
            collection,
            meta,
        } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let meta = metadata(meta);
            let outcome = engine
                .upsert_request(
                    UpsertRequest::new(&document_id, &content, &meta)
                        .with_hash(hash.as_deref())
                        .in_collection(collection.as_deref()),
                )
                .await?;
            println!(
                "{} {} ({} chunks): {}",
                outcome.action.as_str(),
                outcome.document_id,
                outcome.chunks,
                outcome.message
            );
        }
        Commands::Delete { document_id } => {
            if engine.delete(&document_id).await? {
                println!("Deleted {}", document_id);
            } else {
                println!("{} was not registered; index delete sent anyway", document_id);
            }
        }
        Commands::Clear => {
            let removed = engine.clear().await?;
            println!("Cleared {} document(s)", removed);
        }
        Commands::Prune { keep_file, keep } => {
            let mut keep_ids: HashSet<String> = keep.into_iter().collect();
            if let Some(path) = &keep_file {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                keep_ids.extend(
                    text.lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(str::to_string),
                );
            }
            let keep_set = (keep_file.is_some() || !keep_ids.is_empty()).then_some(&keep_ids);
            let report = engine.sync(keep_set).await?;
            println!("Pruned {} document(s)", report.pruned_count);
            println!(
                "{} document(s), {} chunk(s) indexed",
                report.info.document_count, report.info.chunk_count
            );
        }
        Commands::SyncStatus => {
            let info = engine.sync_info().await?;
            match info.last_sync_time {
                Some(t) => println!("Last sync:  {}", t.to_rfc3339()),
                None => println!("Last sync:  never"),
            }
            println!("Documents:  {}", info.document_count);
            println!("Chunks:     {}", info.chunk_count);
        }
        Commands::Documents { collection } => {
            let registry = engine.registry();
            let ids = match &collection {
                Some(c) => registry.list_ids_by_collection(c).await?,
                None => registry.list_ids().await?,
            };
            for id in &ids {
                println!("{}", id);
            }
            eprintln!("{} document(s)", ids.len());
        }
    }

    Ok(())
}
