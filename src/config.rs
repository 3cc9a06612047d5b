//! Configuration parsing and validation.
//!
//! ragbox is configured via a TOML file (default: `config/ragbox.toml`)
//! plus a handful of `INGEST_*` environment overrides.
//!
//! # Example
//!
//! ```toml
//! [registry]
//! backend = "sqlite"
//! path = "./data/ragbox.sqlite"
//!
//! [index]
//! provider = "http"
//! url = "http://localhost:8080"
//!
//! [ingestion]
//! schedule = "6h"
//! on_startup = true
//!
//! [[sources]]
//! type = "directory"
//! name = "docs"
//! path = "./docs"
//! file_patterns = ["md", "txt"]
//!
//! [[sources]]
//! type = "web_crawl"
//! name = "handbook"
//! seed_urls = ["https://handbook.example.com/"]
//! max_pages = 200
//! ```
//!
//! Every `[[sources]]` entry is decoded on its own. An entry with an unknown
//! `type`, a missing field, a duplicate `name`, or invalid patterns is logged
//! and skipped; the rest of the file still loads.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use ragbox_core::models::Metadata;
use ragbox_core::schedule::parse_schedule;
use ragbox_core::SyncError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::patterns::{binary_patterns, FilePatterns};

/// Name given to the directory source defined by `INGEST_DIR`.
pub const ENV_SOURCE_NAME: &str = "env-directory";

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub registry: RegistryConfig,
    pub index: IndexConfig,
    pub ingestion: IngestionConfig,
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub backend: RegistryBackend,
    pub path: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: RegistryBackend::Sqlite,
            path: PathBuf::from("./data/ragbox.sqlite"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexProvider {
    Http,
    #[default]
    Memory,
}

/// Where indexed content goes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub provider: IndexProvider,
    pub url: Option<String>,
    pub timeout_secs: u64,
    /// Retries for rate-limited (429) or 5xx responses and network errors.
    pub max_retries: u32,
    pub api_key: Option<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            provider: IndexProvider::Memory,
            url: None,
            timeout_secs: 30,
            max_retries: 3,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    pub enabled: bool,
    /// Repeat interval for the daemon. See [`ragbox_core::schedule`].
    pub schedule: Option<String>,
    /// Run one pass over all sources when the daemon starts.
    pub on_startup: bool,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: None,
            on_startup: false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Sources
// ═══════════════════════════════════════════════════════════════════════

/// One configured source: common fields plus the type-specific payload.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Merged into the metadata of every document from this source.
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(flatten)]
    pub kind: SourceKind,
}

/// Source variants, selected by the `type` field.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceKind {
    Directory(DirectorySource),
    Url(UrlSource),
    Database(DatabaseSource),
    ObjectStore(ObjectStoreSource),
    WebCrawl(WebCrawlSource),
}

impl SourceKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            SourceKind::Directory(_) => "directory",
            SourceKind::Url(_) => "url",
            SourceKind::Database(_) => "database",
            SourceKind::ObjectStore(_) => "object_store",
            SourceKind::WebCrawl(_) => "web_crawl",
        }
    }
}

impl SourceConfig {
    pub fn source_type(&self) -> &'static str {
        self.kind.type_name()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DirectorySource {
    pub path: PathBuf,
    #[serde(default = "default_file_patterns")]
    pub file_patterns: Vec<String>,
    #[serde(default = "default_true")]
    pub recursive: bool,
    /// Maximum directory depth below `path`; unlimited when absent.
    #[serde(default)]
    pub max_depth: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UrlSource {
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DatabaseSource {
    /// sqlx connection URL (`sqlite://…`, `postgres://…`).
    pub connection_url: String,
    #[serde(default)]
    pub credentials: Option<DatabaseCredentials>,
    pub query: String,
    pub id_column: String,
    pub content_column: String,
    #[serde(default)]
    pub updated_at_column: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DatabaseCredentials {
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ObjectStoreSource {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible stores (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Falls back to `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` /
    /// `AWS_SESSION_TOKEN` when absent.
    #[serde(default)]
    pub credentials: Option<ObjectStoreCredentials>,
    #[serde(default = "default_file_patterns")]
    pub file_patterns: Vec<String>,
    #[serde(default)]
    pub max_keys: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ObjectStoreCredentials {
    pub access_key_id: String,
    #[serde(skip_serializing)]
    pub secret_access_key: String,
    #[serde(default, skip_serializing)]
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WebCrawlSource {
    pub seed_urls: Vec<String>,
    #[serde(default = "default_crawl_depth")]
    pub max_depth: usize,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    /// Regexes; when non-empty, only matching links are followed.
    #[serde(default)]
    pub follow_patterns: Vec<String>,
    /// Regexes; matching links are never fetched.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default = "default_true")]
    pub respect_robots: bool,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_true")]
    pub same_domain_only: bool,
}

fn default_true() -> bool {
    true
}
pub(crate) fn default_file_patterns() -> Vec<String> {
    vec!["md".to_string(), "txt".to_string()]
}
fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_crawl_depth() -> usize {
    2
}
fn default_max_pages() -> usize {
    100
}
fn default_delay_ms() -> u64 {
    1000
}
fn default_timeout_ms() -> u64 {
    30_000
}

// ═══════════════════════════════════════════════════════════════════════
// Loading
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawConfig {
    registry: RegistryConfig,
    index: IndexConfig,
    ingestion: IngestionConfig,
    sources: Vec<toml::Value>,
}

/// Read and validate the configuration file at `path`.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
///
/// Global sections must be well-formed; a bad source entry is skipped.
pub fn parse_config(content: &str) -> Result<Config> {
    let raw: RawConfig = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if raw.registry.backend == RegistryBackend::Sqlite
        && raw.registry.path.as_os_str().is_empty()
    {
        bail!("registry.path must be set for the sqlite backend");
    }
    if raw.index.provider == IndexProvider::Http
        && raw.index.url.as_deref().map_or(true, |u| u.trim().is_empty())
    {
        bail!("index.url must be set when index.provider is 'http'");
    }
    if raw.index.timeout_secs == 0 {
        bail!("index.timeout_secs must be > 0");
    }

    let mut ingestion = raw.ingestion;
    ingestion.schedule = validated_schedule(ingestion.schedule);

    let sources = decode_sources(raw.sources);

    Ok(Config {
        registry: raw.registry,
        index: raw.index,
        ingestion,
        sources,
    })
}

fn decode_sources(entries: Vec<toml::Value>) -> Vec<SourceConfig> {
    let mut seen = HashSet::new();
    let mut sources = Vec::with_capacity(entries.len());

    for (position, entry) in entries.into_iter().enumerate() {
        let label = entry
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("#{}", position + 1));

        let source = match entry
            .try_into::<SourceConfig>()
            .map_err(|e| SyncError::Configuration(e.to_string()))
            .and_then(|s| validate_source(&s).map(|_| s))
        {
            Ok(source) => source,
            Err(e) => {
                error!(source = %label, error = %e, "skipping invalid source");
                continue;
            }
        };

        if !seen.insert(source.name.clone()) {
            error!(source = %source.name, "skipping source with duplicate name");
            continue;
        }
        sources.push(source);
    }

    sources
}

/// Check one decoded source for values serde cannot reject on its own.
pub fn validate_source(source: &SourceConfig) -> Result<(), SyncError> {
    if source.name.trim().is_empty() {
        return invalid("source name must not be empty".to_string());
    }

    match &source.kind {
        SourceKind::Directory(dir) => {
            if dir.path.as_os_str().is_empty() {
                return invalid("directory source needs a path".to_string());
            }
            FilePatterns::new(&dir.file_patterns)
                .map_err(|e| SyncError::Configuration(format!("{:#}", e)))?;
        }
        SourceKind::Url(url) => {
            if url.urls.is_empty() {
                return invalid("url source needs at least one url".to_string());
            }
        }
        SourceKind::Database(db) => {
            for (field, value) in [
                ("connection_url", &db.connection_url),
                ("query", &db.query),
                ("id_column", &db.id_column),
                ("content_column", &db.content_column),
            ] {
                if value.trim().is_empty() {
                    return invalid(format!("database source field '{}' must not be empty", field));
                }
            }
        }
        SourceKind::ObjectStore(store) => {
            if store.bucket.trim().is_empty() {
                return invalid("object_store source needs a bucket".to_string());
            }
            let binary = binary_patterns(&store.file_patterns);
            if !binary.is_empty() {
                return invalid(format!(
                    "object_store sources only read text formats; binary patterns {:?} are not supported",
                    binary
                ));
            }
            FilePatterns::new(&store.file_patterns)
                .map_err(|e| SyncError::Configuration(format!("{:#}", e)))?;
            if store.max_keys == Some(0) {
                return invalid("object_store max_keys must be > 0".to_string());
            }
        }
        SourceKind::WebCrawl(crawl) => {
            if crawl.seed_urls.is_empty() {
                return invalid("web_crawl source needs at least one seed url".to_string());
            }
            if crawl.max_pages == 0 {
                return invalid("web_crawl max_pages must be > 0".to_string());
            }
            for pattern in crawl.follow_patterns.iter().chain(&crawl.exclude_patterns) {
                Regex::new(pattern).map_err(|e| {
                    SyncError::Configuration(format!("invalid crawl pattern '{}': {}", pattern, e))
                })?;
            }
        }
    }

    Ok(())
}

fn invalid(msg: String) -> Result<(), SyncError> {
    Err(SyncError::Configuration(msg))
}

fn validated_schedule(schedule: Option<String>) -> Option<String> {
    let schedule = schedule.filter(|s| !s.trim().is_empty())?;
    match parse_schedule(&schedule) {
        Ok(_) => Some(schedule),
        Err(e) => {
            error!(error = %e, "ignoring schedule; the scheduler will stay idle");
            None
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Environment overrides
// ═══════════════════════════════════════════════════════════════════════

/// Apply `INGEST_*` overrides using `lookup` to read variables.
///
/// | Variable | Effect |
/// |----------|--------|
/// | `INGEST_DIR` | Replaces all file sources with one directory source |
/// | `INGEST_PATTERNS` | Comma-separated patterns for that source |
/// | `INGEST_RECURSIVE` | `true`/`false` for that source |
/// | `INGEST_SCHEDULE` | Replaces `ingestion.schedule` |
/// | `INGEST_ON_STARTUP` | Replaces `ingestion.on_startup` |
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(dir) = var("INGEST_DIR") {
        let file_patterns = var("INGEST_PATTERNS")
            .map(|p| {
                p.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(default_file_patterns);
        let recursive = var("INGEST_RECURSIVE")
            .and_then(|v| parse_bool("INGEST_RECURSIVE", &v))
            .unwrap_or(true);

        let source = SourceConfig {
            name: ENV_SOURCE_NAME.to_string(),
            enabled: true,
            metadata: Metadata::new(),
            kind: SourceKind::Directory(DirectorySource {
                path: PathBuf::from(dir.trim()),
                file_patterns,
                recursive,
                max_depth: None,
            }),
        };
        match validate_source(&source) {
            Ok(()) => {
                if !config.sources.is_empty() {
                    info!(
                        replaced = config.sources.len(),
                        "INGEST_DIR set; environment source replaces configured sources"
                    );
                }
                config.sources = vec![source];
            }
            Err(e) => error!(error = %e, "ignoring INGEST_DIR override"),
        }
    }

    if let Some(schedule) = var("INGEST_SCHEDULE") {
        config.ingestion.schedule = validated_schedule(Some(schedule));
    }

    if let Some(on_startup) =
        var("INGEST_ON_STARTUP").and_then(|v| parse_bool("INGEST_ON_STARTUP", &v))
    {
        config.ingestion.on_startup = on_startup;
    }
}

fn parse_bool(key: &str, value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => {
            warn!(variable = key, value = other, "ignoring unparseable boolean");
            None
        }
    }
}
