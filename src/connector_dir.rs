//! Local directory connector.
//!
//! Walks a directory tree, keeps files matching the source's patterns, and
//! reads each as UTF-8 text. Document ids are `{source}:{relative/path}`
//! with `/` separators on every platform, so ids survive a move of the root.
//!
//! # Configuration
//!
//! ```toml
//! [[sources]]
//! type = "directory"
//! name = "docs"
//! path = "./docs"
//! file_patterns = ["md", "txt"]
//! recursive = true
//! max_depth = 3
//! ```
//!
//! `max_depth` counts directory levels below `path`: `0` reads only the
//! files directly inside it. `recursive = false` is the same as
//! `max_depth = 0`. VCS and dependency directories (`.git`, `target`,
//! `node_modules`) are always skipped.

use std::io::ErrorKind;
use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use ragbox_core::models::{Metadata, SourceDocument};

use crate::config::DirectorySource;
use crate::patterns::FilePatterns;
use crate::traits::{Connector, SourceContext};

const SKIPPED_DIRS: &[&str] = &[".git", "target", "node_modules"];

pub struct DirectoryConnector {
    ctx: SourceContext,
    config: DirectorySource,
}

impl DirectoryConnector {
    pub fn new(ctx: SourceContext, config: DirectorySource) -> Self {
        Self { ctx, config }
    }
}

#[async_trait]
impl Connector for DirectoryConnector {
    fn name(&self) -> &str {
        &self.ctx.name
    }

    fn description(&self) -> &str {
        "Read text files from a local directory"
    }

    fn connector_type(&self) -> &str {
        "directory"
    }

    async fn scan(&self) -> Result<Vec<SourceDocument>> {
        let ctx = self.ctx.clone();
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || scan_directory(&ctx, &config))
            .await
            .context("directory scan task panicked")?
    }
}

/// Walk `config.path` and return matching documents sorted by id.
pub fn scan_directory(ctx: &SourceContext, config: &DirectorySource) -> Result<Vec<SourceDocument>> {
    let root = &config.path;
    if !root.is_dir() {
        bail!("directory source root does not exist: {}", root.display());
    }
    let patterns = FilePatterns::new(&config.file_patterns)?;

    let walk_depth = if config.recursive {
        config.max_depth.map(|d| d + 1).unwrap_or(usize::MAX)
    } else {
        1
    };

    let mut documents = Vec::new();
    let walker = WalkDir::new(root)
        .max_depth(walk_depth)
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e));

    for entry in walker {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = relative_path(root, entry.path());
        if !patterns.is_match(&relative) {
            continue;
        }

        let content = match std::fs::read_to_string(entry.path()) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                warn!(source = %ctx.name, path = %relative, "skipping file that is not UTF-8 text");
                continue;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", entry.path().display()))
            }
        };

        documents.push(ctx.document(&relative, content, file_metadata(&entry, &relative)));
    }

    documents.sort_by(|a, b| a.document_id.cmp(&b.document_id));
    debug!(source = %ctx.name, files = documents.len(), "directory scanned");
    Ok(documents)
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && SKIPPED_DIRS
            .iter()
            .any(|d| entry.file_name().to_str() == Some(*d))
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn file_metadata(entry: &DirEntry, relative: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("path".to_string(), relative.to_string());
    metadata.insert(
        "file_name".to_string(),
        entry.file_name().to_string_lossy().to_string(),
    );
    if let Some(modified) = entry.metadata().ok().and_then(|m| m.modified().ok()) {
        let modified: DateTime<Utc> = modified.into();
        metadata.insert("modified_at".to_string(), modified.to_rfc3339());
    }
    metadata
}
