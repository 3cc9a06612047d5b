//! File-pattern handling shared by the directory and object-store connectors.
//!
//! Sources configure patterns loosely: `"md"`, `".md"`, and `"*.md"` all
//! mean "markdown files at any depth". Each is normalized to a glob
//! (`**/*.md`) and compiled into one [`GlobSet`] matched against paths
//! relative to the source root. Patterns that already look like globs with a
//! directory part (`docs/**/*.md`) are kept verbatim.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

/// Extensions whose bytes are not text. Object-store sources refuse them,
/// since the connector hands raw object bodies to the indexer.
pub const BINARY_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "odt", "png", "jpg", "jpeg", "gif",
    "bmp", "webp", "ico", "zip", "gz", "tgz", "tar", "7z", "rar", "bin", "exe", "dll", "so",
    "mp3", "mp4", "wav", "mov", "avi",
];

/// Compiled set of normalized file patterns.
#[derive(Debug, Clone)]
pub struct FilePatterns {
    globs: Vec<String>,
    set: GlobSet,
}

impl FilePatterns {
    /// Compile `patterns`. An empty list matches every file.
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut globs: Vec<String> = patterns
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(normalize_pattern)
            .collect();
        if globs.is_empty() {
            globs.push("**/*".to_string());
        }
        globs.dedup();

        let mut builder = GlobSetBuilder::new();
        for glob in &globs {
            builder.add(Glob::new(glob).with_context(|| format!("invalid file pattern '{}'", glob))?);
        }
        let set = builder.build()?;
        Ok(Self { globs, set })
    }

    pub fn is_match(&self, relative_path: &str) -> bool {
        self.set.is_match(relative_path)
    }

    pub fn globs(&self) -> &[String] {
        &self.globs
    }
}

/// Turn a loose pattern into a glob.
///
/// ```rust
/// use ragbox::patterns::normalize_pattern;
///
/// assert_eq!(normalize_pattern("md"), "**/*.md");
/// assert_eq!(normalize_pattern(".md"), "**/*.md");
/// assert_eq!(normalize_pattern("*.md"), "**/*.md");
/// assert_eq!(normalize_pattern("docs/**/*.md"), "docs/**/*.md");
/// ```
pub fn normalize_pattern(pattern: &str) -> String {
    let p = pattern.trim();
    if p.contains('/') {
        return p.to_string();
    }
    if let Some(ext) = p.strip_prefix("*.") {
        return format!("**/*.{}", ext);
    }
    if let Some(ext) = p.strip_prefix('.') {
        return format!("**/*.{}", ext);
    }
    if p.contains('*') || p.contains('?') || p.contains('[') {
        return format!("**/{}", p);
    }
    format!("**/*.{}", p)
}

/// Extension a normalized pattern selects, if it ends in a literal one.
fn pattern_extension(pattern: &str) -> Option<String> {
    let glob = normalize_pattern(pattern);
    let last = glob.rsplit('/').next().unwrap_or(&glob);
    let (_, ext) = last.rsplit_once('.')?;
    if ext.is_empty() || ext.contains(|c: char| matches!(c, '*' | '?' | '[' | '{')) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// The subset of `patterns` that select a binary format.
pub fn binary_patterns(patterns: &[String]) -> Vec<String> {
    patterns
        .iter()
        .filter(|p| {
            pattern_extension(p)
                .map(|ext| BINARY_EXTENSIONS.contains(&ext.as_str()))
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}
