//! Finding the content files to process.
//!
//! An input path is either a single file, which is processed as given, or a
//! directory, which is walked (one level deep unless `recursive` is set) and
//! filtered by a glob pattern matched against each file's path relative to
//! the directory. The default pattern `**/*.md` matches Markdown files at any
//! depth.
//!
//! Results are sorted and free of duplicates so repeated runs visit files in
//! the same order.

use globset::{Glob, GlobMatcher};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;
use walkdir::WalkDir;

/// Pattern used when none is configured.
pub const DEFAULT_PATTERN: &str = "**/*.md";

#[derive(Error, Debug)]
pub enum DiscoverError {
    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Invalid file pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        source: globset::Error,
    },
    #[error("Input path not found: {0}")]
    NotFound(PathBuf),
}

/// Compiled file-name filter.
#[derive(Debug, Clone)]
pub struct FilePattern {
    matcher: GlobMatcher,
}

impl FilePattern {
    pub fn new(pattern: &str) -> Result<Self, DiscoverError> {
        let glob = Glob::new(pattern).map_err(|source| DiscoverError::Pattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            matcher: glob.compile_matcher(),
        })
    }

    /// Match a path relative to the walk root.
    pub fn matches(&self, relative: &Path) -> bool {
        self.matcher.is_match(relative)
    }
}

impl Default for FilePattern {
    fn default() -> Self {
        Self::new(DEFAULT_PATTERN).expect("default pattern is a valid glob")
    }
}

/// List the files to process under `input`.
pub fn discover(
    input: &Path,
    recursive: bool,
    pattern: &FilePattern,
) -> Result<Vec<PathBuf>, DiscoverError> {
    if !input.exists() {
        return Err(DiscoverError::NotFound(input.to_path_buf()));
    }
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files = Vec::new();
    for entry in WalkDir::new(input).min_depth(1).max_depth(max_depth) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(input).unwrap_or(entry.path());
        if pattern.matches(relative) {
            files.push(entry.into_path());
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

/// Like [`discover`], but a missing directory yields no files.
pub fn discover_collection(
    dir: &Path,
    recursive: bool,
    pattern: &FilePattern,
) -> Result<Vec<PathBuf>, DiscoverError> {
    match discover(dir, recursive, pattern) {
        Err(DiscoverError::NotFound(path)) => {
            warn!(path = %path.display(), "collection directory not found");
            Ok(Vec::new())
        }
        other => other,
    }
}
