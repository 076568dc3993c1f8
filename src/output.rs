//! CLI output formatting for every command.
//!
//! # Information-First Display
//!
//! Entries are shown by what they are (their `title`, or the file name when
//! there is none) with a positional index. Paths and counts are secondary
//! context on indented lines. Logs go to stderr through `tracing`; these
//! summaries go to stdout.
//!
//! # Output Format
//!
//! ## Build
//!
//! ```text
//! 001 events (1 entry)
//!     001 Spring fair
//! 002 posts (2 entries, 3 images replaced)
//!     001 Hello
//!     002 (untitled-note)
//!     Failed: posts/broken.md
//!         Failed to read ...
//!
//! Categories (posts)
//!     tech: 2
//!     life: 1
//!
//! Replaced 3 images in 2 files
//! Uploads: 2 uploaded, 1 reused (3 total)
//! ```
//!
//! ## Images
//!
//! ```text
//! 001 posts/a.md → posts/a_updated.md (2 replaced)
//! 002 posts/b.md (unchanged)
//!
//! Replaced 2 images in 1 of 2 files
//! Uploads: 2 uploaded
//! ```
//!
//! ## Check
//!
//! ```text
//! 001 posts (2 files)
//!     001 Hello: 2 local
//!     002 Second post: 1 local, 1 remote
//!
//! 3 local images would be uploaded, 1 already remote, 0 missing
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure.

use crate::aggregate::{CheckedCollection, Failure, RunReport};
use crate::cache::CacheStats;
use crate::process::{FileOutcome, ImageCounts};
use crate::types::FileRecord;
use std::path::Path;

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Header line: positional index + name, with optional detail.
///
/// ```text
/// 001 posts (2 entries)
/// 001 posts
/// ```
fn entity_header(index: usize, name: &str, detail: Option<&str>) -> String {
    match detail {
        Some(d) => format!("{} {} ({})", format_index(index), name, d),
        None => format!("{} {}", format_index(index), name),
    }
}

/// Record line: titled entries show the title, untitled the file name in parens.
fn record_line(index: usize, record: &FileRecord) -> String {
    match record.metadata.get("title").and_then(|v| v.as_scalar()) {
        Some(t) if !t.is_empty() => format!("{} {}", format_index(index), t),
        _ => format!("{} ({})", format_index(index), record.file_name),
    }
}

/// Show `path` relative to `root` when it lies beneath it.
fn display_path(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

fn failure_lines(failures: &[Failure], root: &Path, depth: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for f in failures {
        lines.push(format!(
            "{}Failed: {}",
            indent(depth),
            display_path(&f.path, root)
        ));
        lines.push(format!("{}{}", indent(depth + 1), f.error));
    }
    lines
}

fn plural(n: usize, one: &str, many: &str) -> String {
    if n == 1 {
        format!("{n} {one}")
    } else {
        format!("{n} {many}")
    }
}

// ============================================================================
// Build
// ============================================================================

pub fn format_build_output(
    report: &RunReport,
    stats: Option<&CacheStats>,
    source_root: &Path,
) -> Vec<String> {
    let mut lines = Vec::new();

    for (i, collection) in report.collections.iter().enumerate() {
        let mut detail = plural(collection.records.len(), "entry", "entries");
        let replaced = collection.images.map(|c| c.replaced).unwrap_or(0);
        if replaced > 0 {
            detail.push_str(&format!(", {} replaced", plural(replaced, "image", "images")));
        }
        lines.push(entity_header(i + 1, &collection.name, Some(&detail)));
        for (j, record) in collection.records.iter().enumerate() {
            lines.push(format!("{}{}", indent(1), record_line(j + 1, record)));
        }
        lines.extend(failure_lines(&collection.failures, source_root, 1));
    }

    if !report.categories.is_empty() {
        lines.push(String::new());
        lines.push(format!("Categories ({})", report.category_collection));
        for c in &report.categories {
            lines.push(format!("{}{}: {}", indent(1), c.category, c.count));
        }
    }

    if let Some(stats) = stats {
        let written: usize = report.collections.iter().map(|c| c.written).sum();
        lines.push(String::new());
        lines.push(format!(
            "Replaced {} in {}",
            plural(report.total_replaced(), "image", "images"),
            plural(written, "file", "files")
        ));
        lines.extend(upload_summary(report.collections.iter().filter_map(|c| c.images), stats));
    }

    let failures = report.total_failures();
    if failures > 0 {
        lines.push(format!("{} could not be processed", plural(failures, "file", "files")));
    }

    lines
}

pub fn print_build_output(report: &RunReport, stats: Option<&CacheStats>, source_root: &Path) {
    for line in format_build_output(report, stats, source_root) {
        println!("{}", line);
    }
}

fn upload_summary(counts: impl Iterator<Item = ImageCounts>, stats: &CacheStats) -> Vec<String> {
    let mut total = ImageCounts::default();
    for c in counts {
        total.add(&c);
    }
    let mut lines = vec![format!("Uploads: {}", stats)];
    if total.failed > 0 || total.missing > 0 {
        lines.push(format!(
            "{} left unchanged ({} failed uploads, {} missing files)",
            plural(total.failed + total.missing, "reference", "references"),
            total.failed,
            total.missing
        ));
    }
    lines
}

// ============================================================================
// Images
// ============================================================================

pub fn format_images_output(
    outcomes: &[FileOutcome],
    failures: &[Failure],
    stats: &CacheStats,
    input_root: &Path,
) -> Vec<String> {
    let mut lines = Vec::new();

    for (i, outcome) in outcomes.iter().enumerate() {
        let source = display_path(&outcome.source, input_root);
        let replaced = outcome.images.map(|c| c.replaced).unwrap_or(0);
        let line = match &outcome.written {
            Some(target) if target == &outcome.source => {
                format!("{} {} ({} replaced)", format_index(i + 1), source, replaced)
            }
            Some(target) => format!(
                "{} {} \u{2192} {} ({} replaced)",
                format_index(i + 1),
                source,
                target.display(),
                replaced
            ),
            None => format!("{} {} (unchanged)", format_index(i + 1), source),
        };
        lines.push(line);
    }
    lines.extend(failure_lines(failures, input_root, 0));

    let changed = outcomes
        .iter()
        .filter(|o| o.images.is_some_and(|c| c.replaced > 0))
        .count();
    let total: usize = outcomes
        .iter()
        .filter_map(|o| o.images)
        .map(|c| c.replaced)
        .sum();

    lines.push(String::new());
    lines.push(format!(
        "Replaced {} in {} of {}",
        plural(total, "image", "images"),
        changed,
        plural(outcomes.len() + failures.len(), "file", "files")
    ));
    lines.extend(upload_summary(outcomes.iter().filter_map(|o| o.images), stats));
    lines
}

pub fn print_images_output(
    outcomes: &[FileOutcome],
    failures: &[Failure],
    stats: &CacheStats,
    input_root: &Path,
) {
    for line in format_images_output(outcomes, failures, stats, input_root) {
        println!("{}", line);
    }
}

// ============================================================================
// Check
// ============================================================================

pub fn format_check_output(checked: &[CheckedCollection], source_root: &Path) -> Vec<String> {
    let mut lines = Vec::new();
    let (mut local, mut remote, mut missing) = (0, 0, 0);

    for (i, collection) in checked.iter().enumerate() {
        let detail = plural(collection.files.len(), "file", "files");
        lines.push(entity_header(i + 1, &collection.name, Some(&detail)));
        for (j, file) in collection.files.iter().enumerate() {
            let mut parts = Vec::new();
            if file.local > 0 {
                parts.push(format!("{} local", file.local));
            }
            if file.remote > 0 {
                parts.push(format!("{} remote", file.remote));
            }
            if file.missing > 0 {
                parts.push(format!("{} missing", file.missing));
            }
            let head = record_line(j + 1, &file.record);
            if parts.is_empty() {
                lines.push(format!("{}{}", indent(1), head));
            } else {
                lines.push(format!("{}{}: {}", indent(1), head, parts.join(", ")));
            }
            local += file.local;
            remote += file.remote;
            missing += file.missing;
        }
        lines.extend(failure_lines(&collection.failures, source_root, 1));
    }

    lines.push(String::new());
    lines.push(format!(
        "{} would be uploaded, {} already remote, {} missing",
        plural(local, "local image", "local images"),
        remote,
        missing
    ));
    lines
}

pub fn print_check_output(checked: &[CheckedCollection], source_root: &Path) {
    for line in format_check_output(checked, source_root) {
        println!("{}", line);
    }
}

// ============================================================================
// Tests
// ============================================================================
