//! Collection aggregation and JSON outputs.
//!
//! A run walks each configured collection in order, processes its files one
//! at a time, and folds the resulting records into a [`RunReport`]. Files are
//! never processed in parallel across the collection; concurrency only
//! happens inside one file's upload fan-out.
//!
//! A file that fails to process is logged, listed under
//! [`CollectionOutput::failures`], and left out of the records. The run
//! itself keeps going.
//!
//! ## Outputs
//!
//! [`write_outputs`] writes into the content root:
//!
//! ```text
//! <root>/
//! ├── events.json             # [FileRecord, ...], [] when empty
//! ├── news.json
//! ├── posts.json
//! └── posts-categories.json   # [{"category": ..., "count": ...}, ...]
//! ```

use crate::discover::DiscoverError;
use crate::process::{CheckOutcome, FileProcessor, ImageCounts, check_file};
use crate::references::Scanner;
use crate::types::{CategoryCount, FileRecord};
use indexmap::IndexMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info};

#[derive(Error, Debug)]
pub enum AggregateError {
    #[error("Failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A file (or collection) that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub path: PathBuf,
    pub error: String,
}

/// Everything produced for one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionOutput {
    pub name: String,
    /// One record per successfully processed file, in discovery order.
    pub records: Vec<FileRecord>,
    pub failures: Vec<Failure>,
    /// Summed image counts; `None` when images were not processed.
    pub images: Option<ImageCounts>,
    /// Files whose rewritten text was written.
    pub written: usize,
}

impl CollectionOutput {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            records: Vec::new(),
            failures: Vec::new(),
            images: None,
            written: 0,
        }
    }
}

/// Result of a whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// In configured order, including empty collections.
    pub collections: Vec<CollectionOutput>,
    /// Name of the collection the histogram was computed for.
    pub category_collection: String,
    pub categories: Vec<CategoryCount>,
}

impl RunReport {
    pub fn collection(&self, name: &str) -> Option<&CollectionOutput> {
        self.collections.iter().find(|c| c.name == name)
    }

    pub fn total_replaced(&self) -> usize {
        self.collections
            .iter()
            .filter_map(|c| c.images)
            .map(|i| i.replaced)
            .sum()
    }

    pub fn total_failures(&self) -> usize {
        self.collections.iter().map(|c| c.failures.len()).sum()
    }
}

/// Process every collection and compute the category histogram for
/// `category_collection`.
///
/// `discover` maps a collection name to its files; it should return an
/// empty list for a collection that does not exist.
pub async fn run<P, D>(
    collections: &[String],
    category_collection: &str,
    mut discover: D,
    processor: &P,
) -> RunReport
where
    P: FileProcessor,
    D: FnMut(&str) -> Result<Vec<PathBuf>, DiscoverError>,
{
    let mut outputs = Vec::with_capacity(collections.len());
    for name in collections {
        let mut output = CollectionOutput::new(name);
        let files = match discover(name) {
            Ok(files) => files,
            Err(e) => {
                error!(collection = %name, error = %e, "could not list collection");
                output.failures.push(Failure {
                    path: PathBuf::from(name),
                    error: e.to_string(),
                });
                outputs.push(output);
                continue;
            }
        };
        info!(collection = %name, files = files.len(), "processing collection");

        for path in files {
            match processor.process(&path).await {
                Ok(outcome) => {
                    if let Some(counts) = outcome.images {
                        output.images.get_or_insert_with(ImageCounts::default).add(&counts);
                    }
                    if outcome.written.is_some() {
                        output.written += 1;
                    }
                    output.records.push(outcome.record);
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "file skipped");
                    output.failures.push(Failure {
                        path,
                        error: e.to_string(),
                    });
                }
            }
        }
        outputs.push(output);
    }

    let categories = outputs
        .iter()
        .find(|c| c.name == category_collection)
        .map(|c| category_histogram(&c.records))
        .unwrap_or_default();

    RunReport {
        collections: outputs,
        category_collection: category_collection.to_string(),
        categories,
    }
}

/// Dry-run results for one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedCollection {
    pub name: String,
    pub files: Vec<CheckOutcome>,
    pub failures: Vec<Failure>,
}

/// Parse and scan every collection without uploading or writing anything.
pub fn check<D>(collections: &[String], mut discover: D, scanner: &Scanner) -> Vec<CheckedCollection>
where
    D: FnMut(&str) -> Result<Vec<PathBuf>, DiscoverError>,
{
    collections
        .iter()
        .map(|name| {
            let mut checked = CheckedCollection {
                name: name.clone(),
                files: Vec::new(),
                failures: Vec::new(),
            };
            let files = match discover(name) {
                Ok(files) => files,
                Err(e) => {
                    checked.failures.push(Failure {
                        path: PathBuf::from(name),
                        error: e.to_string(),
                    });
                    return checked;
                }
            };
            for path in files {
                match check_file(&path, scanner) {
                    Ok(outcome) => checked.files.push(outcome),
                    Err(e) => checked.failures.push(Failure {
                        path,
                        error: e.to_string(),
                    }),
                }
            }
            checked
        })
        .collect()
}

/// Count category labels across records, in first-seen order.
///
/// Only records whose `category` is an array contribute. Empty labels are
/// ignored.
pub fn category_histogram(records: &[FileRecord]) -> Vec<CategoryCount> {
    let mut counts: IndexMap<&str, usize> = IndexMap::new();
    for label in records.iter().filter_map(FileRecord::category).flatten() {
        if label.is_empty() {
            continue;
        }
        *counts.entry(label.as_str()).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(category, count)| CategoryCount {
            category: category.to_string(),
            count,
        })
        .collect()
}

/// Path of the JSON index for a collection.
pub fn collection_path(root: &Path, name: &str) -> PathBuf {
    root.join(format!("{name}.json"))
}

/// Path of the category histogram for a collection.
pub fn categories_path(root: &Path, name: &str) -> PathBuf {
    root.join(format!("{name}-categories.json"))
}

/// Write every collection index and the category histogram under `root`.
///
/// Returns the written paths in order.
pub fn write_outputs(root: &Path, report: &RunReport) -> Result<Vec<PathBuf>, AggregateError> {
    let mut written = Vec::with_capacity(report.collections.len() + 1);
    for collection in &report.collections {
        let path = collection_path(root, &collection.name);
        write_json(&path, &collection.records)?;
        info!(path = %path.display(), entries = collection.records.len(), "wrote collection index");
        written.push(path);
    }
    if report.collection(&report.category_collection).is_some() {
        let path = categories_path(root, &report.category_collection);
        write_json(&path, &report.categories)?;
        info!(path = %path.display(), categories = report.categories.len(), "wrote category histogram");
        written.push(path);
    }
    Ok(written)
}

fn write_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), AggregateError> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).map_err(|source| AggregateError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Dispatcher;
    use crate::discover::{FilePattern, discover_collection};
    use crate::process::{ImageProcessor, IndexOnly, WriteMode};
    use crate::references::Scanner;
    use crate::test_helpers::setup_fixtures;
    use crate::types::MetadataValue;
    use crate::upload::tests::MockUploader;
    use std::time::Duration;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn record(name: &str, category: Option<MetadataValue>) -> FileRecord {
        let mut metadata = crate::types::MetadataRecord::new();
        if let Some(c) = category {
            metadata.insert("category".into(), c);
        }
        FileRecord {
            file_name: name.into(),
            metadata,
            replaced_images: None,
        }
    }

    // =========================================================================
    // Category histogram
    // =========================================================================

    #[test]
    fn histogram_counts_in_first_seen_order() {
        let records = [
            record("a", Some(vec!["tech", "life"].into())),
            record("b", Some(vec!["life", "food"].into())),
            record("c", None),
            record("d", Some("tech".into())),
        ];
        let hist = category_histogram(&records);
        let pairs: Vec<(&str, usize)> = hist
            .iter()
            .map(|c| (c.category.as_str(), c.count))
            .collect();
        assert_eq!(pairs, [("tech", 1), ("life", 2), ("food", 1)]);
    }

    #[test]
    fn histogram_ignores_empty_labels() {
        let records = [record("a", Some(vec!["", "x"].into()))];
        assert_eq!(category_histogram(&records).len(), 1);
    }

    #[test]
    fn histogram_of_nothing_is_empty() {
        assert!(category_histogram(&[]).is_empty());
    }

    #[test]
    fn histogram_json_shape() {
        let hist = category_histogram(&[record("a", Some(vec!["tech", "life"].into()))]);
        assert_eq!(
            serde_json::to_string(&hist).unwrap(),
            r#"[{"category":"tech","count":1},{"category":"life","count":1}]"#
        );
    }

    // =========================================================================
    // Runs over the fixture tree
    // =========================================================================

    fn discover_in(root: &Path) -> impl FnMut(&str) -> Result<Vec<PathBuf>, DiscoverError> + '_ {
        move |name| discover_collection(&root.join(name), false, &FilePattern::default())
    }

    #[tokio::test]
    async fn index_run_covers_every_collection() {
        let tmp = setup_fixtures();
        let collections = names(&["events", "news", "posts", "pages"]);

        let report = run(&collections, "posts", discover_in(tmp.path()), &IndexOnly).await;

        let counts: Vec<(&str, usize)> = report
            .collections
            .iter()
            .map(|c| (c.name.as_str(), c.records.len()))
            .collect();
        assert_eq!(
            counts,
            [("events", 1), ("news", 1), ("posts", 2), ("pages", 0)]
        );
        assert_eq!(report.total_failures(), 0);
        assert!(report.collections.iter().all(|c| c.images.is_none()));

        let posts = report.collection("posts").unwrap();
        assert_eq!(posts.records[0].file_name, "a");
        assert_eq!(posts.records[0].replaced_images, None);
        assert_eq!(report.categories[0].category, "tech");
    }

    #[tokio::test]
    async fn image_run_rewrites_and_counts() {
        let tmp = setup_fixtures();
        let processor = ImageProcessor::new(
            Scanner::default(),
            Dispatcher::new(MockUploader::new(), Duration::from_secs(5)),
            WriteMode::InPlace,
        );
        let collections = names(&["events", "news", "posts"]);

        let report = run(&collections, "posts", discover_in(tmp.path()), &processor).await;

        let posts = report.collection("posts").unwrap();
        assert_eq!(posts.records[0].replaced_images, Some(2));
        assert_eq!(
            posts.records[0].metadata.get("coverImage"),
            Some(&MetadataValue::from("https://cdn.example/cover.png"))
        );
        // b.md shares cover.png with a.md
        assert_eq!(posts.records[1].replaced_images, Some(1));
        assert_eq!(processor.dispatcher().uploader().call_count(), 2);
        assert_eq!(processor.dispatcher().stats().reuses(), 1);
        assert_eq!(report.total_replaced(), 3);
        assert_eq!(posts.written, 2);
    }

    #[tokio::test]
    async fn unreadable_file_is_excluded_not_fatal() {
        let tmp = setup_fixtures();
        let posts = tmp.path().join("posts");
        let broken = posts.join("broken.md");
        // Invalid UTF-8 cannot be read as text.
        fs::write(&broken, [0xff, 0xfe, 0x00]).unwrap();

        let report = run(&names(&["posts"]), "posts", discover_in(tmp.path()), &IndexOnly).await;

        let out = report.collection("posts").unwrap();
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].path, broken);
    }

    #[tokio::test]
    async fn discovery_error_recorded_as_failure() {
        let report = run(
            &names(&["posts"]),
            "posts",
            |_: &str| Err(DiscoverError::NotFound(PathBuf::from("posts"))),
            &IndexOnly,
        )
        .await;
        let out = report.collection("posts").unwrap();
        assert!(out.records.is_empty());
        assert_eq!(out.failures.len(), 1);
    }

    #[test]
    fn check_touches_nothing() {
        let tmp = setup_fixtures();
        let before = fs::read_to_string(tmp.path().join("posts/a.md")).unwrap();

        let checked = check(
            &names(&["posts", "pages"]),
            discover_in(tmp.path()),
            &Scanner::default(),
        );

        assert_eq!(checked.len(), 2);
        let posts = &checked[0];
        let totals: (usize, usize, usize) = posts.files.iter().fold((0, 0, 0), |t, f| {
            (t.0 + f.local, t.1 + f.remote, t.2 + f.missing)
        });
        assert_eq!(totals, (3, 1, 0));
        assert!(checked[1].files.is_empty());
        assert_eq!(
            fs::read_to_string(tmp.path().join("posts/a.md")).unwrap(),
            before
        );
    }

    // =========================================================================
    // Writing outputs
    // =========================================================================

    #[tokio::test]
    async fn outputs_written_including_empty_collections() {
        let tmp = setup_fixtures();
        let collections = names(&["events", "news", "posts", "pages"]);
        let report = run(&collections, "posts", discover_in(tmp.path()), &IndexOnly).await;

        let written = write_outputs(tmp.path(), &report).unwrap();
        assert_eq!(written.len(), 5);

        assert_eq!(fs::read_to_string(tmp.path().join("pages.json")).unwrap(), "[]");

        let posts: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(tmp.path().join("posts.json")).unwrap())
                .unwrap();
        assert_eq!(posts[0]["fileName"], "a");
        assert_eq!(posts[0]["title"], "Hello");

        let cats: Vec<CategoryCount> = serde_json::from_str(
            &fs::read_to_string(tmp.path().join("posts-categories.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(cats[0], CategoryCount {
            category: "tech".into(),
            count: 2,
        });
    }

    #[test]
    fn output_paths() {
        let root = Path::new("/c");
        assert_eq!(collection_path(root, "news"), Path::new("/c/news.json"));
        assert_eq!(
            categories_path(root, "posts"),
            Path::new("/c/posts-categories.json")
        );
    }

    #[test]
    fn histogram_skipped_when_collection_not_run() {
        let tmp = tempfile::TempDir::new().unwrap();
        let report = RunReport {
            collections: vec![CollectionOutput::new("news")],
            category_collection: "posts".into(),
            categories: Vec::new(),
        };
        let written = write_outputs(tmp.path(), &report).unwrap();
        assert_eq!(written, [tmp.path().join("news.json")]);
    }
}
