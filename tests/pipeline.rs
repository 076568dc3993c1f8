//! End-to-end runs over a temporary content tree with a stub uploader.

use async_trait::async_trait;
use frontdex::aggregate::{self, RunReport};
use frontdex::cache::Dispatcher;
use frontdex::discover::{DiscoverError, FilePattern, discover_collection};
use frontdex::process::{ImageProcessor, IndexOnly, WriteMode};
use frontdex::references::Scanner;
use frontdex::upload::{UploadError, Uploader};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

/// Maps every upload to the same URL and counts calls.
struct StubUploader {
    calls: AtomicUsize,
}

impl StubUploader {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Uploader for StubUploader {
    async fn upload(&self, _file_name: &str, _bytes: Vec<u8>) -> Result<String, UploadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("https://cdn.example/X".to_string())
    }
}

const POST: &str = "---
title: \"Hello\"
category: [
\"tech\",
\"life\"
]
coverImage: ./img/cover.png
---
Body ![alt](./img/inline.png)
";

fn content_tree() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let posts = tmp.path().join("posts");
    fs::create_dir_all(posts.join("img")).unwrap();
    fs::write(posts.join("img/cover.png"), b"cover").unwrap();
    fs::write(posts.join("img/inline.png"), b"inline").unwrap();
    fs::write(posts.join("a.md"), POST).unwrap();
    fs::create_dir_all(tmp.path().join("news")).unwrap();
    tmp
}

fn collections() -> Vec<String> {
    ["events", "news", "posts"].map(String::from).to_vec()
}

fn discover_in(root: &Path) -> impl FnMut(&str) -> Result<Vec<PathBuf>, DiscoverError> + '_ {
    move |name| discover_collection(&root.join(name), false, &FilePattern::default())
}

fn read_json(path: PathBuf) -> serde_json::Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

async fn build_with_images(root: &Path) -> (RunReport, usize) {
    let processor = ImageProcessor::new(
        Scanner::default(),
        Dispatcher::new(StubUploader::new(), Duration::from_secs(5)),
        WriteMode::InPlace,
    );
    let report = aggregate::run(&collections(), "posts", discover_in(root), &processor).await;
    aggregate::write_outputs(root, &report).unwrap();
    let calls = processor.dispatcher().uploader().calls.load(Ordering::SeqCst);
    (report, calls)
}

#[tokio::test]
async fn build_rewrites_document_and_writes_outputs() {
    let tmp = content_tree();
    let root = tmp.path();

    let (report, calls) = build_with_images(root).await;
    assert_eq!(calls, 2);
    assert_eq!(report.total_replaced(), 2);

    let rewritten = fs::read_to_string(root.join("posts/a.md")).unwrap();
    assert_eq!(
        rewritten,
        "---
title: \"Hello\"
category: [
\"tech\",
\"life\"
]
coverImage: \"https://cdn.example/X\"
---
Body ![alt](https://cdn.example/X)
"
    );

    let posts = read_json(root.join("posts.json"));
    assert_eq!(
        posts,
        serde_json::json!([{
            "fileName": "a",
            "title": "Hello",
            "category": ["tech", "life"],
            "coverImage": "https://cdn.example/X",
            "replacedImages": 2
        }])
    );

    // Key order is part of the output.
    let raw = fs::read_to_string(root.join("posts.json")).unwrap();
    let order: Vec<usize> = ["fileName", "title", "category", "coverImage", "replacedImages"]
        .iter()
        .map(|k| raw.find(&format!("\"{k}\"")).unwrap())
        .collect();
    assert!(order.windows(2).all(|w| w[0] < w[1]));

    assert_eq!(
        read_json(root.join("posts-categories.json")),
        serde_json::json!([
            {"category": "tech", "count": 1},
            {"category": "life", "count": 1}
        ])
    );

    // Missing and empty collections still get an output.
    assert_eq!(fs::read_to_string(root.join("events.json")).unwrap(), "[]");
    assert_eq!(fs::read_to_string(root.join("news.json")).unwrap(), "[]");
}

#[tokio::test]
async fn second_build_is_a_no_op() {
    let tmp = content_tree();
    let root = tmp.path();

    build_with_images(root).await;
    let after_first = fs::read_to_string(root.join("posts/a.md")).unwrap();

    let (report, calls) = build_with_images(root).await;
    assert_eq!(calls, 0);
    assert_eq!(report.total_replaced(), 0);
    assert_eq!(report.collection("posts").unwrap().written, 0);
    assert_eq!(fs::read_to_string(root.join("posts/a.md")).unwrap(), after_first);
}

#[tokio::test]
async fn index_only_build_leaves_documents_alone() {
    let tmp = content_tree();
    let root = tmp.path();

    let report = aggregate::run(&collections(), "posts", discover_in(root), &IndexOnly).await;
    aggregate::write_outputs(root, &report).unwrap();

    assert_eq!(fs::read_to_string(root.join("posts/a.md")).unwrap(), POST);
    let posts = read_json(root.join("posts.json"));
    assert_eq!(posts[0]["coverImage"], "./img/cover.png");
    assert!(posts[0].get("replacedImages").is_none());
}

#[tokio::test]
async fn shared_image_across_files_uploads_once() {
    let tmp = content_tree();
    let root = tmp.path();
    fs::write(
        root.join("posts/b.md"),
        "---\ntitle: B\nhero: img/cover.png\n---\n",
    )
    .unwrap();

    let (report, calls) = build_with_images(root).await;

    assert_eq!(calls, 2);
    let posts = report.collection("posts").unwrap();
    assert_eq!(posts.records[1].replaced_images, Some(1));
    assert_eq!(
        fs::read_to_string(root.join("posts/b.md")).unwrap(),
        "---\ntitle: B\nhero: \"https://cdn.example/X\"\n---\n"
    );
}
