//! Shared test utilities for the frontdex test suite.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = setup_fixtures();
//! let posts = tmp.path().join("posts");
//! assert!(posts.join("a.md").exists());
//!
//! let path = write_post(tmp.path(), "c.md", WORKED_EXAMPLE);
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// The reference document used throughout the tests: front matter with a
/// multi-line category array and a cover image, plus one inline image.
pub const WORKED_EXAMPLE: &str = "---
title: \"Hello\"
category: [
\"tech\",
\"life\"
]
coverImage: ./img/cover.png
---
Body ![alt](./img/inline.png)
";

// =========================================================================
// Fixture setup
// =========================================================================

/// Copy `fixtures/content/` to a temp directory and return it.
///
/// Tests get an isolated copy they can mutate without affecting other tests
/// or the source fixtures.
pub fn setup_fixtures() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/content");
    copy_dir_recursive(&fixtures, tmp.path()).unwrap();
    tmp
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if src_path.is_dir() {
            fs::create_dir_all(&dst_path)?;
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

/// Write `content` to `<root>/posts/<name>` next to an `img/` directory
/// holding `cover.png` and `inline.png`. Returns the document path.
pub fn write_post(root: &Path, name: &str, content: &str) -> PathBuf {
    let posts = root.join("posts");
    fs::create_dir_all(posts.join("img")).unwrap();
    for image in ["cover.png", "inline.png"] {
        let path = posts.join("img").join(image);
        if !path.exists() {
            fs::write(&path, format!("fake {image}")).unwrap();
        }
    }
    let path = posts.join(name);
    fs::write(&path, content).unwrap();
    path
}
