//! Per-file processing.
//!
//! Every content file goes through the same steps. Image handling is
//! optional:
//!
//! ```text
//! read ─┬─> scan references ─> upload all (concurrently) ─> join ─> rewrite ─> write ─┬─> parse ─> FileRecord
//!       └─────────────────────────────── index only ─────────────────────────────────┘
//! ```
//!
//! ## Fan-out, then join
//!
//! All local references of one file are handed to the [`Dispatcher`] at once
//! and awaited together. Rewriting starts only after every upload of that
//! file has settled, successfully or not, so a file is written at most once
//! and never mid-stream. A failed upload only leaves its own reference
//! untouched.
//!
//! Metadata is parsed from the rewritten text, so an uploaded `coverImage`
//! shows up in the record as its hosted URL.
//!
//! ## Write targets
//!
//! See [`WriteMode`]. In-place writes are skipped when nothing changed;
//! separate targets are always written so the output tree is complete.

use crate::cache::Dispatcher;
use crate::config::{Config, ConfigError, Credentials};
use crate::frontmatter;
use crate::references::{Scan, Scanner};
use crate::rewrite::{self, Replacement};
use crate::types::FileRecord;
use crate::upload::{CloudflareUploader, UploadError, Uploader};
use async_trait::async_trait;
use futures::future::join_all;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Why the upload pipeline could not be built.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to build upload client: {0}")]
    Client(#[from] UploadError),
}

/// Where a rewritten document goes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Overwrite the source file, only if its content changed.
    #[default]
    InPlace,
    /// Write `<stem>_updated<.ext>` next to the source.
    Suffixed,
    /// Write to the source's path relative to `input_root`, re-rooted under
    /// `output_root`.
    Mirror {
        input_root: PathBuf,
        output_root: PathBuf,
    },
}

impl WriteMode {
    /// Destination path for a rewritten `source`.
    pub fn target(&self, source: &Path) -> PathBuf {
        match self {
            WriteMode::InPlace => source.to_path_buf(),
            WriteMode::Suffixed => {
                let stem = source
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let name = match source.extension() {
                    Some(ext) => format!("{stem}_updated.{}", ext.to_string_lossy()),
                    None => format!("{stem}_updated"),
                };
                source.with_file_name(name)
            }
            WriteMode::Mirror {
                input_root,
                output_root,
            } => match source.strip_prefix(input_root) {
                Ok(relative) if !relative.as_os_str().is_empty() => output_root.join(relative),
                _ => output_root.join(source.file_name().unwrap_or(source.as_os_str())),
            },
        }
    }

    fn writes_unchanged(&self) -> bool {
        !matches!(self, WriteMode::InPlace)
    }
}

/// Per-file reference counts from an image pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageCounts {
    /// References rewritten to a hosted URL.
    pub replaced: usize,
    /// References whose upload failed; left as written.
    pub failed: usize,
    /// Local references whose file does not exist.
    pub missing: usize,
    /// References that were already remote.
    pub remote: usize,
}

impl ImageCounts {
    pub fn add(&mut self, other: &ImageCounts) {
        self.replaced += other.replaced;
        self.failed += other.failed;
        self.missing += other.missing;
        self.remote += other.remote;
    }
}

/// Result of processing one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    pub source: PathBuf,
    pub record: FileRecord,
    /// `None` when images were not processed.
    pub images: Option<ImageCounts>,
    /// Where the rewritten document was written, if it was.
    pub written: Option<PathBuf>,
}

/// Result of a dry-run check of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub source: PathBuf,
    pub record: FileRecord,
    /// Local references that would be uploaded.
    pub local: usize,
    pub remote: usize,
    pub missing: usize,
}

/// Turns one content file into a record, possibly with side effects.
#[async_trait]
pub trait FileProcessor: Send + Sync {
    async fn process(&self, path: &Path) -> Result<FileOutcome, ProcessError>;
}

/// Parses metadata without touching images.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexOnly;

#[async_trait]
impl FileProcessor for IndexOnly {
    async fn process(&self, path: &Path) -> Result<FileOutcome, ProcessError> {
        let content = read(path).await?;
        Ok(FileOutcome {
            source: path.to_path_buf(),
            record: build_record(path, &content, None),
            images: None,
            written: None,
        })
    }
}

/// Uploads local images, rewrites the document, then parses metadata.
#[derive(Debug)]
pub struct ImageProcessor<U> {
    scanner: Scanner,
    dispatcher: Dispatcher<U>,
    mode: WriteMode,
}

impl ImageProcessor<CloudflareUploader> {
    /// Build the Cloudflare Images pipeline described by `config`.
    ///
    /// `credentials` runs before anything else. Construct the processor
    /// before discovering content so missing credentials end the run with
    /// nothing read or written.
    pub fn cloudflare(
        config: &Config,
        credentials: impl FnOnce() -> Result<Credentials, ConfigError>,
        mode: WriteMode,
    ) -> Result<Self, SetupError> {
        let credentials = credentials()?;
        let uploader = CloudflareUploader::new(
            &config.upload.api_base,
            &credentials.account_id,
            &credentials.api_token,
        )?;
        info!(endpoint = uploader.endpoint(), "uploading to Cloudflare Images");
        Ok(Self::new(
            Scanner::new(&config.scan.image_fields),
            Dispatcher::new(uploader, config.upload.timeout()),
            mode,
        ))
    }
}

impl<U: Uploader> ImageProcessor<U> {
    pub fn new(scanner: Scanner, dispatcher: Dispatcher<U>, mode: WriteMode) -> Self {
        Self {
            scanner,
            dispatcher,
            mode,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher<U> {
        &self.dispatcher
    }

    pub fn mode(&self) -> &WriteMode {
        &self.mode
    }

    /// Upload every local reference in `content` and return the rewritten
    /// text with its counts. Paths resolve against `base_dir`.
    pub async fn replace_images(&self, content: &str, base_dir: &Path) -> (String, ImageCounts) {
        let scan = self.scanner.scan(content, base_dir);
        let mut counts = ImageCounts {
            missing: scan.missing_count(),
            remote: scan.remote_count(),
            ..Default::default()
        };
        if scan.references.is_empty() {
            return (content.to_string(), counts);
        }

        debug!(count = scan.references.len(), "uploading referenced images");
        let replacements = self.upload_all(&scan, &mut counts).await;
        let updated = rewrite::rewrite(content, &replacements).into_owned();
        (updated, counts)
    }

    async fn upload_all(&self, scan: &Scan, counts: &mut ImageCounts) -> Vec<Replacement> {
        let results = join_all(
            scan.references
                .iter()
                .map(|reference| self.dispatcher.resolve(&reference.resolved)),
        )
        .await;

        let mut replacements = Vec::with_capacity(results.len());
        for (reference, result) in scan.references.iter().zip(results) {
            match result {
                Ok(url) => replacements.push(Replacement {
                    span: reference.span.clone(),
                    original: reference.original.clone(),
                    replacement: reference.replacement(&url),
                }),
                Err(e) => {
                    counts.failed += 1;
                    warn!(reference = %reference.original, error = %e, "reference left unchanged");
                }
            }
        }
        counts.replaced = replacements.len();
        replacements
    }
}

#[async_trait]
impl<U: Uploader> FileProcessor for ImageProcessor<U> {
    async fn process(&self, path: &Path) -> Result<FileOutcome, ProcessError> {
        debug!(path = %path.display(), "processing file");
        let content = read(path).await?;
        let base_dir = path.parent().unwrap_or(Path::new("."));
        let (updated, counts) = self.replace_images(&content, base_dir).await;

        let changed = updated != content;
        let written = if changed || self.mode.writes_unchanged() {
            let target = self.mode.target(path);
            write(&target, &updated).await?;
            info!(path = %target.display(), replaced = counts.replaced, "wrote document");
            Some(target)
        } else {
            None
        };

        Ok(FileOutcome {
            source: path.to_path_buf(),
            record: build_record(path, &updated, Some(counts.replaced)),
            images: Some(counts),
            written,
        })
    }
}

/// Parse a file and scan its references without uploading or writing.
pub fn check_file(path: &Path, scanner: &Scanner) -> Result<CheckOutcome, ProcessError> {
    let content = std::fs::read_to_string(path).map_err(|source| ProcessError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let scan = scanner.scan(&content, path.parent().unwrap_or(Path::new(".")));
    Ok(CheckOutcome {
        source: path.to_path_buf(),
        record: build_record(path, &content, None),
        local: scan.references.len(),
        remote: scan.remote_count(),
        missing: scan.missing_count(),
    })
}

/// Build the output record for `path` from its (final) content.
pub fn build_record(path: &Path, content: &str, replaced_images: Option<usize>) -> FileRecord {
    FileRecord {
        file_name: path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
        metadata: frontmatter::parse(content),
        replaced_images,
    }
}

async fn read(path: &Path) -> Result<String, ProcessError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ProcessError::Read {
            path: path.to_path_buf(),
            source,
        })
}

async fn write(path: &Path, content: &str) -> Result<(), ProcessError> {
    let wrap = |source| ProcessError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(wrap)?;
    }
    tokio::fs::write(path, content).await.map_err(wrap)
}
