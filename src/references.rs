//! Image reference discovery.
//!
//! A document can point at local images in two places:
//!
//! - **Front-matter fields** such as `coverImage: ./img/cover.png`. Only a
//!   configured set of field names is recognized (see
//!   [`DEFAULT_IMAGE_FIELDS`]); matching is case-insensitive and anchored at
//!   the start of a front-matter line.
//! - **Inline Markdown images** in the body: `![alt](path)`. The path runs up
//!   to the first closing parenthesis that is not escaped with a backslash.
//!
//! The two regions are scanned separately: field patterns only ever see the
//! front-matter block, inline patterns only the body. A document without
//! front matter is all body.
//!
//! Every match records its byte span in the document so the rewriter can
//! substitute by offset. References that are already remote (`http://`,
//! `https://`) are skipped, as are local paths that do not resolve to an
//! existing file. Neither is an error.

use crate::frontmatter;
use regex::Regex;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Front-matter fields recognized as image references by default.
pub const DEFAULT_IMAGE_FIELDS: &[&str] = &[
    "coverImage",
    "image",
    "thumbnail",
    "hero",
    "banner",
    "featuredImage",
];

/// Where a reference was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceKind {
    /// A front-matter field; holds the field name as written in the document.
    FrontMatterField(String),
    /// An inline `![alt](path)` image; holds the alt text verbatim.
    InlineMarkdown(String),
}

/// A reference matched in the text, before path resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Byte range of the replaceable text within the document.
    pub span: Range<usize>,
    /// The path exactly as written (escapes intact).
    pub raw_path: String,
    pub kind: ReferenceKind,
}

impl Candidate {
    /// The path with Markdown escapes removed and surrounding space trimmed.
    pub fn path_text(&self) -> String {
        unescape(self.raw_path.trim())
    }

    pub fn is_remote(&self) -> bool {
        let p = self.raw_path.trim();
        p.starts_with("http://") || p.starts_with("https://")
    }
}

/// A local image reference ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Verbatim matched text.
    pub original: String,
    pub span: Range<usize>,
    /// Absolute, canonical path of the image file.
    pub resolved: PathBuf,
    pub kind: ReferenceKind,
}

impl ImageReference {
    /// Text that replaces `original` once the image is hosted at `url`.
    pub fn replacement(&self, url: &str) -> String {
        match &self.kind {
            ReferenceKind::FrontMatterField(field) => format!("{field}: \"{url}\""),
            ReferenceKind::InlineMarkdown(alt) => format!("![{alt}]({url})"),
        }
    }
}

/// A reference that needs no upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Skipped {
    /// Already a remote URL.
    Remote(String),
    /// Local path that does not point at an existing file.
    Missing { raw: String, resolved: PathBuf },
}

/// Result of scanning one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scan {
    /// Local references in document order (front matter first, then body).
    pub references: Vec<ImageReference>,
    pub skipped: Vec<Skipped>,
}

impl Scan {
    pub fn remote_count(&self) -> usize {
        self.skipped
            .iter()
            .filter(|s| matches!(s, Skipped::Remote(_)))
            .count()
    }

    pub fn missing_count(&self) -> usize {
        self.skipped.len() - self.remote_count()
    }
}

/// Compiled patterns for one set of recognized fields.
#[derive(Debug, Clone)]
pub struct Scanner {
    field: Regex,
    inline: Regex,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new(DEFAULT_IMAGE_FIELDS)
    }
}

impl Scanner {
    /// Build a scanner for the given front-matter field names.
    pub fn new<S: AsRef<str>>(fields: &[S]) -> Self {
        let alternation = fields
            .iter()
            .map(|f| regex::escape(f.as_ref()))
            .collect::<Vec<_>>()
            .join("|");
        // Group 1 (field) starts the replaceable span; indentation stays put.
        // The value is a whole quoted string (3, 4) or the rest of the line (5),
        // so a quote inside a path is part of the path.
        let field = Regex::new(&format!(
            r#"(?im)^[ \t]*(({alternation})[ \t]*:[ \t]*(?:"([^"\r\n]+)"|'([^'\r\n]+)'|([^"'\s][^\r\n]*?)))[ \t]*\r?$"#
        ))
        .expect("escaped field alternation is a valid pattern");
        let inline = Regex::new(r"!\[([^\]]*)\]\(((?:\\.|[^)\\])+)\)")
            .expect("inline image pattern is valid");
        Self { field, inline }
    }

    /// Find candidate references without touching the filesystem.
    pub fn candidates(&self, document: &str) -> Vec<Candidate> {
        let mut found = Vec::new();
        let body_start = match frontmatter::locate(document) {
            Some(block) => {
                let offset = block.span.start;
                for caps in self.field.captures_iter(block.text) {
                    let path = caps.get(3).or_else(|| caps.get(4)).or_else(|| caps.get(5));
                    let (Some(whole), Some(name), Some(path)) = (caps.get(1), caps.get(2), path)
                    else {
                        continue;
                    };
                    found.push(Candidate {
                        span: offset + whole.start()..offset + whole.end(),
                        raw_path: path.as_str().to_string(),
                        kind: ReferenceKind::FrontMatterField(name.as_str().to_string()),
                    });
                }
                block.body_start
            }
            None => 0,
        };

        let body = &document[body_start..];
        for caps in self.inline.captures_iter(body) {
            let (Some(whole), Some(alt), Some(path)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };
            found.push(Candidate {
                span: body_start + whole.start()..body_start + whole.end(),
                raw_path: path.as_str().to_string(),
                kind: ReferenceKind::InlineMarkdown(alt.as_str().to_string()),
            });
        }
        found
    }

    /// Scan a document whose relative paths are resolved against `base_dir`.
    pub fn scan(&self, document: &str, base_dir: &Path) -> Scan {
        let mut scan = Scan::default();
        for candidate in self.candidates(document) {
            if candidate.is_remote() {
                debug!(path = %candidate.raw_path, "skipping remote image");
                scan.skipped.push(Skipped::Remote(candidate.raw_path));
                continue;
            }

            let joined = base_dir.join(candidate.path_text());
            match resolve_existing(&joined) {
                Some(resolved) => {
                    debug!(path = %resolved.display(), "found local image");
                    scan.references.push(ImageReference {
                        original: document[candidate.span.clone()].to_string(),
                        span: candidate.span,
                        resolved,
                        kind: candidate.kind,
                    });
                }
                None => {
                    warn!(path = %joined.display(), "image file not found, leaving reference as is");
                    scan.skipped.push(Skipped::Missing {
                        raw: candidate.raw_path,
                        resolved: joined,
                    });
                }
            }
        }
        scan
    }
}

/// Canonical path of an existing regular file.
fn resolve_existing(path: &Path) -> Option<PathBuf> {
    let canonical = dunce::canonicalize(path).ok()?;
    canonical.is_file().then_some(canonical)
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next) => out.push(next),
                None => out.push(c),
            }
        } else {
            out.push(c);
        }
    }
    out
}
