//! # frontdex
//!
//! Indexes directories of Markdown content into JSON and moves their local
//! images to a hosted image service. Each content file carries a small
//! front-matter block; frontdex turns those blocks into one JSON array per
//! collection plus a category histogram, and can rewrite local image
//! references to the URLs returned by Cloudflare Images along the way.
//!
//! # Architecture: Per-File Pipeline
//!
//! ```text
//! discover  content/<collection>/*.md
//!    │
//!    ├─ scan      image references (front-matter fields + inline ![alt](path))
//!    ├─ upload    every local image of the file concurrently, deduplicated
//!    ├─ rewrite   by byte span, once all uploads have settled
//!    ├─ write     only when the text changed
//!    └─ parse     front matter of the final text → FileRecord
//!    │
//! aggregate  <collection>.json, <collection>-categories.json
//! ```
//!
//! Files are processed one after another; only the uploads of a single file
//! run concurrently. The upload step is optional (`build --skip-images`), as
//! is the JSON step (`build --skip-json`).
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`frontmatter`] | Front-matter block locator and line-state-machine parser |
//! | [`types`] | `MetadataValue`, `FileRecord`, `CategoryCount` and their JSON shape |
//! | [`references`] | Finds image references, resolves local paths, skips remote ones |
//! | [`upload`] | `Uploader` trait and the Cloudflare Images client |
//! | [`cache`] | Run-scoped upload cache and dispatcher; one upload per file path |
//! | [`rewrite`] | Span-based document rewriting |
//! | [`process`] | One file end to end; write targets |
//! | [`discover`] | File or directory input, recursion, glob filtering |
//! | [`aggregate`] | Collections, category histogram, JSON outputs, dry-run check |
//! | [`config`] | `frontdex.toml` loading, merging, validation; credentials |
//! | [`output`] | CLI summaries for each command |
//!
//! # Design Decisions
//!
//! ## Not a YAML Parser
//!
//! Front matter is read line by line and only knows scalars and one level of
//! string arrays. Anything else is skipped rather than rejected, so a stray
//! line never loses a whole file's metadata.
//!
//! ## Replacement by Span
//!
//! The scanner records the byte range of every match and the rewriter splices
//! by range in one pass. Two identical `![alt](path)` tokens are rewritten
//! independently and a replacement can never be matched again.
//!
//! ## One Upload per Image per Run
//!
//! The dispatcher keys uploads by canonical path and collapses concurrent
//! first requests onto a single in-flight upload. Failures are not cached.
//! Each upload is bounded by a timeout.

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod discover;
pub mod frontmatter;
pub mod output;
pub mod process;
pub mod references;
pub mod rewrite;
pub mod types;
pub mod upload;

#[cfg(test)]
pub(crate) mod test_helpers;
