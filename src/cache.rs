//! Upload deduplication for a single run.
//!
//! The same local image is often referenced from several documents (a shared
//! banner, a logo) or several times inside one. Uploading it once per
//! reference wastes bandwidth and leaves duplicate images in the hosting
//! account, so every upload goes through a [`Dispatcher`] that remembers the
//! URL returned for each file.
//!
//! # Design
//!
//! ## Cache keys
//!
//! Entries are keyed by the **resolved absolute path** of the image. The
//! reference scanner canonicalizes paths before they reach the dispatcher,
//! so `./img/a.png` and `img/../img/a.png` share an entry.
//!
//! ## Concurrent requests
//!
//! An entry is either a stored URL or an upload in flight. The first caller
//! for a path inserts an in-flight slot holding a [`watch`] receiver and
//! performs the upload; callers that arrive while it runs clone the receiver
//! and wait. Every caller that joined an attempt observes that attempt's
//! outcome, success or failure, so N concurrent references to a broken image
//! cost one request and one timeout. The check-or-insert happens under the
//! [`DashMap`] entry lock, which is never held across an `.await`.
//!
//! ## Failures
//!
//! A failed attempt removes its slot before waking the waiters. Nothing is
//! cached, so a later request for the same path tries again. An upload that
//! is dropped mid-flight also removes its slot; its waiters fail.
//!
//! ## Lifetime
//!
//! The cache is owned by the dispatcher, constructed per run, and never
//! persisted. There is no invalidation: a file's URL is fixed for the run.

use crate::upload::Uploader;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("upload failed for {}: {detail}", path.display())]
    UploadFailed { path: PathBuf, detail: String },
}

impl DispatchError {
    fn failed(path: &Path, detail: impl fmt::Display) -> Self {
        DispatchError::UploadFailed {
            path: path.to_path_buf(),
            detail: detail.to_string(),
        }
    }

    fn detail(&self) -> &str {
        match self {
            DispatchError::UploadFailed { detail, .. } => detail,
        }
    }
}

/// Outcome of one attempt as seen by its waiters; `None` until it settles.
type Attempt = Option<Result<String, String>>;

#[derive(Debug)]
enum Slot {
    Ready(String),
    InFlight(watch::Receiver<Attempt>),
}

/// What a caller does for a path.
enum Role {
    Hit(String),
    Wait(watch::Receiver<Attempt>),
    Lead(watch::Sender<Attempt>),
}

/// Resolved-path → hosted-URL map for one run.
#[derive(Debug, Default)]
pub struct UploadCache {
    entries: DashMap<PathBuf, Slot>,
}

impl UploadCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored URL for `path`, if an upload already succeeded.
    pub fn get(&self, path: &Path) -> Option<String> {
        self.entries.get(path).and_then(|slot| match slot.value() {
            Slot::Ready(url) => Some(url.clone()),
            Slot::InFlight(_) => None,
        })
    }

    /// Atomically look up `path`, claiming it for upload when absent.
    fn claim(&self, path: &Path) -> Role {
        match self.entries.entry(path.to_path_buf()) {
            Entry::Occupied(entry) => match entry.get() {
                Slot::Ready(url) => Role::Hit(url.clone()),
                Slot::InFlight(rx) => Role::Wait(rx.clone()),
            },
            Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(None);
                entry.insert(Slot::InFlight(rx));
                Role::Lead(tx)
            }
        }
    }

    /// Number of paths with a stored URL.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| matches!(entry.value(), Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes an in-flight slot unless the upload it guards succeeded.
struct InFlightGuard<'a> {
    cache: &'a UploadCache,
    path: &'a Path,
    settled: bool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.cache
                .entries
                .remove_if(self.path, |_, slot| matches!(slot, Slot::InFlight(_)));
        }
    }
}

/// Upload counters for a run.
#[derive(Debug, Default)]
pub struct CacheStats {
    uploads: AtomicU32,
    reuses: AtomicU32,
    failures: AtomicU32,
}

impl CacheStats {
    fn upload(&self) {
        self.uploads.fetch_add(1, Ordering::Relaxed);
    }

    fn reuse(&self) {
        self.reuses.fetch_add(1, Ordering::Relaxed);
    }

    fn failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Successful network uploads.
    pub fn uploads(&self) -> u32 {
        self.uploads.load(Ordering::Relaxed)
    }

    /// Requests answered from the cache (including waiters on an in-flight upload).
    pub fn reuses(&self) -> u32 {
        self.reuses.load(Ordering::Relaxed)
    }

    /// Requests that ended in a failed or timed-out upload, waiters included.
    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u32 {
        self.uploads() + self.reuses() + self.failures()
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (uploads, reuses, failures) = (self.uploads(), self.reuses(), self.failures());
        if reuses == 0 && failures == 0 {
            return write!(f, "{} uploaded", uploads);
        }
        if failures > 0 {
            write!(
                f,
                "{} uploaded, {} reused, {} failed ({} total)",
                uploads,
                reuses,
                failures,
                self.total()
            )
        } else {
            write!(
                f,
                "{} uploaded, {} reused ({} total)",
                uploads,
                reuses,
                self.total()
            )
        }
    }
}

/// Resolves local image paths to hosted URLs, uploading each file at most
/// once per successful outcome.
pub struct Dispatcher<U> {
    uploader: U,
    cache: UploadCache,
    stats: CacheStats,
    timeout: Duration,
}

impl<U: Uploader> Dispatcher<U> {
    pub fn new(uploader: U, timeout: Duration) -> Self {
        Self {
            uploader,
            cache: UploadCache::new(),
            stats: CacheStats::default(),
            timeout,
        }
    }

    pub fn cache(&self) -> &UploadCache {
        &self.cache
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn uploader(&self) -> &U {
        &self.uploader
    }

    /// Return the hosted URL for `path`, uploading it if this run has not
    /// already done so.
    ///
    /// `path` must be the resolved absolute path; it is used verbatim as the
    /// cache key.
    pub async fn resolve(&self, path: &Path) -> Result<String, DispatchError> {
        match self.cache.claim(path) {
            Role::Hit(url) => {
                debug!(path = %path.display(), %url, "upload cache hit");
                self.stats.reuse();
                Ok(url)
            }
            Role::Wait(rx) => self.wait(path, rx).await,
            Role::Lead(tx) => self.lead(path, tx).await,
        }
    }

    async fn lead(&self, path: &Path, tx: watch::Sender<Attempt>) -> Result<String, DispatchError> {
        let mut guard = InFlightGuard {
            cache: &self.cache,
            path,
            settled: false,
        };
        let result = self.upload_once(path).await;

        match &result {
            Ok(url) => {
                self.cache
                    .entries
                    .insert(path.to_path_buf(), Slot::Ready(url.clone()));
                guard.settled = true;
                self.stats.upload();
                info!(path = %path.display(), %url, "uploaded image");
            }
            Err(e) => {
                // Slot goes before waiters wake so a later request retries.
                drop(guard);
                self.stats.failure();
                error!(path = %path.display(), error = %e, "image upload failed");
            }
        }

        let shared = match &result {
            Ok(url) => Ok(url.clone()),
            Err(e) => Err(e.detail().to_string()),
        };
        // No receivers left is fine.
        let _ = tx.send(Some(shared));
        result
    }

    async fn wait(
        &self,
        path: &Path,
        mut rx: watch::Receiver<Attempt>,
    ) -> Result<String, DispatchError> {
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(settled) => (*settled).clone(),
            Err(_) => None,
        };
        match outcome {
            Some(Ok(url)) => {
                debug!(path = %path.display(), %url, "joined in-flight upload");
                self.stats.reuse();
                Ok(url)
            }
            Some(Err(detail)) => {
                self.stats.failure();
                debug!(path = %path.display(), "joined in-flight upload that failed");
                Err(DispatchError::failed(path, detail))
            }
            None => {
                self.stats.failure();
                Err(DispatchError::failed(path, "upload abandoned"))
            }
        }
    }

    async fn upload_once(&self, path: &Path) -> Result<String, DispatchError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| DispatchError::failed(path, e))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());

        match tokio::time::timeout(self.timeout, self.uploader.upload(&file_name, bytes)).await {
            Ok(Ok(url)) => Ok(url),
            Ok(Err(e)) => Err(DispatchError::failed(path, e)),
            Err(_) => Err(DispatchError::failed(
                path,
                format!("timed out after {}s", self.timeout.as_secs_f32()),
            )),
        }
    }
}

impl<U> fmt::Debug for Dispatcher<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("cache", &self.cache)
            .field("stats", &self.stats)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
