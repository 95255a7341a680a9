// rust/launch-core/src/download/shared.rs

//! At-most-once downloads shared by every rank of a run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::DownloadConfig;
use crate::console::Console;
use crate::error::Result;
use crate::storage::{lock_path_for, resolve_relative, write_file, FileLock, DEFAULT_LOCK_SUFFIX};

use super::fetcher::Fetcher;

const TAG: &str = "download";

/// One artifact to place in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub url: String,
    pub destination: PathBuf,
    pub lock_path: PathBuf,
}

/// Downloads files into a shared cache directory so that, across all
/// cooperating processes, each file is fetched at most once.
///
/// The protocol is double-checked locking on a sibling `<file>.lock`:
/// an existing destination is returned without touching the lock; otherwise
/// the caller blocks on the lock, checks again, and only then fetches.
pub struct SharedDownloader {
    cache_dir: PathBuf,
    fetcher: Arc<dyn Fetcher>,
    console: Arc<Console>,
    atomic_writes: bool,
    lock_suffix: String,
}

impl SharedDownloader {
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        fetcher: Arc<dyn Fetcher>,
        console: Arc<Console>,
        config: &DownloadConfig,
    ) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            fetcher,
            console,
            atomic_writes: config.atomic_writes,
            lock_suffix: DEFAULT_LOCK_SUFFIX.to_string(),
        }
    }

    /// Overrides the lock file suffix (default `.lock`).
    #[must_use]
    pub fn with_lock_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.lock_suffix = suffix.into();
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Describes where `filename` would be stored and locked.
    ///
    /// # Errors
    ///
    /// Returns an invalid-argument error if `filename` is not a plain
    /// relative path.
    pub fn target(&self, url: &str, filename: &str) -> Result<DownloadTarget> {
        let destination = resolve_relative(&self.cache_dir, filename)?;
        let lock_path = lock_path_for(&destination, &self.lock_suffix);
        Ok(DownloadTarget {
            url: url.to_string(),
            destination,
            lock_path,
        })
    }

    /// Returns the cached path of `filename`, downloading it from `url` if no
    /// process has done so yet.
    ///
    /// Blocks without timeout while another process holds the file's lock.
    ///
    /// # Errors
    ///
    /// - invalid argument for a bad `filename`
    /// - download error if the fetch fails (nothing is written)
    /// - lock or storage errors from the filesystem
    pub fn ensure(&self, url: &str, filename: &str) -> Result<PathBuf> {
        let target = self.target(url, filename)?;

        if target.destination.exists() {
            return Ok(target.destination);
        }

        let guard = FileLock::new(&target.lock_path).acquire_with_cleanup()?;

        // Another process may have finished while we waited.
        if target.destination.exists() {
            tracing::debug!(
                path = %target.destination.display(),
                "download completed by another process"
            );
            return Ok(settle(guard.release(), target.destination));
        }

        self.console.info(TAG, &format!("Downloading {url}..."));
        tracing::info!(url, path = %target.destination.display(), "fetching");

        let content = self.fetcher.fetch(url)?;
        write_file(&target.destination, content.as_bytes(), self.atomic_writes)?;

        self.console.info(
            TAG,
            &format!("Downloaded to {}", target.destination.display()),
        );
        tracing::info!(
            path = %target.destination.display(),
            bytes = content.len(),
            "download finished"
        );

        Ok(settle(guard.release(), target.destination))
    }
}

// The destination is already in place; an unlock failure only means the
// descriptor close releases the lock instead.
fn settle(released: Result<()>, destination: PathBuf) -> PathBuf {
    if let Err(e) = released {
        tracing::warn!(
            path = %destination.display(),
            error = %e,
            "lock release failed after download"
        );
    }
    destination
}

impl std::fmt::Debug for SharedDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedDownloader")
            .field("cache_dir", &self.cache_dir)
            .field("atomic_writes", &self.atomic_writes)
            .field("lock_suffix", &self.lock_suffix)
            .finish()
    }
}
