// rust/launch-core/src/storage/lock.rs

//! Inter-process advisory file locks.
//!
//! The lock is held on the open descriptor of a lock file (`flock` on POSIX,
//! `LockFileEx` on Windows), not on the file's existence.
//!
//! Guards from [`FileLock::acquire_with_cleanup`] unlink the lock file while
//! still holding it, so the cache directory does not accumulate `.lock`
//! files. A waiter that was blocked on the unlinked file then owns a lock
//! nobody else can see. To keep exclusion intact, `acquire` checks after
//! locking that its descriptor is still the file at the lock path and starts
//! over if it is not.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;

use crate::error::{LaunchError, Result};

/// Default suffix appended to a target path to form its lock path.
pub const DEFAULT_LOCK_SUFFIX: &str = ".lock";

/// An exclusive lock associated with one path.
#[derive(Debug, Clone)]
pub struct FileLock {
    lock_path: PathBuf,
}

impl FileLock {
    /// Creates a lock that uses `lock_path` directly as the lock file.
    pub fn new(lock_path: impl Into<PathBuf>) -> Self {
        Self {
            lock_path: lock_path.into(),
        }
    }

    /// Creates the lock guarding `target`, stored at `<target>.lock`.
    pub fn for_target(target: &Path) -> Self {
        Self::with_suffix(target, DEFAULT_LOCK_SUFFIX)
    }

    /// Creates the lock guarding `target`, stored at `<target><suffix>`.
    pub fn with_suffix(target: &Path, suffix: &str) -> Self {
        Self::new(lock_path_for(target, suffix))
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    /// Blocks until this process holds the lock.
    ///
    /// The lock file is left in place on release.
    ///
    /// # Errors
    ///
    /// Returns a lock error if the lock file cannot be opened or the OS
    /// refuses the lock.
    pub fn acquire(&self) -> Result<LockGuard> {
        self.acquire_inner(false)
    }

    /// Like [`acquire`](Self::acquire), but the guard deletes the lock file
    /// on release, before giving up the lock.
    pub fn acquire_with_cleanup(&self) -> Result<LockGuard> {
        self.acquire_inner(true)
    }

    fn acquire_inner(&self, remove_on_release: bool) -> Result<LockGuard> {
        if let Some(parent) = self.lock_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    LaunchError::lock_with_source(
                        &self.lock_path,
                        "failed to create lock directory",
                        e,
                    )
                })?;
            }
        }

        loop {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.lock_path)
                .map_err(|e| {
                    LaunchError::lock_with_source(&self.lock_path, "failed to open lock file", e)
                })?;

            tracing::debug!(path = %self.lock_path.display(), "waiting for file lock");
            FileExt::lock_exclusive(&file).map_err(|e| {
                LaunchError::lock_with_source(&self.lock_path, "failed to acquire exclusive lock", e)
            })?;

            if !self.is_current(&file)? {
                // Unlinked by the previous holder while we waited.
                tracing::debug!(path = %self.lock_path.display(), "lock file replaced, retrying");
                drop(file);
                continue;
            }
            tracing::debug!(path = %self.lock_path.display(), "file lock acquired");

            return Ok(LockGuard {
                file: Some(file),
                lock_path: self.lock_path.clone(),
                remove_on_release,
            });
        }
    }

    /// Whether `file` is still the file found at the lock path.
    #[cfg(unix)]
    fn is_current(&self, file: &File) -> Result<bool> {
        use std::os::unix::fs::MetadataExt;

        let on_disk = match fs::metadata(&self.lock_path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                return Err(LaunchError::lock_with_source(
                    &self.lock_path,
                    "failed to stat lock file",
                    e,
                ))
            }
        };
        let held = file.metadata().map_err(|e| {
            LaunchError::lock_with_source(&self.lock_path, "failed to stat lock descriptor", e)
        })?;
        Ok(held.dev() == on_disk.dev() && held.ino() == on_disk.ino())
    }

    // Windows refuses to delete a file another handle has open without
    // delete sharing, so only the path itself can be checked.
    #[cfg(not(unix))]
    fn is_current(&self, _file: &File) -> Result<bool> {
        Ok(self.lock_path.exists())
    }
}

/// Proof of exclusive ownership. The lock is released when the guard is
/// dropped or explicitly released.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    file: Option<File>,
    lock_path: PathBuf,
    remove_on_release: bool,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    /// Releases the lock, reporting unlock failures.
    ///
    /// # Errors
    ///
    /// Returns a lock error if the OS fails to unlock the descriptor. The
    /// descriptor is closed either way, which also drops the lock.
    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };

        // Unlink while still locked; waiters on this inode re-check the path.
        if self.remove_on_release {
            remove_lock_file(&self.lock_path);
        }

        let unlocked = FileExt::unlock(&file).map_err(|e| {
            LaunchError::lock_with_source(&self.lock_path, "failed to release lock", e)
        });
        drop(file);
        tracing::debug!(path = %self.lock_path.display(), "file lock released");
        unlocked
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            tracing::warn!(error = %e, "lock release failed during drop");
        }
    }
}

/// Appends `suffix` to the file name of `target`.
pub fn lock_path_for(target: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Best-effort removal of a released lock file.
///
/// A sibling process may already have removed it; that is expected.
pub fn remove_lock_file(lock_path: &Path) {
    match fs::remove_file(lock_path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            tracing::debug!(
                path = %lock_path.display(),
                error = %e,
                "could not remove lock file"
            );
        }
    }
}
