// rust/launch-core/src/storage/mod.rs

//! Filesystem primitives shared by cooperating processes.
//!
//! - [`FileLock`] / [`LockGuard`]: exclusive advisory locks scoped to a path.
//! - [`CacheDirs`]: the base and datasets directories every rank agrees on.
//! - [`write_file`]: whole-file writes, optionally atomic.
//!
//! # Example
//!
//! ```no_run
//! use launch_core::storage::FileLock;
//! use std::path::Path;
//!
//! let lock = FileLock::for_target(Path::new("/tmp/cache/vocab.json"));
//! let guard = lock.acquire_with_cleanup().unwrap();
//! // ... exclusive section ...
//! guard.release().unwrap();
//! ```

mod local;
mod lock;

pub use local::{resolve_relative, write_file, CacheDirs, CACHE_DIR_NAME};
pub use lock::{lock_path_for, remove_lock_file, FileLock, LockGuard, DEFAULT_LOCK_SUFFIX};
