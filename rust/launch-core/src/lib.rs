// rust/launch-core/src/lib.rs

//! Distributed Training Launch - Core Library
//!
//! This crate provides the scaffolding a training process runs before its
//! first step: cross-process file locking, at-most-once shared downloads,
//! distributed topology resolution, and compute device initialization.

pub mod config;
pub mod console;
pub mod env;
pub mod error;
pub mod metrics;
pub mod storage;
pub mod topology;

// Re-export commonly used types for convenience
pub use config::LaunchConfig;
pub use console::{Console, ConsoleStyle};
pub use env::EnvironmentView;
pub use error::{LaunchError, Result};
pub use metrics::{MetricsSink, NoopMetrics};
pub use storage::{CacheDirs, FileLock, LockGuard};
pub use topology::Topology;

pub mod download;
pub use download::{Fetcher, HttpFetcher, SharedDownloader};

pub mod compute;
pub use compute::{ComputeEnvironment, ComputeHandle, DeviceBackend, DeviceKind, ProcessGroup};

pub mod runtime;
pub use runtime::Bootstrap;
