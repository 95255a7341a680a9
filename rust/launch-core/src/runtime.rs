// rust/launch-core/src/runtime.rs

//! Launch orchestration.
//!
//! This module provides the `Bootstrap` struct that ties together the pieces
//! a training process needs before its first step: configuration, the
//! distributed topology, the console, the download cache and compute
//! initialization.
//!
//! # Example
//!
//! ```no_run
//! use launch_core::compute::{DeviceKind, HostDevices};
//! use launch_core::Bootstrap;
//! use std::sync::Arc;
//!
//! let bootstrap = Bootstrap::new().unwrap();
//!
//! // Every rank calls this; only one of them downloads.
//! let words = bootstrap
//!     .download("https://example.com/words.txt", "words.txt")
//!     .unwrap();
//! println!("cached at {}", words.display());
//!
//! let devices = Arc::new(HostDevices::new(bootstrap.env().clone()));
//! let group = Arc::new(bootstrap.file_store_group());
//! let compute = bootstrap.compute(devices, group);
//!
//! let mut handle = compute.initialize_kind(DeviceKind::Cpu).unwrap();
//! // ... train ...
//! compute.cleanup(&mut handle).unwrap();
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::compute::{ComputeEnvironment, DeviceBackend, FileStoreGroup, ProcessGroup};
use crate::config::LaunchConfig;
use crate::console::Console;
use crate::download::{Fetcher, HttpFetcher, SharedDownloader};
use crate::env::EnvironmentView;
use crate::error::Result;
use crate::storage::CacheDirs;
use crate::topology::{self, Topology};

/// Everything a launched process resolves once at start-up.
///
/// The `Bootstrap` owns:
/// - the validated configuration and the environment snapshot it came from
/// - the resolved topology
/// - a console that is quiet on every rank but 0
/// - the cache directories, created on construction
pub struct Bootstrap {
    config: LaunchConfig,
    env: EnvironmentView,
    topology: Topology,
    console: Arc<Console>,
    cache: CacheDirs,
}

impl Bootstrap {
    /// Creates a bootstrap from the process environment and default
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the distributed environment is malformed or the
    /// cache directories cannot be created.
    pub fn new() -> Result<Self> {
        Self::from_config(LaunchConfig::default().with_env_overrides())
    }

    /// Creates a bootstrap from a configuration file.
    ///
    /// The configuration file should be in TOML format. Environment variable
    /// overrides are applied after loading the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or is invalid.
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = LaunchConfig::from_file(path)?.with_env_overrides();
        Self::from_config(config)
    }

    /// Creates a bootstrap from a configuration, reading the process
    /// environment for topology and cache locations.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the distributed
    /// environment is malformed, or the cache directories cannot be created.
    pub fn from_config(config: LaunchConfig) -> Result<Self> {
        let console = Console::stdio(&config.console);
        Self::from_parts(config, EnvironmentView::from_process(), console)
    }

    /// Creates a bootstrap from explicit parts.
    ///
    /// `console` is made quiet on non-zero ranks.
    ///
    /// # Errors
    ///
    /// Same as [`Self::from_config`].
    pub fn from_parts(config: LaunchConfig, env: EnvironmentView, console: Console) -> Result<Self> {
        config.validate()?;

        let topology = topology::resolve(&env)?;
        let cache = CacheDirs::resolve(&config.storage, &env)?;
        let console = Arc::new(console.for_rank(topology.rank));

        tracing::debug!(
            %topology,
            base_dir = %cache.base_dir().display(),
            "bootstrap resolved"
        );

        Ok(Self {
            config,
            env,
            topology,
            console,
            cache,
        })
    }

    /// Ensures `url` is cached as `filename` in the base directory, fetching
    /// it over HTTP at most once across all ranks.
    ///
    /// # Errors
    ///
    /// Returns an error if the filename is invalid, the lock cannot be
    /// taken, the fetch fails, or the file cannot be written.
    pub fn download(&self, url: &str, filename: &str) -> Result<PathBuf> {
        let fetcher = Arc::new(HttpFetcher::new(&self.config.download)?);
        self.downloader(fetcher).ensure(url, filename)
    }

    /// Builds a downloader over the base directory with a custom fetcher.
    pub fn downloader(&self, fetcher: Arc<dyn Fetcher>) -> SharedDownloader {
        SharedDownloader::new(
            self.cache.base_dir(),
            fetcher,
            self.console.clone(),
            &self.config.download,
        )
        .with_lock_suffix(self.config.storage.lock_suffix.clone())
    }

    /// Builds the compute environment for this process.
    pub fn compute(
        &self,
        devices: Arc<dyn DeviceBackend>,
        group: Arc<dyn ProcessGroup>,
    ) -> ComputeEnvironment {
        ComputeEnvironment::new(
            devices,
            group,
            self.console.clone(),
            self.env.clone(),
            self.config.compute.clone(),
        )
    }

    /// The file-store process group configured for this run.
    pub fn file_store_group(&self) -> FileStoreGroup {
        FileStoreGroup::from_config(
            &self.config.rendezvous,
            self.cache.base_dir(),
            &self.config.storage.lock_suffix,
        )
    }

    /// Returns the current configuration.
    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    pub fn env(&self) -> &EnvironmentView {
        &self.env
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn console(&self) -> &Arc<Console> {
        &self.console
    }

    pub fn cache(&self) -> &CacheDirs {
        &self.cache
    }
}

impl std::fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bootstrap")
            .field("topology", &self.topology)
            .field("cache", &self.cache)
            .field("quiet", &self.console.is_quiet())
            .finish()
    }
}
