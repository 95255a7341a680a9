// rust/launch-core/src/config.rs

//! Configuration management for the launch scaffolding.
//!
//! This module provides configuration parsing from TOML files, environment
//! variable overrides, and validation of configuration values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::env::EnvironmentView;
use crate::error::{LaunchError, Result};

// Top-level launch configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    pub storage: StorageConfig,
    pub download: DownloadConfig,
    pub compute: ComputeConfig,
    pub rendezvous: RendezvousConfig,
    pub console: ConsoleConfig,
}

// Where cached artifacts live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory for downloads. Defaults to `$HOME/.cache/dtr`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,
    /// Datasets directory. Defaults to `<base_dir>/datasets`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datasets_dir: Option<PathBuf>,
    // Suffix appended to a download target to form its lock path.
    pub lock_suffix: String,
}

/// Download behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    // Whether to write to a temp file then rename onto the destination.
    pub atomic_writes: bool,
    /// Connection timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Whole-request timeout in milliseconds. 0 disables the timeout.
    pub request_timeout_ms: u64,
    pub user_agent: String,
}

/// Requested device selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSelection {
    /// Pick the best device present on the host.
    #[default]
    Auto,
    Cuda,
    Mps,
    Cpu,
}

impl DeviceSelection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Cuda => "cuda",
            Self::Mps => "mps",
            Self::Cpu => "cpu",
        }
    }
}

impl FromStr for DeviceSelection {
    type Err = LaunchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cuda" => Ok(Self::Cuda),
            "mps" => Ok(Self::Mps),
            "cpu" => Ok(Self::Cpu),
            other => Err(LaunchError::invalid_argument(format!(
                "unknown device '{other}'. Expected 'auto', 'cuda', 'mps', or 'cpu'"
            ))),
        }
    }
}

/// Float32 matmul precision hint, as understood by accelerator kernels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatmulPrecision {
    /// Full fp32.
    Highest,
    /// TF32 tensor cores.
    #[default]
    High,
    /// bf16-based.
    Medium,
}

// Compute initialization options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    // Seed applied to the process RNG (and accelerator RNG) on init.
    pub seed: u64,
    pub device: DeviceSelection,
    pub matmul_precision: MatmulPrecision,
}

// File-store rendezvous options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendezvousConfig {
    /// Shared directory. Defaults to `<base_dir>/rendezvous`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    /// Namespace inside the directory, one per run.
    pub run_id: String,
    /// Poll interval in milliseconds while waiting at a station.
    pub poll_interval_ms: u64,
}

/// Explicit escape sequences for the five console roles plus reset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset: Option<String>,
}

impl ColorOverrides {
    pub fn is_empty(&self) -> bool {
        [
            &self.tag,
            &self.info,
            &self.success,
            &self.warn,
            &self.error,
            &self.reset,
        ]
        .iter()
        .all(|c| c.is_none())
    }
}

/// Console output options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Disable color entirely (`NO_COLOR`).
    pub no_color: bool,
    pub colors: ColorOverrides,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            datasets_dir: None,
            lock_suffix: ".lock".to_string(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            atomic_writes: true,
            connect_timeout_ms: 10_000,
            request_timeout_ms: 0,
            user_agent: concat!("dtr-launch/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            device: DeviceSelection::Auto,
            matmul_precision: MatmulPrecision::High,
        }
    }
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self {
            dir: None,
            run_id: "default".to_string(),
            poll_interval_ms: 10,
        }
    }
}

impl FromStr for LaunchConfig {
    type Err = LaunchError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| LaunchError::config_with_source("failed to parse TOML config", e))
    }
}

impl LaunchConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            LaunchError::storage_with_source(path, "failed to read config file", e)
        })?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the current process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(&EnvironmentView::from_process())
    }

    // Apply environment variable overrides from an explicit snapshot.
    //
    // Most variables are prefixed with `DTR_`:
    // - `DTR_BASE_DIR` overrides `storage.base_dir`
    // - `DTR_DATASETS_DIR` overrides `storage.datasets_dir`
    // - `DTR_DOWNLOAD_ATOMIC_WRITES` overrides `download.atomic_writes`
    // - `DTR_COMPUTE_SEED` overrides `compute.seed`
    // - `DTR_RENDEZVOUS_DIR` overrides `rendezvous.dir`
    // - `DTR_COLOR_INFO` overrides `console.colors.info`
    //
    // `NO_COLOR` (any non-empty value) sets `console.no_color`, and
    // `TORCHELASTIC_RUN_ID` is used as the run id when `DTR_RUN_ID` is unset.
    // Values that fail to parse are ignored.
    #[must_use]
    pub fn with_overrides_from(mut self, env: &EnvironmentView) -> Self {
        // Storage overrides
        if let Some(val) = env.get_non_empty("DTR_BASE_DIR") {
            self.storage.base_dir = Some(PathBuf::from(val));
        }
        if let Some(val) = env.get_non_empty("DTR_DATASETS_DIR") {
            self.storage.datasets_dir = Some(PathBuf::from(val));
        }

        // Download overrides
        if let Some(val) = env.get("DTR_DOWNLOAD_ATOMIC_WRITES") {
            if let Ok(v) = val.parse() {
                self.download.atomic_writes = v;
            }
        }
        if let Some(val) = env.get("DTR_DOWNLOAD_CONNECT_TIMEOUT_MS") {
            if let Ok(v) = val.parse() {
                self.download.connect_timeout_ms = v;
            }
        }
        if let Some(val) = env.get("DTR_DOWNLOAD_REQUEST_TIMEOUT_MS") {
            if let Ok(v) = val.parse() {
                self.download.request_timeout_ms = v;
            }
        }

        // Compute overrides
        if let Some(val) = env.get("DTR_COMPUTE_SEED") {
            if let Ok(v) = val.parse() {
                self.compute.seed = v;
            }
        }
        if let Some(val) = env.get("DTR_COMPUTE_DEVICE") {
            if let Ok(v) = val.parse() {
                self.compute.device = v;
            }
        }

        // Rendezvous overrides
        if let Some(val) = env.get_non_empty("DTR_RENDEZVOUS_DIR") {
            self.rendezvous.dir = Some(PathBuf::from(val));
        }
        if let Some(val) = env
            .get_non_empty("DTR_RUN_ID")
            .or_else(|| env.get_non_empty("TORCHELASTIC_RUN_ID"))
        {
            self.rendezvous.run_id = val.to_string();
        }

        // Console overrides
        if env.get_non_empty("NO_COLOR").is_some() {
            self.console.no_color = true;
        }
        let colors = &mut self.console.colors;
        for (key, slot) in [
            ("DTR_COLOR_TAG", &mut colors.tag),
            ("DTR_COLOR_INFO", &mut colors.info),
            ("DTR_COLOR_SUCCESS", &mut colors.success),
            ("DTR_COLOR_WARN", &mut colors.warn),
            ("DTR_COLOR_ERROR", &mut colors.error),
            ("DTR_COLOR_RESET", &mut colors.reset),
        ] {
            if let Some(val) = env.get_non_empty(key) {
                *slot = Some(val.to_string());
            }
        }

        self
    }

    // Validate all configuration values.
    //
    // # Errors
    //
    // Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        // Storage validation
        if !self.storage.lock_suffix.starts_with('.') || self.storage.lock_suffix.len() < 2 {
            return Err(LaunchError::config(
                "storage.lock_suffix must start with '.' and name an extension",
            ));
        }

        // Download validation
        if self.download.connect_timeout_ms == 0 {
            return Err(LaunchError::config(
                "download.connect_timeout_ms must be greater than 0",
            ));
        }

        // Rendezvous validation
        if self.rendezvous.run_id.trim().is_empty() {
            return Err(LaunchError::config("rendezvous.run_id must not be empty"));
        }
        if self.rendezvous.run_id.contains(['/', '\\']) || self.rendezvous.run_id == ".." {
            return Err(LaunchError::config(
                "rendezvous.run_id must not contain path separators",
            ));
        }
        if self.rendezvous.poll_interval_ms == 0 {
            return Err(LaunchError::config(
                "rendezvous.poll_interval_ms must be greater than 0",
            ));
        }

        Ok(())
    }
}
