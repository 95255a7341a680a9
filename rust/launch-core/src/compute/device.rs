// rust/launch-core/src/compute/device.rs

//! Device kinds and the device capability seam.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::MatmulPrecision;
use crate::console::Console;
use crate::error::{LaunchError, Result};

/// The kinds of compute device a process can run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// NVIDIA GPUs. The only kind that takes part in collective groups.
    Cuda,
    /// Apple-silicon GPU.
    Mps,
    Cpu,
}

impl DeviceKind {
    pub const ALL: [DeviceKind; 3] = [DeviceKind::Cuda, DeviceKind::Mps, DeviceKind::Cpu];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cuda => "cuda",
            Self::Mps => "mps",
            Self::Cpu => "cpu",
        }
    }

    pub fn is_accelerator(&self) -> bool {
        !matches!(self, Self::Cpu)
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = LaunchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "cuda" => Ok(Self::Cuda),
            "mps" => Ok(Self::Mps),
            "cpu" => Ok(Self::Cpu),
            _ => Err(LaunchError::invalid_argument(format!(
                "unsupported device type '{s}'. Expected 'cuda', 'mps', or 'cpu'"
            ))),
        }
    }
}

/// A concrete device: a kind plus an ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub kind: DeviceKind,
    pub index: usize,
}

impl Device {
    pub fn new(kind: DeviceKind, index: usize) -> Self {
        Self { kind, index }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DeviceKind::Cuda => write!(f, "cuda:{}", self.index),
            kind => write!(f, "{kind}"),
        }
    }
}

/// What the host (or the tensor library on top of it) can do.
///
/// Seeding and precision are process-wide settings; implementations record
/// them wherever the model layer will read them.
pub trait DeviceBackend: Send + Sync {
    /// Whether at least one device of `kind` is usable.
    fn is_available(&self, kind: DeviceKind) -> bool {
        self.device_count(kind) > 0
    }

    /// Number of usable devices of `kind`.
    fn device_count(&self, kind: DeviceKind) -> usize;

    /// Seeds the process-global RNG.
    fn manual_seed(&self, seed: u64);

    /// Seeds the accelerator RNG on every visible device.
    fn manual_seed_accelerator(&self, seed: u64);

    /// Sets the float32 matmul precision hint.
    fn set_matmul_precision(&self, precision: MatmulPrecision);

    /// Makes `index` the default CUDA device for this process.
    ///
    /// # Errors
    ///
    /// Returns an unavailable-device error if `index` is not visible.
    fn set_device(&self, index: usize) -> Result<()>;
}

/// Picks the best available device kind: CUDA, then MPS, then CPU.
///
/// The choice is reported on the console.
pub fn autodetect_device(backend: &dyn DeviceBackend, console: &Console) -> DeviceKind {
    let kind = if backend.is_available(DeviceKind::Cuda) {
        DeviceKind::Cuda
    } else if backend.is_available(DeviceKind::Mps) {
        DeviceKind::Mps
    } else {
        DeviceKind::Cpu
    };
    console.info("compute", &format!("Autodetected device type: {kind}"));
    kind
}
