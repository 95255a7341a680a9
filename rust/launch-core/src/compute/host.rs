// rust/launch-core/src/compute/host.rs

//! Host device detection and process-wide compute settings.
//!
//! The model layer reads the seeded RNG, the matmul precision and the
//! current CUDA ordinal from here; [`HostDevices`] writes them during
//! compute initialization.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::config::MatmulPrecision;
use crate::env::EnvironmentView;
use crate::error::{LaunchError, Result};

use super::device::{DeviceBackend, DeviceKind};

static HOST_RNG: Mutex<Option<StdRng>> = Mutex::new(None);
static ACCELERATOR_SEED: Mutex<Option<u64>> = Mutex::new(None);
static MATMUL_PRECISION: AtomicU8 = AtomicU8::new(0);
static CURRENT_DEVICE: AtomicUsize = AtomicUsize::new(0);

/// Reseeds the process-global RNG.
pub fn manual_seed(seed: u64) {
    let mut rng = HOST_RNG.lock().unwrap_or_else(|p| p.into_inner());
    *rng = Some(StdRng::seed_from_u64(seed));
}

/// Draws from the process-global RNG, seeding it from entropy if nothing
/// has seeded it yet.
pub fn next_u64() -> u64 {
    let mut rng = HOST_RNG.lock().unwrap_or_else(|p| p.into_inner());
    rng.get_or_insert_with(|| StdRng::seed_from_u64(rand::random()))
        .next_u64()
}

/// Seed most recently applied to accelerator RNGs.
pub fn accelerator_seed() -> Option<u64> {
    *ACCELERATOR_SEED.lock().unwrap_or_else(|p| p.into_inner())
}

fn set_accelerator_seed(seed: u64) {
    *ACCELERATOR_SEED.lock().unwrap_or_else(|p| p.into_inner()) = Some(seed);
}

/// Current float32 matmul precision hint.
pub fn float32_matmul_precision() -> MatmulPrecision {
    match MATMUL_PRECISION.load(Ordering::SeqCst) {
        1 => MatmulPrecision::High,
        2 => MatmulPrecision::Medium,
        _ => MatmulPrecision::Highest,
    }
}

fn set_float32_matmul_precision(precision: MatmulPrecision) {
    let value = match precision {
        MatmulPrecision::Highest => 0,
        MatmulPrecision::High => 1,
        MatmulPrecision::Medium => 2,
    };
    MATMUL_PRECISION.store(value, Ordering::SeqCst);
}

/// CUDA ordinal that device-less allocations go to.
pub fn current_device() -> usize {
    CURRENT_DEVICE.load(Ordering::SeqCst)
}

/// Detects devices from the operating system.
///
/// CUDA devices are the `/dev/nvidia<N>` nodes, narrowed by
/// `CUDA_VISIBLE_DEVICES`. MPS is assumed on Apple-silicon macOS builds.
#[derive(Debug, Clone)]
pub struct HostDevices {
    env: EnvironmentView,
    dev_dir: PathBuf,
}

impl HostDevices {
    pub fn new(env: EnvironmentView) -> Self {
        Self {
            env,
            dev_dir: PathBuf::from("/dev"),
        }
    }

    /// Looks for device nodes under `dev_dir` instead of `/dev`.
    #[must_use]
    pub fn with_dev_dir(mut self, dev_dir: impl Into<PathBuf>) -> Self {
        self.dev_dir = dev_dir.into();
        self
    }

    fn physical_cuda_devices(&self) -> usize {
        let Ok(entries) = fs::read_dir(&self.dev_dir) else {
            return 0;
        };
        entries
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_str()
                    .and_then(|name| name.strip_prefix("nvidia"))
                    .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
            })
            .count()
    }

    fn visible_cuda_devices(&self) -> usize {
        let physical = self.physical_cuda_devices();
        let Some(visible) = self.env.get("CUDA_VISIBLE_DEVICES") else {
            return physical;
        };

        // The driver stops at the first invalid entry.
        let mut count = 0;
        for entry in visible.split(',').map(str::trim) {
            if entry.is_empty() {
                break;
            }
            match entry.parse::<i64>() {
                Ok(ordinal) if ordinal >= 0 && (ordinal as usize) < physical => count += 1,
                Ok(_) => break,
                // UUID / MIG identifiers.
                Err(_) if entry.starts_with("GPU-") || entry.starts_with("MIG-") => count += 1,
                Err(_) => break,
            }
        }
        count.min(physical)
    }
}

impl DeviceBackend for HostDevices {
    fn device_count(&self, kind: DeviceKind) -> usize {
        match kind {
            DeviceKind::Cuda => self.visible_cuda_devices(),
            DeviceKind::Mps => usize::from(cfg!(all(target_os = "macos", target_arch = "aarch64"))),
            DeviceKind::Cpu => 1,
        }
    }

    fn manual_seed(&self, seed: u64) {
        manual_seed(seed);
    }

    fn manual_seed_accelerator(&self, seed: u64) {
        set_accelerator_seed(seed);
    }

    fn set_matmul_precision(&self, precision: MatmulPrecision) {
        set_float32_matmul_precision(precision);
    }

    fn set_device(&self, index: usize) -> Result<()> {
        let available = self.device_count(DeviceKind::Cuda);
        if index >= available {
            return Err(LaunchError::unavailable_device(format!(
                "cuda:{index} ({available} visible)"
            )));
        }
        CURRENT_DEVICE.store(index, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // Process-wide settings are shared by every test thread.
    static GLOBALS: Mutex<()> = Mutex::new(());

    fn fake_dev(nodes: &[&str]) -> TempDir {
        let temp = TempDir::new().unwrap();
        for node in nodes {
            fs::write(temp.path().join(node), b"").unwrap();
        }
        temp
    }

    fn host(dev: &TempDir, env: &[(&str, &str)]) -> HostDevices {
        HostDevices::new(EnvironmentView::from_pairs(env.iter().copied())).with_dev_dir(dev.path())
    }

    #[test]
    fn test_counts_nvidia_nodes() {
        let dev = fake_dev(&["nvidia0", "nvidia1", "nvidiactl", "nvidia-uvm", "null"]);
        let host = host(&dev, &[]);

        assert_eq!(host.device_count(DeviceKind::Cuda), 2);
        assert!(host.is_available(DeviceKind::Cuda));
        assert!(host.is_available(DeviceKind::Cpu));
    }

    #[test]
    fn test_no_nodes_means_no_cuda() {
        let dev = fake_dev(&["null", "nvidiactl"]);
        let host = host(&dev, &[]);
        assert!(!host.is_available(DeviceKind::Cuda));
    }

    #[test]
    fn test_cuda_visible_devices_narrows() {
        let dev = fake_dev(&["nvidia0", "nvidia1", "nvidia2", "nvidia3"]);

        assert_eq!(host(&dev, &[("CUDA_VISIBLE_DEVICES", "1,3")]).device_count(DeviceKind::Cuda), 2);
        assert_eq!(host(&dev, &[("CUDA_VISIBLE_DEVICES", "")]).device_count(DeviceKind::Cuda), 0);
        assert_eq!(host(&dev, &[("CUDA_VISIBLE_DEVICES", "-1")]).device_count(DeviceKind::Cuda), 0);
        assert_eq!(host(&dev, &[("CUDA_VISIBLE_DEVICES", "0,9,1")]).device_count(DeviceKind::Cuda), 1);
        assert_eq!(
            host(&dev, &[("CUDA_VISIBLE_DEVICES", "GPU-8f1c,GPU-22aa")]).device_count(DeviceKind::Cuda),
            2
        );
    }

    #[test]
    fn test_set_device_bounds() {
        let _g = GLOBALS.lock().unwrap_or_else(|p| p.into_inner());
        let dev = fake_dev(&["nvidia0", "nvidia1"]);
        let host = host(&dev, &[]);

        host.set_device(1).unwrap();
        assert_eq!(current_device(), 1);

        let err = host.set_device(2).unwrap_err();
        assert!(matches!(err, LaunchError::UnavailableDevice { .. }));
        assert_eq!(current_device(), 1);

        host.set_device(0).unwrap();
    }

    #[test]
    fn test_manual_seed_is_reproducible() {
        let _g = GLOBALS.lock().unwrap_or_else(|p| p.into_inner());
        let host = HostDevices::new(EnvironmentView::default());

        host.manual_seed(42);
        let first: Vec<u64> = (0..4).map(|_| next_u64()).collect();
        host.manual_seed(42);
        let second: Vec<u64> = (0..4).map(|_| next_u64()).collect();
        host.manual_seed(43);
        let third: Vec<u64> = (0..4).map(|_| next_u64()).collect();

        assert_eq!(first, second);
        assert_ne!(first, third);
    }

    #[test]
    fn test_accelerator_seed_and_precision() {
        let _g = GLOBALS.lock().unwrap_or_else(|p| p.into_inner());
        let host = HostDevices::new(EnvironmentView::default());

        host.manual_seed_accelerator(7);
        assert_eq!(accelerator_seed(), Some(7));

        host.set_matmul_precision(MatmulPrecision::High);
        assert_eq!(float32_matmul_precision(), MatmulPrecision::High);
        host.set_matmul_precision(MatmulPrecision::Highest);
        assert_eq!(float32_matmul_precision(), MatmulPrecision::Highest);
    }
}
