// rust/launch-core/src/compute/environment.rs

//! Per-process compute initialization and teardown.

use std::fmt;
use std::sync::Arc;

use crate::config::ComputeConfig;
use crate::console::Console;
use crate::env::EnvironmentView;
use crate::error::{LaunchError, Result};
use crate::topology::{self, Topology};

use super::device::{Device, DeviceBackend, DeviceKind};
use super::group::ProcessGroup;

const TAG: &str = "compute";

/// Whether a handle owns a live collective group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommState {
    /// No group was created.
    Standalone,
    /// A group was created and has not been torn down yet.
    Active,
    /// The group was torn down by [`ComputeEnvironment::cleanup`].
    Released,
}

/// Result of [`ComputeEnvironment::initialize`].
#[derive(Debug)]
pub struct ComputeHandle {
    device: Device,
    topology: Topology,
    comm: CommState,
}

impl ComputeHandle {
    pub fn device(&self) -> Device {
        self.device
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn comm(&self) -> CommState {
        self.comm
    }

    pub fn is_distributed(&self) -> bool {
        self.topology.distributed
    }
}

/// Selects the device, seeds RNGs and joins the collective group.
pub struct ComputeEnvironment {
    devices: Arc<dyn DeviceBackend>,
    group: Arc<dyn ProcessGroup>,
    console: Arc<Console>,
    env: EnvironmentView,
    config: ComputeConfig,
}

impl ComputeEnvironment {
    pub fn new(
        devices: Arc<dyn DeviceBackend>,
        group: Arc<dyn ProcessGroup>,
        console: Arc<Console>,
        env: EnvironmentView,
        config: ComputeConfig,
    ) -> Self {
        Self {
            devices,
            group,
            console,
            env,
            config,
        }
    }

    pub fn config(&self) -> &ComputeConfig {
        &self.config
    }

    pub fn devices(&self) -> &Arc<dyn DeviceBackend> {
        &self.devices
    }

    /// Initializes compute for the device kind named by `requested`.
    ///
    /// # Errors
    ///
    /// Returns an invalid-argument error if `requested` is not `cuda`, `mps`
    /// or `cpu`, and otherwise the errors of [`Self::initialize_kind`].
    pub fn initialize(&self, requested: &str) -> Result<ComputeHandle> {
        let kind: DeviceKind = requested.parse()?;
        self.initialize_kind(kind)
    }

    /// Initializes compute on `kind`.
    ///
    /// On CUDA with a distributed topology this binds the process to
    /// `cuda:<local_rank>` and blocks until every rank has joined the group.
    ///
    /// # Errors
    ///
    /// - unavailable-device if `kind` is an accelerator the host lacks;
    ///   nothing is seeded or printed in that case
    /// - config if the distributed environment is partial or malformed
    /// - collective if the group rendezvous fails
    pub fn initialize_kind(&self, kind: DeviceKind) -> Result<ComputeHandle> {
        if kind.is_accelerator() && !self.devices.is_available(kind) {
            return Err(LaunchError::unavailable_device(kind.as_str()));
        }

        self.devices.manual_seed(self.config.seed);
        if kind == DeviceKind::Cuda {
            self.devices.manual_seed_accelerator(self.config.seed);
            self.devices.set_matmul_precision(self.config.matmul_precision);
        }

        let topology = topology::resolve(&self.env)?;

        let (device, comm) = if topology.distributed && kind == DeviceKind::Cuda {
            let device = Device::new(kind, topology.local_rank);
            self.devices.set_device(topology.local_rank)?;
            self.group.init(&topology, &device)?;
            self.group.barrier()?;
            tracing::debug!(
                group = self.group.name(),
                rank = topology.rank,
                %device,
                "collective group initialized"
            );
            (device, CommState::Active)
        } else {
            (Device::new(kind, 0), CommState::Standalone)
        };

        if topology.is_main() {
            self.console.info(
                TAG,
                &format!("Distributed world size: {}", topology.world_size),
            );
        }

        Ok(ComputeHandle {
            device,
            topology,
            comm,
        })
    }

    /// Tears down the collective group if `handle` owns one.
    ///
    /// Safe to call more than once; only the first call on an active handle
    /// does anything.
    ///
    /// # Errors
    ///
    /// Returns a collective error if the group teardown fails; the handle
    /// stays active in that case.
    pub fn cleanup(&self, handle: &mut ComputeHandle) -> Result<()> {
        match handle.comm {
            CommState::Active => {
                self.group.destroy()?;
                handle.comm = CommState::Released;
                tracing::debug!(group = self.group.name(), "collective group destroyed");
                Ok(())
            }
            CommState::Standalone | CommState::Released => Ok(()),
        }
    }
}

impl fmt::Debug for ComputeEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeEnvironment")
            .field("group", &self.group.name())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::group::LocalGroup;
    use crate::config::MatmulPrecision;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::thread;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Seed(u64),
        AcceleratorSeed(u64),
        Precision(MatmulPrecision),
        SetDevice(usize),
    }

    #[derive(Default)]
    struct RecordingDevices {
        cuda: usize,
        calls: Mutex<Vec<Call>>,
    }

    impl RecordingDevices {
        fn with_cuda(cuda: usize) -> Arc<Self> {
            Arc::new(Self {
                cuda,
                ..Default::default()
            })
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl DeviceBackend for RecordingDevices {
        fn device_count(&self, kind: DeviceKind) -> usize {
            match kind {
                DeviceKind::Cuda => self.cuda,
                DeviceKind::Mps => 0,
                DeviceKind::Cpu => 1,
            }
        }
        fn manual_seed(&self, seed: u64) {
            self.record(Call::Seed(seed));
        }
        fn manual_seed_accelerator(&self, seed: u64) {
            self.record(Call::AcceleratorSeed(seed));
        }
        fn set_matmul_precision(&self, precision: MatmulPrecision) {
            self.record(Call::Precision(precision));
        }
        fn set_device(&self, index: usize) -> Result<()> {
            self.record(Call::SetDevice(index));
            Ok(())
        }
    }

    /// Counts lifecycle calls without synchronizing anything.
    #[derive(Default)]
    struct CountingGroup {
        inits: AtomicUsize,
        barriers: AtomicUsize,
        destroys: AtomicUsize,
    }

    impl ProcessGroup for CountingGroup {
        fn name(&self) -> &'static str {
            "counting"
        }
        fn init(&self, _topology: &Topology, _device: &Device) -> Result<()> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn barrier(&self) -> Result<()> {
            self.barriers.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn destroy(&self) -> Result<()> {
            self.destroys.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn distributed_env(rank: usize, local_rank: usize, world_size: usize) -> EnvironmentView {
        EnvironmentView::from_pairs([
            ("RANK", rank.to_string()),
            ("LOCAL_RANK", local_rank.to_string()),
            ("WORLD_SIZE", world_size.to_string()),
        ])
    }

    fn environment(
        devices: Arc<RecordingDevices>,
        group: Arc<dyn ProcessGroup>,
        console: Console,
        env: EnvironmentView,
    ) -> ComputeEnvironment {
        ComputeEnvironment::new(
            devices,
            group,
            Arc::new(console),
            env,
            ComputeConfig::default(),
        )
    }

    #[test]
    fn test_standalone_cpu() {
        let devices = RecordingDevices::with_cuda(0);
        let group = Arc::new(CountingGroup::default());
        let (console, out, _) = Console::captured();
        let compute = environment(
            devices.clone(),
            group.clone(),
            console,
            EnvironmentView::default(),
        );

        let handle = compute.initialize("cpu").unwrap();

        assert_eq!(handle.device(), Device::new(DeviceKind::Cpu, 0));
        assert_eq!(handle.topology(), Topology::standalone());
        assert_eq!(handle.comm(), CommState::Standalone);
        assert_eq!(devices.calls(), vec![Call::Seed(42)]);
        assert_eq!(group.inits.load(Ordering::SeqCst), 0);
        assert!(out.contents().contains("[compute] Distributed world size: 1"));
    }

    #[test]
    fn test_unsupported_device_kind() {
        let devices = RecordingDevices::with_cuda(1);
        let (console, out, _) = Console::captured();
        let compute = environment(
            devices.clone(),
            Arc::new(CountingGroup::default()),
            console,
            EnvironmentView::default(),
        );

        let err = compute.initialize("tpu").unwrap_err();
        assert!(matches!(err, LaunchError::InvalidArgument { .. }));
        assert!(devices.calls().is_empty());
        assert!(out.contents().is_empty());
    }

    #[test]
    fn test_unavailable_cuda_touches_nothing() {
        let devices = RecordingDevices::with_cuda(0);
        let (console, out, _) = Console::captured();
        let compute = environment(
            devices.clone(),
            Arc::new(CountingGroup::default()),
            console,
            distributed_env(0, 0, 2),
        );

        let err = compute.initialize("cuda").unwrap_err();
        assert!(matches!(err, LaunchError::UnavailableDevice { .. }));
        assert!(devices.calls().is_empty());
        assert!(out.contents().is_empty());

        let err = compute.initialize("mps").unwrap_err();
        assert!(matches!(err, LaunchError::UnavailableDevice { .. }));
    }

    #[test]
    fn test_standalone_cuda_seeds_and_sets_precision() {
        let devices = RecordingDevices::with_cuda(1);
        let group = Arc::new(CountingGroup::default());
        let (console, _, _) = Console::captured();
        let compute = environment(
            devices.clone(),
            group.clone(),
            console,
            EnvironmentView::default(),
        );

        let handle = compute.initialize("cuda").unwrap();

        assert_eq!(handle.device(), Device::new(DeviceKind::Cuda, 0));
        assert_eq!(handle.comm(), CommState::Standalone);
        assert_eq!(
            devices.calls(),
            vec![
                Call::Seed(42),
                Call::AcceleratorSeed(42),
                Call::Precision(MatmulPrecision::High),
            ]
        );
        assert_eq!(group.inits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_partial_distributed_env_fails() {
        let devices = RecordingDevices::with_cuda(1);
        let (console, _, _) = Console::captured();
        let compute = environment(
            devices,
            Arc::new(CountingGroup::default()),
            console,
            EnvironmentView::from_pairs([("RANK", "0")]),
        );

        let err = compute.initialize("cpu").unwrap_err();
        assert!(matches!(err, LaunchError::Config { .. }));
    }

    #[test]
    fn test_distributed_cpu_creates_no_group() {
        let devices = RecordingDevices::with_cuda(0);
        let group = Arc::new(CountingGroup::default());
        let (console, _, _) = Console::captured();
        let compute = environment(
            devices,
            group.clone(),
            console,
            distributed_env(1, 1, 2),
        );

        let mut handle = compute.initialize("cpu").unwrap();
        assert!(handle.is_distributed());
        assert_eq!(handle.comm(), CommState::Standalone);

        compute.cleanup(&mut handle).unwrap();
        assert_eq!(group.inits.load(Ordering::SeqCst), 0);
        assert_eq!(group.destroys.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_distributed_cuda_binds_local_rank() {
        let devices = RecordingDevices::with_cuda(4);
        let group = Arc::new(CountingGroup::default());
        let (console, out, _) = Console::captured();
        let compute = environment(
            devices.clone(),
            group.clone(),
            console.for_rank(5),
            distributed_env(5, 1, 8),
        );

        let mut handle = compute.initialize("cuda").unwrap();

        assert_eq!(handle.device(), Device::new(DeviceKind::Cuda, 1));
        assert_eq!(handle.comm(), CommState::Active);
        assert!(devices.calls().contains(&Call::SetDevice(1)));
        assert_eq!(group.inits.load(Ordering::SeqCst), 1);
        assert_eq!(group.barriers.load(Ordering::SeqCst), 1);
        assert!(out.contents().is_empty());

        compute.cleanup(&mut handle).unwrap();
        assert_eq!(handle.comm(), CommState::Released);
        compute.cleanup(&mut handle).unwrap();
        assert_eq!(group.destroys.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_only_rank_zero_reports_world_size() {
        const WORLD: usize = 4;

        let outputs: Vec<_> = LocalGroup::new_group(WORLD)
            .into_iter()
            .enumerate()
            .map(|(rank, group)| {
                thread::spawn(move || {
                    let (console, out, _) = Console::captured();
                    let compute = ComputeEnvironment::new(
                        RecordingDevices::with_cuda(WORLD),
                        Arc::new(group),
                        Arc::new(console),
                        distributed_env(rank, rank, WORLD),
                        ComputeConfig::default(),
                    );
                    let mut handle = compute.initialize("cuda").unwrap();
                    assert_eq!(handle.comm(), CommState::Active);
                    compute.cleanup(&mut handle).unwrap();
                    out.contents()
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect();

        let reporting: Vec<usize> = outputs
            .iter()
            .enumerate()
            .filter(|(_, out)| out.contains("Distributed world size: 4"))
            .map(|(rank, _)| rank)
            .collect();
        assert_eq!(reporting, vec![0]);
    }
}
