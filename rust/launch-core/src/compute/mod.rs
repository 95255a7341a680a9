// rust/launch-core/src/compute/mod.rs

//! Compute device selection and collective-group lifecycle.
//!
//! [`ComputeEnvironment`] is the entry point. It talks to the host through
//! [`DeviceBackend`] and to the other ranks through [`ProcessGroup`], so
//! both can be swapped for fakes in tests.

mod device;
mod environment;
mod file_store;
mod group;
mod host;

pub use device::{autodetect_device, Device, DeviceBackend, DeviceKind};
pub use environment::{CommState, ComputeEnvironment, ComputeHandle};
pub use file_store::FileStoreGroup;
pub use group::{LocalGroup, ProcessGroup};
pub use host::{
    accelerator_seed, current_device, float32_matmul_precision, manual_seed, next_u64,
    HostDevices,
};
