// rust/launch-core/src/compute/group.rs

//! Collective-communication group lifecycle.
//!
//! Only the lifecycle lives here: forming the group (a rendezvous of all
//! `world_size` processes), synchronizing on a barrier, and tearing it down.
//! Data collectives are the tensor library's business.

use std::sync::{Arc, Barrier, Mutex};

use crate::error::{LaunchError, Result};
use crate::topology::Topology;

use super::device::Device;

/// A collective group this process can join once.
pub trait ProcessGroup: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Joins the group. Blocks until every rank of `topology` has joined.
    ///
    /// # Errors
    ///
    /// Returns a collective error if the group is already initialized, the
    /// topology does not match the group, or the rendezvous fails.
    fn init(&self, topology: &Topology, device: &Device) -> Result<()>;

    /// Blocks until every rank has reached the barrier.
    ///
    /// # Errors
    ///
    /// Returns a collective error if the group is not initialized.
    fn barrier(&self) -> Result<()>;

    /// Leaves the group. Destroying a group twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a collective error if the group was never initialized or the
    /// teardown fails.
    fn destroy(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupState {
    Uninitialized,
    Active,
    Destroyed,
}

/// In-process group for ranks that are threads of one process.
///
/// Useful for simulating a run in tests or on a single host without a
/// network transport.
pub struct LocalGroup {
    rank: usize,
    world_size: usize,
    barrier: Arc<Barrier>,
    state: Mutex<GroupState>,
}

impl LocalGroup {
    /// Creates one handle per rank, all sharing the same barrier.
    pub fn new_group(world_size: usize) -> Vec<Self> {
        let barrier = Arc::new(Barrier::new(world_size));
        (0..world_size)
            .map(|rank| Self {
                rank,
                world_size,
                barrier: barrier.clone(),
                state: Mutex::new(GroupState::Uninitialized),
            })
            .collect()
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    fn state(&self) -> GroupState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_state(&self, state: GroupState) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = state;
    }
}

impl ProcessGroup for LocalGroup {
    fn name(&self) -> &'static str {
        "local"
    }

    fn init(&self, topology: &Topology, _device: &Device) -> Result<()> {
        if self.state() != GroupState::Uninitialized {
            return Err(LaunchError::collective("process group already initialized"));
        }
        if topology.rank != self.rank || topology.world_size != self.world_size {
            return Err(LaunchError::collective(format!(
                "topology rank {}/{} does not match group handle {}/{}",
                topology.rank, topology.world_size, self.rank, self.world_size
            )));
        }

        self.barrier.wait();
        self.set_state(GroupState::Active);
        Ok(())
    }

    fn barrier(&self) -> Result<()> {
        if self.state() != GroupState::Active {
            return Err(LaunchError::collective("process group is not initialized"));
        }
        self.barrier.wait();
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        match self.state() {
            GroupState::Uninitialized => {
                Err(LaunchError::collective("process group is not initialized"))
            }
            GroupState::Active => {
                self.set_state(GroupState::Destroyed);
                Ok(())
            }
            GroupState::Destroyed => Ok(()),
        }
    }
}
