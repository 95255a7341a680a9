// rust/launch-core/src/topology.rs

//! Distributed topology resolution.
//!
//! A process is part of a distributed run when the launcher has exported
//! `RANK`. In that case `LOCAL_RANK` and `WORLD_SIZE` must be present too;
//! a partially configured environment is rejected rather than defaulted.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::env::EnvironmentView;
use crate::error::{LaunchError, Result};

pub const RANK_VAR: &str = "RANK";
pub const LOCAL_RANK_VAR: &str = "LOCAL_RANK";
pub const WORLD_SIZE_VAR: &str = "WORLD_SIZE";

/// Where this process sits in the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub distributed: bool,
    pub rank: usize,
    pub local_rank: usize,
    pub world_size: usize,
}

impl Topology {
    /// Topology of a process running on its own.
    pub const fn standalone() -> Self {
        Self {
            distributed: false,
            rank: 0,
            local_rank: 0,
            world_size: 1,
        }
    }

    /// Builds a distributed topology, checking rank bounds.
    pub fn distributed(rank: usize, local_rank: usize, world_size: usize) -> Result<Self> {
        if world_size == 0 {
            return Err(LaunchError::config(format!(
                "{WORLD_SIZE_VAR} must be greater than 0"
            )));
        }
        if rank >= world_size {
            return Err(LaunchError::config(format!(
                "{RANK_VAR}={rank} is out of range for {WORLD_SIZE_VAR}={world_size}"
            )));
        }
        if local_rank >= world_size {
            return Err(LaunchError::config(format!(
                "{LOCAL_RANK_VAR}={local_rank} is out of range for {WORLD_SIZE_VAR}={world_size}"
            )));
        }
        Ok(Self {
            distributed: true,
            rank,
            local_rank,
            world_size,
        })
    }

    /// True for the process that owns user-facing output.
    pub fn is_main(&self) -> bool {
        self.rank == 0
    }
}

impl Default for Topology {
    fn default() -> Self {
        Self::standalone()
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.distributed {
            write!(
                f,
                "rank {}/{} (local rank {})",
                self.rank, self.world_size, self.local_rank
            )
        } else {
            write!(f, "standalone")
        }
    }
}

/// Resolves the topology from an environment snapshot.
///
/// # Errors
///
/// Returns a configuration error if `RANK` is set but `LOCAL_RANK` or
/// `WORLD_SIZE` is missing, if any value is not an unsigned integer, or if
/// the ranks are out of range for the world size.
pub fn resolve(env: &EnvironmentView) -> Result<Topology> {
    if !env.contains(RANK_VAR) {
        return Ok(Topology::standalone());
    }

    let missing: Vec<&str> = [RANK_VAR, LOCAL_RANK_VAR, WORLD_SIZE_VAR]
        .into_iter()
        .filter(|key| !env.contains(key))
        .collect();
    if !missing.is_empty() {
        return Err(LaunchError::config(format!(
            "distributed run detected ({RANK_VAR} is set) but {} missing",
            missing.join(", ")
        )));
    }

    let rank = parse_var(env, RANK_VAR)?;
    let local_rank = parse_var(env, LOCAL_RANK_VAR)?;
    let world_size = parse_var(env, WORLD_SIZE_VAR)?;

    Topology::distributed(rank, local_rank, world_size)
}

fn parse_var(env: &EnvironmentView, key: &str) -> Result<usize> {
    let raw = env.get(key).unwrap_or_default();
    raw.trim().parse().map_err(|e| {
        LaunchError::config_with_source(format!("{key}='{raw}' is not a valid rank value"), e)
    })
}
