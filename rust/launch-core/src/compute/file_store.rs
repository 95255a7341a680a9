// rust/launch-core/src/compute/file_store.rs

//! Process group rendezvous over a shared directory.
//!
//! Every rank of the run points at the same directory (a local path for a
//! single node, a shared filesystem otherwise). Layout:
//!
//! ```text
//! <root>/
//!   member-<rank>        one per joined rank, removed on destroy
//!   init/rank-<rank>     arrival markers for the init rendezvous
//!   init/done            written by the first rank that sees all arrivals
//!   barrier-<n>/...      same, one station per barrier call
//! ```
//!
//! A station is complete once `world_size` arrival markers exist. The
//! `done` marker keeps it complete for slow pollers after faster ranks have
//! moved on. The last member to leave removes the whole directory.
//!
//! There are no timeouts: a rank that never arrives blocks the others. A
//! directory left behind by a crashed run is refused by `init` rather than
//! reused; remove it or pick a fresh `run_id`.

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use chrono::Utc;

use crate::config::RendezvousConfig;
use crate::error::{LaunchError, Result};
use crate::storage::{lock_path_for, FileLock, DEFAULT_LOCK_SUFFIX};
use crate::topology::Topology;

use super::device::Device;
use super::group::ProcessGroup;

const MEMBER_PREFIX: &str = "member-";
const ARRIVAL_PREFIX: &str = "rank-";
const DONE_MARKER: &str = "done";
const INIT_STATION: &str = "init";

#[derive(Debug, Clone, Copy)]
struct Membership {
    rank: usize,
    world_size: usize,
    barriers: u64,
}

/// File-backed [`ProcessGroup`].
#[derive(Debug)]
pub struct FileStoreGroup {
    root: PathBuf,
    poll_interval: Duration,
    lock_suffix: String,
    membership: Mutex<Option<Membership>>,
}

impl FileStoreGroup {
    pub fn new(root: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            root: root.into(),
            poll_interval,
            lock_suffix: DEFAULT_LOCK_SUFFIX.to_string(),
            membership: Mutex::new(None),
        }
    }

    /// Builds the group for a run from configuration.
    ///
    /// The directory is `<rendezvous.dir>/<run_id>`, with `rendezvous.dir`
    /// defaulting to `<base_dir>/rendezvous`. Teardown locks
    /// `<directory><lock_suffix>`.
    pub fn from_config(config: &RendezvousConfig, base_dir: &Path, lock_suffix: &str) -> Self {
        let dir = config
            .dir
            .clone()
            .unwrap_or_else(|| base_dir.join("rendezvous"));
        Self::new(
            dir.join(&config.run_id),
            Duration::from_millis(config.poll_interval_ms),
        )
        .with_lock_suffix(lock_suffix)
    }

    /// Overrides the teardown lock suffix (default `.lock`).
    #[must_use]
    pub fn with_lock_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.lock_suffix = suffix.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lock_path(&self) -> PathBuf {
        lock_path_for(&self.root, &self.lock_suffix)
    }

    /// Fails if `rank` already has state here from an earlier run.
    ///
    /// A live run never shows any of these before this rank registers, since
    /// `init/done` needs this rank's own arrival first.
    fn check_fresh(&self, rank: usize) -> Result<()> {
        let stale = [
            self.member_path(rank),
            self.root.join(INIT_STATION).join(DONE_MARKER),
            self.root
                .join(INIT_STATION)
                .join(format!("{ARRIVAL_PREFIX}{rank}")),
        ];
        match stale.iter().find(|path| path.exists()) {
            Some(path) => Err(LaunchError::collective(format!(
                "stale rendezvous state at {} (remove {} or use a new run id)",
                path.display(),
                self.root.display()
            ))),
            None => Ok(()),
        }
    }

    fn membership(&self) -> std::sync::MutexGuard<'_, Option<Membership>> {
        self.membership.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn member_path(&self, rank: usize) -> PathBuf {
        self.root.join(format!("{MEMBER_PREFIX}{rank}"))
    }

    /// Records arrival at `station` and blocks until all ranks have arrived.
    fn wait_at(&self, station: &str, rank: usize, world_size: usize) -> Result<()> {
        let dir = self.root.join(station);
        fs::create_dir_all(&dir).map_err(|e| {
            LaunchError::collective_with_source(format!("failed to create station '{station}'"), e)
        })?;
        touch(&dir.join(format!("{ARRIVAL_PREFIX}{rank}")))?;

        tracing::debug!(station, rank, world_size, "waiting at rendezvous station");
        let done = dir.join(DONE_MARKER);
        loop {
            if done.exists() {
                break;
            }
            if count_entries(&dir, ARRIVAL_PREFIX)? >= world_size {
                touch(&done)?;
                break;
            }
            thread::sleep(self.poll_interval);
        }
        tracing::debug!(station, rank, "rendezvous station complete");
        Ok(())
    }
}

impl ProcessGroup for FileStoreGroup {
    fn name(&self) -> &'static str {
        "file"
    }

    fn init(&self, topology: &Topology, device: &Device) -> Result<()> {
        if self.membership().is_some() {
            return Err(LaunchError::collective("process group already initialized"));
        }

        self.check_fresh(topology.rank)?;

        fs::create_dir_all(&self.root).map_err(|e| {
            LaunchError::collective_with_source(
                format!("failed to create rendezvous directory {}", self.root.display()),
                e,
            )
        })?;

        let record = format!(
            "pid={}\ndevice={}\njoined_at={}\n",
            std::process::id(),
            device,
            Utc::now().to_rfc3339()
        );
        fs::write(self.member_path(topology.rank), record).map_err(|e| {
            LaunchError::collective_with_source("failed to register group member", e)
        })?;

        self.wait_at(INIT_STATION, topology.rank, topology.world_size)?;

        *self.membership() = Some(Membership {
            rank: topology.rank,
            world_size: topology.world_size,
            barriers: 0,
        });
        tracing::info!(
            root = %self.root.display(),
            rank = topology.rank,
            world_size = topology.world_size,
            "joined file-store process group"
        );
        Ok(())
    }

    fn barrier(&self) -> Result<()> {
        let member = {
            let mut guard = self.membership();
            let member = guard
                .as_mut()
                .ok_or_else(|| LaunchError::collective("process group is not initialized"))?;
            member.barriers += 1;
            *member
        };
        self.wait_at(
            &format!("barrier-{}", member.barriers),
            member.rank,
            member.world_size,
        )
    }

    fn destroy(&self) -> Result<()> {
        let Some(member) = self.membership().take() else {
            return Ok(());
        };

        let lock = FileLock::new(self.lock_path());
        let guard = lock.acquire_with_cleanup()?;

        match fs::remove_file(self.member_path(member.rank)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(LaunchError::collective_with_source(
                    "failed to remove member record",
                    e,
                ))
            }
        }

        if count_entries(&self.root, MEMBER_PREFIX)? == 0 {
            match fs::remove_dir_all(&self.root) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(LaunchError::collective_with_source(
                        "failed to remove rendezvous directory",
                        e,
                    ))
                }
            }
            tracing::debug!(root = %self.root.display(), "last member left, directory removed");
        }

        guard.release()
    }
}

fn touch(path: &Path) -> Result<()> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map(drop)
        .map_err(|e| {
            LaunchError::collective_with_source(format!("failed to create {}", path.display()), e)
        })
}

fn count_entries(dir: &Path, prefix: &str) -> Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            return Err(LaunchError::collective_with_source(
                format!("failed to list {}", dir.display()),
                e,
            ))
        }
    };

    let mut count = 0;
    for entry in entries {
        let entry = entry.map_err(|e| {
            LaunchError::collective_with_source(format!("failed to list {}", dir.display()), e)
        })?;
        if entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(prefix))
        {
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::device::DeviceKind;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn group(root: &Path) -> FileStoreGroup {
        FileStoreGroup::new(root, Duration::from_millis(2))
    }

    #[test]
    fn test_from_config_paths() {
        let config = RendezvousConfig {
            run_id: "job-1".to_string(),
            ..Default::default()
        };
        let group = FileStoreGroup::from_config(&config, Path::new("/cache"), ".lock");
        assert_eq!(group.root(), Path::new("/cache/rendezvous/job-1"));
        assert_eq!(group.lock_path(), Path::new("/cache/rendezvous/job-1.lock"));

        let config = RendezvousConfig {
            dir: Some(PathBuf::from("/shared")),
            ..Default::default()
        };
        let group = FileStoreGroup::from_config(&config, Path::new("/cache"), ".lck");
        assert_eq!(group.root(), Path::new("/shared/default"));
        assert_eq!(group.lock_path(), Path::new("/shared/default.lck"));
    }

    #[test]
    fn test_single_rank_lifecycle() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("run");
        let group = group(&root);
        let topology = Topology::distributed(0, 0, 1).unwrap();

        group
            .init(&topology, &Device::new(DeviceKind::Cuda, 0))
            .unwrap();
        assert!(root.join("member-0").exists());
        assert!(root.join("init/done").exists());

        group.barrier().unwrap();
        group.barrier().unwrap();
        assert!(root.join("barrier-2/done").exists());

        group.destroy().unwrap();
        assert!(!root.exists());
        assert!(!temp.path().join("run.lock").exists());

        // Second destroy is a no-op.
        group.destroy().unwrap();
    }

    #[test]
    fn test_three_ranks_on_threads() {
        let temp = TempDir::new().unwrap();
        let root = Arc::new(temp.path().join("run"));

        let handles: Vec<_> = (0..3)
            .map(|rank| {
                let root = root.clone();
                thread::spawn(move || {
                    let group = group(&root);
                    let topology = Topology::distributed(rank, rank, 3).unwrap();
                    group
                        .init(&topology, &Device::new(DeviceKind::Cuda, rank))
                        .unwrap();
                    group.barrier().unwrap();
                    group.destroy().unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(!root.exists());
    }

    #[test]
    fn test_custom_lock_suffix_used_on_destroy() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("run");
        let group = group(&root).with_lock_suffix(".lck");
        let topology = Topology::distributed(0, 0, 1).unwrap();

        group
            .init(&topology, &Device::new(DeviceKind::Cuda, 0))
            .unwrap();
        // Someone else holds the configured lock; destroy must wait for it.
        let held = FileLock::new(temp.path().join("run.lck")).acquire().unwrap();
        let destroyer = thread::spawn(move || group.destroy());
        thread::sleep(Duration::from_millis(50));
        assert!(root.exists());

        held.release().unwrap();
        destroyer.join().unwrap().unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn test_stale_directory_is_refused() {
        let temp = TempDir::new().unwrap();
        let root = Arc::new(temp.path().join("run"));

        // First run: rank 1 never tears down, leaving its state behind.
        let handles: Vec<_> = (0..2)
            .map(|rank| {
                let root = root.clone();
                thread::spawn(move || {
                    let group = group(&root);
                    let topology = Topology::distributed(rank, rank, 2).unwrap();
                    group
                        .init(&topology, &Device::new(DeviceKind::Cuda, rank))
                        .unwrap();
                    if rank == 0 {
                        group.destroy().unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(root.join("init/done").exists());

        // Second run: rank 0 alone must not pass the rendezvous.
        let rerun = group(&root);
        let topology = Topology::distributed(0, 0, 2).unwrap();
        let err = rerun
            .init(&topology, &Device::new(DeviceKind::Cuda, 0))
            .unwrap_err();
        assert!(matches!(err, LaunchError::Collective { .. }));
        assert!(err.to_string().contains("stale rendezvous state"));

        // After clearing the directory a fresh run goes through.
        fs::remove_dir_all(&*root).unwrap();
        let single = group(&root);
        let topology = Topology::distributed(0, 0, 1).unwrap();
        single
            .init(&topology, &Device::new(DeviceKind::Cuda, 0))
            .unwrap();
        single.destroy().unwrap();
    }

    #[test]
    fn test_barrier_before_init_fails() {
        let temp = TempDir::new().unwrap();
        let group = group(temp.path());
        assert!(matches!(group.barrier(), Err(LaunchError::Collective { .. })));
    }

    #[test]
    fn test_double_init_fails() {
        let temp = TempDir::new().unwrap();
        let group = group(&temp.path().join("run"));
        let topology = Topology::distributed(0, 0, 1).unwrap();
        let device = Device::new(DeviceKind::Cuda, 0);

        group.init(&topology, &device).unwrap();
        assert!(group.init(&topology, &device).is_err());
        group.destroy().unwrap();
    }
}
