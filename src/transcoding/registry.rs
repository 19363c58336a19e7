//! In-process registry of supervised jobs.
//!
//! Each running job owns a child [`CancellationToken`] and, once spawned, the
//! pid of its encoder process. The encoder leads its own process group, so the
//! pid doubles as the group id.

use std::sync::Arc;

use dashmap::DashMap;
use jiptv_common::JobId;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct ActiveJob {
    token: CancellationToken,
    pid: Option<u32>,
}

/// Map from job id to the handle that can stop its supervisor.
#[derive(Debug, Clone, Default)]
pub struct ActiveJobs {
    inner: Arc<DashMap<JobId, ActiveJob>>,
}

impl ActiveJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a job, returning the token its supervisor must watch.
    pub fn register(&self, id: JobId, parent: &CancellationToken) -> CancellationToken {
        let token = parent.child_token();
        self.inner.insert(
            id,
            ActiveJob {
                token: token.clone(),
                pid: None,
            },
        );
        token
    }

    pub fn set_pid(&self, id: JobId, pid: u32) {
        if let Some(mut entry) = self.inner.get_mut(&id) {
            entry.pid = Some(pid);
        }
    }

    pub fn pid(&self, id: JobId) -> Option<u32> {
        self.inner.get(&id).and_then(|e| e.pid)
    }

    pub fn remove(&self, id: JobId) {
        self.inner.remove(&id);
    }

    /// Ask a supervisor to stop. Returns whether the job was registered.
    pub fn signal(&self, id: JobId) -> bool {
        match self.inner.get(&id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// SIGKILL the job's process group, then signal the supervisor.
    pub fn kill(&self, id: JobId) -> bool {
        let Some(entry) = self.inner.get(&id) else {
            return false;
        };
        if let Some(pid) = entry.pid {
            kill_process_group(pid);
        }
        entry.token.cancel();
        true
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.inner.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// SIGKILL every process in the group led by `pid`.
#[cfg(unix)]
pub(crate) fn kill_process_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => tracing::debug!(pid, "Killed encoder process group"),
        Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pid, error = %e, "Failed to kill encoder process group"),
    }
}

#[cfg(not(unix))]
pub(crate) fn kill_process_group(_pid: u32) {}
