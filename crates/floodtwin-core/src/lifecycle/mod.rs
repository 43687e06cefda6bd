//! Lifecycle guard: sole owner of the live companion process.
//!
//! The guard holds at most one child. Liveness is always answered from the
//! OS (`try_wait`), so a child that exited on its own frees the slot without
//! anyone unregistering it. On host shutdown the guard asks the child to
//! terminate and never lets a termination error stop the host from closing.

use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::process::Child;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::HandshakeConfig;

/// Descriptor of a spawned companion process.
///
/// The OS child itself stays inside the [`LifecycleGuard`]; callers get this
/// cloneable view of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChildProcessHandle {
    pub launch_id: Uuid,
    pub pid: u32,
    pub executable: PathBuf,
    pub spawned_at: DateTime<Utc>,
}

struct LiveChild {
    handle: ChildProcessHandle,
    child: Child,
}

/// Tracks the single live child across the host's lifetime.
pub struct LifecycleGuard {
    current: Mutex<Option<LiveChild>>,
    terminate_grace: Duration,
}

impl std::fmt::Debug for LifecycleGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleGuard")
            .field("terminate_grace", &self.terminate_grace)
            .finish()
    }
}

impl LifecycleGuard {
    pub fn new(terminate_grace: Duration) -> Self {
        Self {
            current: Mutex::new(None),
            terminate_grace,
        }
    }

    pub fn from_config(config: &HandshakeConfig) -> Self {
        Self::new(config.terminate_grace)
    }

    /// Record `child` as the live companion.
    ///
    /// The coordinator only calls this after [`is_live`](Self::is_live)
    /// returned `false`; a child still recorded at that point has exited and
    /// is simply dropped.
    pub fn register_live(&self, handle: ChildProcessHandle, child: Child) {
        let mut current = self.lock();
        if let Some(previous) = current.take() {
            debug!(pid = previous.handle.pid, "replacing previously registered child");
        }
        debug!(pid = handle.pid, launch_id = %handle.launch_id, "registered live child");
        *current = Some(LiveChild { handle, child });
    }

    /// Whether the recorded child is still running.
    pub fn is_live(&self) -> bool {
        self.current().is_some()
    }

    /// The recorded child's handle if it is still running. A child observed
    /// to have exited is forgotten; one whose status cannot be read is kept.
    pub fn current(&self) -> Option<ChildProcessHandle> {
        let mut current = self.lock();
        let live = current.as_mut()?;
        if still_running(live.handle.pid, live.child.try_wait()) {
            return Some(live.handle.clone());
        }
        *current = None;
        None
    }

    /// Terminate the recorded child if it is still running.
    ///
    /// On Unix the child gets SIGTERM and `terminate_grace` to exit before it
    /// is killed. Errors are logged and swallowed. Returns the handle of the
    /// child that was stopped, if any.
    pub async fn shutdown(&self) -> Option<ChildProcessHandle> {
        // Take the child out so the lock is not held across the awaits below.
        let LiveChild { handle, mut child } = self.lock().take()?;
        let pid = handle.pid;

        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(pid, %status, "companion already exited at shutdown");
                return None;
            }
            Ok(None) => {}
            Err(e) => warn!(pid, error = %e, "error checking companion status at shutdown"),
        }

        #[cfg(unix)]
        {
            // SAFETY: pid belongs to a child we spawned and have not reaped.
            let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            if ret != 0 {
                warn!(pid, "SIGTERM failed, proceeding to SIGKILL");
            }
        }

        let exited = if cfg!(unix) {
            tokio::time::timeout(self.terminate_grace, child.wait()).await
        } else {
            // No graceful signal to wait on; go straight to kill.
            tokio::time::timeout(Duration::ZERO, child.wait()).await
        };

        match exited {
            Ok(Ok(status)) => debug!(pid, %status, "companion exited after SIGTERM"),
            _ => {
                debug!(pid, "companion still running, killing");
                if let Err(e) = child.kill().await {
                    warn!(pid, error = %e, "failed to kill companion process");
                }
            }
        }

        info!(pid, launch_id = %handle.launch_id, "companion terminated at host shutdown");
        Some(handle)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<LiveChild>> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Interpret a `try_wait` result. Only an observed exit frees the slot; an
/// unreadable status counts as running so the child is never orphaned.
fn still_running(pid: u32, observed: io::Result<Option<ExitStatus>>) -> bool {
    match observed {
        Ok(None) => true,
        Ok(Some(status)) => {
            info!(pid, %status, "companion process exited");
            false
        }
        Err(e) => {
            warn!(pid, error = %e, "error checking companion status; treating as running");
            true
        }
    }
}

impl Default for LifecycleGuard {
    fn default() -> Self {
        Self::new(HandshakeConfig::DEFAULT_TERMINATE_GRACE)
    }
}
