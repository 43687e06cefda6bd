//! Launch state machine.
//!
//! Tracks where the most recent launch attempt stands from the host's point
//! of view. The allowed transition graph:
//!
//! ```text
//! idle      -> launching
//! failed    -> launching   (new attempt after a failed one)
//! launching -> running     (spawn succeeded)
//! launching -> failed      (token staging or spawn failed)
//! running   -> timed_out   (watcher gave up; child may still be running)
//! running   -> idle        (child exited or was terminated)
//! timed_out -> idle        (child exited or was terminated)
//! ```
//!
//! A ready companion stays `running`: readiness ends the handshake, not the
//! child's life.

use std::fmt;
use std::sync::Mutex;

use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchState {
    Idle,
    Launching,
    Running,
    TimedOut,
    Failed,
}

impl LaunchState {
    /// Whether `from -> to` is an edge of the state graph.
    pub fn is_valid_transition(from: LaunchState, to: LaunchState) -> bool {
        use LaunchState::*;
        matches!(
            (from, to),
            (Idle, Launching)
                | (Failed, Launching)
                | (Launching, Running)
                | (Launching, Failed)
                | (Running, TimedOut)
                | (Running, Idle)
                | (TimedOut, Idle)
        )
    }

    /// States in which a child process was spawned and may still be alive.
    pub fn has_child(self) -> bool {
        matches!(self, LaunchState::Running | LaunchState::TimedOut)
    }
}

impl fmt::Display for LaunchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LaunchState::Idle => "idle",
            LaunchState::Launching => "launching",
            LaunchState::Running => "running",
            LaunchState::TimedOut => "timed_out",
            LaunchState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
struct Tracked {
    state: LaunchState,
    launch_id: Option<Uuid>,
}

/// Current [`LaunchState`] plus the launch it belongs to.
///
/// Transitions carry the launch id so that a watcher finishing late for an
/// earlier launch cannot move the state of a newer one.
#[derive(Debug)]
pub struct LaunchStateMachine {
    inner: Mutex<Tracked>,
}

impl LaunchStateMachine {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Tracked {
                state: LaunchState::Idle,
                launch_id: None,
            }),
        }
    }

    pub fn current(&self) -> LaunchState {
        self.lock().state
    }

    pub fn launch_id(&self) -> Option<Uuid> {
        self.lock().launch_id
    }

    /// Start tracking a new launch attempt (`-> launching`).
    pub fn begin(&self, launch_id: Uuid) -> bool {
        let mut tracked = self.lock();
        if !LaunchState::is_valid_transition(tracked.state, LaunchState::Launching) {
            warn!(
                from = %tracked.state,
                launch_id = %launch_id,
                "refusing to begin launch from current state"
            );
            return false;
        }
        tracked.state = LaunchState::Launching;
        tracked.launch_id = Some(launch_id);
        true
    }

    /// Move the tracked launch `launch_id` from `from` to `to`.
    ///
    /// Returns `false` (without changing anything) when a different launch is
    /// tracked, the current state is not `from`, or the edge is not allowed.
    pub fn transition(&self, launch_id: Uuid, from: LaunchState, to: LaunchState) -> bool {
        let mut tracked = self.lock();
        if tracked.launch_id != Some(launch_id) {
            debug!(launch_id = %launch_id, "ignoring transition for a superseded launch");
            return false;
        }
        if tracked.state != from {
            debug!(
                launch_id = %launch_id,
                expected = %from,
                actual = %tracked.state,
                "ignoring transition from stale state"
            );
            return false;
        }
        if !LaunchState::is_valid_transition(from, to) {
            warn!(launch_id = %launch_id, from = %from, to = %to, "invalid launch state transition");
            return false;
        }
        tracked.state = to;
        true
    }

    /// Collapse `running`/`timed_out` to `idle` once the child is gone.
    pub fn child_gone(&self) -> bool {
        let mut tracked = self.lock();
        if tracked.state.has_child() {
            tracked.state = LaunchState::Idle;
            return true;
        }
        false
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tracked> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for LaunchStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LaunchState::*;

    #[test]
    fn valid_edges() {
        assert!(LaunchState::is_valid_transition(Idle, Launching));
        assert!(LaunchState::is_valid_transition(Failed, Launching));
        assert!(LaunchState::is_valid_transition(Launching, Running));
        assert!(LaunchState::is_valid_transition(Launching, Failed));
        assert!(LaunchState::is_valid_transition(Running, TimedOut));
        assert!(LaunchState::is_valid_transition(Running, Idle));
        assert!(LaunchState::is_valid_transition(TimedOut, Idle));
    }

    #[test]
    fn invalid_edges() {
        assert!(!LaunchState::is_valid_transition(Idle, Running));
        assert!(!LaunchState::is_valid_transition(Running, Launching));
        assert!(!LaunchState::is_valid_transition(TimedOut, Running));
        assert!(!LaunchState::is_valid_transition(Failed, Running));
        assert!(!LaunchState::is_valid_transition(Launching, TimedOut));
    }

    #[test]
    fn machine_starts_idle() {
        let machine = LaunchStateMachine::new();
        assert_eq!(machine.current(), Idle);
        assert_eq!(machine.launch_id(), None);
    }

    #[test]
    fn happy_path_then_child_exit() {
        let machine = LaunchStateMachine::new();
        let id = Uuid::new_v4();

        assert!(machine.begin(id));
        assert!(machine.transition(id, Launching, Running));
        assert!(machine.transition(id, Running, TimedOut));
        assert!(machine.child_gone());
        assert_eq!(machine.current(), Idle);
    }

    #[test]
    fn failed_launch_can_be_retried() {
        let machine = LaunchStateMachine::new();
        let first = Uuid::new_v4();
        machine.begin(first);
        machine.transition(first, Launching, Failed);
        assert_eq!(machine.current(), Failed);
        assert!(!machine.child_gone());

        let second = Uuid::new_v4();
        assert!(machine.begin(second));
        assert_eq!(machine.launch_id(), Some(second));
    }

    #[test]
    fn superseded_launch_cannot_transition() {
        let machine = LaunchStateMachine::new();
        let old = Uuid::new_v4();
        machine.begin(old);
        machine.transition(old, Launching, Running);
        machine.child_gone();

        let new = Uuid::new_v4();
        machine.begin(new);
        machine.transition(new, Launching, Running);

        // The old launch's watcher times out late.
        assert!(!machine.transition(old, Running, TimedOut));
        assert_eq!(machine.current(), Running);
    }

    #[test]
    fn begin_refused_while_running() {
        let machine = LaunchStateMachine::new();
        let id = Uuid::new_v4();
        machine.begin(id);
        machine.transition(id, Launching, Running);

        assert!(!machine.begin(Uuid::new_v4()));
        assert_eq!(machine.launch_id(), Some(id));
    }

    #[test]
    fn display_is_snake_case() {
        assert_eq!(TimedOut.to_string(), "timed_out");
        assert_eq!(Launching.to_string(), "launching");
    }
}
