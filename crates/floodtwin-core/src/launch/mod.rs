//! Launch coordinator: spawns the companion and starts its handshake.
//!
//! `launch` runs synchronously on the caller's thread and returns as soon as
//! the spawn step is done:
//!
//! 1. Reject if a companion is already live (no side effects).
//! 2. Resolve the executable (no side effects).
//! 3. Stage the auth token.
//! 4. Spawn the companion; on failure clear the staged files before
//!    returning.
//! 5. Register the child with the [`LifecycleGuard`], start the
//!    [`ReadinessWatcher`] in the background, return the handle.
//!
//! Readiness is resolved later and never surfaces as an error. Callers that
//! want to react to it can [`subscribe`](LaunchCoordinator::subscribe) to
//! [`HandshakeEvent`]s.

pub mod locator;
pub mod spawner;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::HandshakeConfig;
use crate::exchange::{CredentialExchange, ExchangeError};
use crate::lifecycle::{ChildProcessHandle, LifecycleGuard};
use crate::state::{LaunchState, LaunchStateMachine};
use crate::watcher::{HandshakeEvent, HandshakeOutcome, ReadinessWatcher};

pub use locator::{DEFAULT_COMPANION_PATH, ExecutableLocator};
pub use spawner::{Spawner, SystemSpawner};

/// Capacity of the handshake event channel. Slow subscribers lag, they
/// never block a watcher.
const EVENT_CAPACITY: usize = 16;

/// Why a launch attempt was refused or failed.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("companion is already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("companion executable not found: {}", path.display())]
    ExecutableNotFound {
        path: PathBuf,
        /// Every location that was checked.
        candidates: Vec<PathBuf>,
    },

    #[error("unable to create auth token: {0}")]
    TokenWriteFailed(#[from] ExchangeError),

    #[error("failed to spawn companion {}: {source}", path.display())]
    SpawnFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("host is shutting down")]
    ShuttingDown,
}

/// Wires the credential exchange, spawner, lifecycle guard, and readiness
/// watcher together.
pub struct LaunchCoordinator {
    config: HandshakeConfig,
    exchange: Arc<CredentialExchange>,
    guard: Arc<LifecycleGuard>,
    spawner: Arc<dyn Spawner>,
    locator: ExecutableLocator,
    state: Arc<LaunchStateMachine>,
    events: broadcast::Sender<HandshakeEvent>,
    shutdown: CancellationToken,
    watchers: TaskTracker,
    /// Serializes launch attempts so two callers cannot both pass the
    /// liveness check.
    launch_lock: Mutex<()>,
}

impl std::fmt::Debug for LaunchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchCoordinator")
            .field("coordination_dir", &self.exchange.dir())
            .field("locator", &self.locator)
            .field("state", &self.state.current())
            .finish()
    }
}

impl LaunchCoordinator {
    /// Coordinator using the real OS spawner and the host's own executable
    /// layout.
    pub fn new(config: HandshakeConfig, guard: Arc<LifecycleGuard>) -> Self {
        let exchange = Arc::new(CredentialExchange::from_config(&config));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            exchange,
            guard,
            spawner: Arc::new(SystemSpawner),
            locator: ExecutableLocator::from_env(),
            state: Arc::new(LaunchStateMachine::new()),
            events,
            shutdown: CancellationToken::new(),
            watchers: TaskTracker::new(),
            launch_lock: Mutex::new(()),
        }
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn with_locator(mut self, locator: ExecutableLocator) -> Self {
        self.locator = locator;
        self
    }

    /// Tie watcher lifetimes to an existing host shutdown token.
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn config(&self) -> &HandshakeConfig {
        &self.config
    }

    pub fn exchange(&self) -> &CredentialExchange {
        &self.exchange
    }

    pub fn guard(&self) -> &Arc<LifecycleGuard> {
        &self.guard
    }

    pub fn locator(&self) -> &ExecutableLocator {
        &self.locator
    }

    /// Receive a [`HandshakeEvent`] for every handshake that finishes after
    /// this call.
    pub fn subscribe(&self) -> broadcast::Receiver<HandshakeEvent> {
        self.events.subscribe()
    }

    /// Current launch state. A spawned child that has since exited reads as
    /// [`LaunchState::Idle`].
    pub fn state(&self) -> LaunchState {
        if self.state.current().has_child() && !self.guard.is_live() {
            self.state.child_gone();
        }
        self.state.current()
    }

    /// Number of readiness watchers still running.
    pub fn active_watchers(&self) -> usize {
        self.watchers.len()
    }

    /// Launch the companion at `executable`.
    ///
    /// Must be called from within a tokio runtime. Returns once the spawn
    /// step completes; the companion is not necessarily ready yet.
    pub fn launch(&self, executable: impl AsRef<Path>) -> Result<ChildProcessHandle, LaunchError> {
        let executable = executable.as_ref();
        let _serial = self
            .launch_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if self.shutdown.is_cancelled() {
            return Err(LaunchError::ShuttingDown);
        }

        if let Some(live) = self.guard.current() {
            debug!(pid = live.pid, "launch refused: companion already running");
            return Err(LaunchError::AlreadyRunning { pid: live.pid });
        }
        self.state.child_gone();

        let Some(resolved) = self.locator.resolve(executable) else {
            let candidates = self.locator.candidates(executable);
            let path = candidates
                .first()
                .cloned()
                .unwrap_or_else(|| executable.to_path_buf());
            warn!(path = %path.display(), "companion executable not found");
            return Err(LaunchError::ExecutableNotFound { path, candidates });
        };
        let resolved = std::path::absolute(&resolved).unwrap_or(resolved);

        let launch_id = Uuid::new_v4();
        self.state.begin(launch_id);

        let session = match self.exchange.stage() {
            Ok(session) => session,
            Err(e) => {
                warn!(launch_id = %launch_id, error = %e, "failed to stage auth token");
                self.state
                    .transition(launch_id, LaunchState::Launching, LaunchState::Failed);
                return Err(LaunchError::TokenWriteFailed(e));
            }
        };

        let working_dir = resolved
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        let spawned = self
            .spawner
            .spawn(&resolved, &working_dir)
            .and_then(|child| match child.id() {
                Some(pid) => Ok((child, pid)),
                None => Err(io::Error::other("companion exited before its pid was observed")),
            });

        let (child, pid) = match spawned {
            Ok(spawned) => spawned,
            Err(source) => {
                // A partially staged handshake must not outlive the failed launch.
                self.exchange.clear_session(&session);
                warn!(
                    launch_id = %launch_id,
                    path = %resolved.display(),
                    error = %source,
                    "failed to spawn companion"
                );
                self.state
                    .transition(launch_id, LaunchState::Launching, LaunchState::Failed);
                return Err(LaunchError::SpawnFailed {
                    path: resolved,
                    source,
                });
            }
        };

        let handle = ChildProcessHandle {
            launch_id,
            pid,
            executable: resolved,
            spawned_at: Utc::now(),
        };
        self.guard.register_live(handle.clone(), child);
        self.state
            .transition(launch_id, LaunchState::Launching, LaunchState::Running);

        info!(
            launch_id = %launch_id,
            pid,
            path = %handle.executable.display(),
            cwd = %working_dir.display(),
            "companion spawned"
        );

        let watcher = ReadinessWatcher::new(
            Arc::clone(&self.exchange),
            session,
            &self.config,
            self.shutdown.child_token(),
            launch_id,
        );
        self.spawn_watcher(watcher, launch_id, pid);

        Ok(handle)
    }

    fn spawn_watcher(&self, watcher: ReadinessWatcher, launch_id: Uuid, pid: u32) {
        let state = Arc::clone(&self.state);
        let events = self.events.clone();

        self.watchers.spawn(async move {
            let started = Instant::now();
            let outcome = watcher.run().await;

            if outcome == HandshakeOutcome::TimedOut {
                state.transition(launch_id, LaunchState::Running, LaunchState::TimedOut);
            }

            // No subscribers is the common case.
            let _ = events.send(HandshakeEvent {
                launch_id,
                pid,
                outcome,
                elapsed: started.elapsed(),
                finished_at: Utc::now(),
            });
        });
    }

    /// Host shutdown: cancel in-flight watchers, wait for their cleanup,
    /// then terminate the live companion. Never fails.
    pub async fn shutdown(&self) {
        info!("shutting down launch coordinator");
        self.shutdown.cancel();
        self.watchers.close();
        self.watchers.wait().await;

        if let Some(stopped) = self.guard.shutdown().await {
            debug!(pid = stopped.pid, "companion stopped");
        }
        self.state.child_gone();
    }
}
