//! Shared test utilities for floodtwin integration tests.
//!
//! [`CompanionSandbox`] gives every test its own temporary data root and
//! installation directory, so nothing touches the real `%APPDATA%`. The
//! spawners stand in for the OS spawn step:
//!
//! - [`SleepSpawner`] starts a long `sleep` in place of the companion and
//!   counts how often it was asked to spawn;
//! - [`FailingSpawner`] always fails, like a corrupt or blocked executable.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use tokio::process::{Child, Command};

use floodtwin_core::config::HandshakeConfig;
use floodtwin_core::exchange::{AUTH_TOKEN_FILE, READY_SIGNAL_FILE};
use floodtwin_core::launch::{ExecutableLocator, LaunchCoordinator, Spawner};
use floodtwin_core::lifecycle::LifecycleGuard;

/// Path of the fake companion, relative to the sandbox install dir.
pub const COMPANION_RELATIVE_PATH: &str = "FloodSimulation/Flood Simulation.exe";

/// Temporary data root plus install directory holding a fake companion.
pub struct CompanionSandbox {
    root: TempDir,
    config: HandshakeConfig,
}

impl CompanionSandbox {
    /// Sandbox with the default handshake timings (100 ms / 10 s).
    pub fn new() -> Self {
        Self::with_config(HandshakeConfig::default())
    }

    /// Sandbox with short timings for tests that run in real time.
    pub fn fast() -> Self {
        Self::with_config(HandshakeConfig {
            poll_interval: Duration::from_millis(20),
            ready_timeout: Duration::from_secs(3),
            terminate_grace: Duration::from_secs(2),
            ..HandshakeConfig::default()
        })
    }

    /// Sandbox using `config`, with its data root redirected into the
    /// sandbox.
    pub fn with_config(config: HandshakeConfig) -> Self {
        let root = TempDir::new().expect("failed to create sandbox dir");
        let config = HandshakeConfig {
            data_root: Some(root.path().join("data")),
            ..config
        };

        let sandbox = Self { root, config };
        let exe = sandbox.executable();
        std::fs::create_dir_all(exe.parent().expect("companion path has a parent"))
            .expect("failed to create companion dir");
        std::fs::write(&exe, "").expect("failed to write fake companion");
        sandbox
    }

    pub fn config(&self) -> HandshakeConfig {
        self.config.clone()
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn install_dir(&self) -> PathBuf {
        self.root.path().join("install")
    }

    /// Absolute path of the fake companion (an empty file).
    pub fn executable(&self) -> PathBuf {
        self.install_dir().join(COMPANION_RELATIVE_PATH)
    }

    pub fn locator(&self) -> ExecutableLocator {
        ExecutableLocator::new(self.install_dir())
    }

    pub fn coordination_dir(&self) -> PathBuf {
        self.config.coordination_dir()
    }

    pub fn token_path(&self) -> PathBuf {
        self.coordination_dir().join(AUTH_TOKEN_FILE)
    }

    pub fn ready_path(&self) -> PathBuf {
        self.coordination_dir().join(READY_SIGNAL_FILE)
    }

    /// Play the companion's part: create the ready marker.
    pub fn signal_ready(&self) {
        std::fs::create_dir_all(self.coordination_dir()).expect("failed to create coord dir");
        std::fs::write(self.ready_path(), "").expect("failed to write ready marker");
    }

    pub fn token_exists(&self) -> bool {
        self.token_path().exists()
    }

    pub fn ready_exists(&self) -> bool {
        self.ready_path().exists()
    }

    /// Neither handshake file is on disk.
    pub fn handshake_files_absent(&self) -> bool {
        !self.token_exists() && !self.ready_exists()
    }

    /// Coordinator wired to this sandbox and the given spawner.
    pub fn coordinator(&self, spawner: Arc<dyn Spawner>) -> LaunchCoordinator {
        let guard = Arc::new(LifecycleGuard::from_config(&self.config));
        LaunchCoordinator::new(self.config(), guard)
            .with_locator(self.locator())
            .with_spawner(spawner)
    }
}

impl Default for CompanionSandbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns `sleep 30` in place of the companion and records what it was
/// asked to run.
#[derive(Debug, Default)]
pub struct SleepSpawner {
    spawned: AtomicUsize,
    last: Mutex<Option<(PathBuf, PathBuf)>>,
}

impl SleepSpawner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// How many processes this spawner has started.
    pub fn spawn_count(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    /// `(executable, working_dir)` of the most recent spawn.
    pub fn last_spawn(&self) -> Option<(PathBuf, PathBuf)> {
        self.last.lock().expect("spawn record poisoned").clone()
    }
}

impl Spawner for SleepSpawner {
    fn spawn(&self, executable: &Path, working_dir: &Path) -> io::Result<Child> {
        let child = Command::new("sleep")
            .arg("30")
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.spawned.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().expect("spawn record poisoned") =
            Some((executable.to_path_buf(), working_dir.to_path_buf()));
        Ok(child)
    }
}

/// Always fails to spawn.
#[derive(Debug, Default)]
pub struct FailingSpawner {
    attempts: AtomicUsize,
}

impl FailingSpawner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Spawner for FailingSpawner {
    fn spawn(&self, _executable: &Path, _working_dir: &Path) -> io::Result<Child> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "simulated spawn failure",
        ))
    }
}

/// Poll `condition` every 10 ms until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
