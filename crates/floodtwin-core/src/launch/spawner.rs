//! The `Spawner` trait: the seam between the coordinator and the OS.
//!
//! [`SystemSpawner`] is the real implementation. Tests substitute their own
//! to simulate spawn failures or to run a stand-in process. The trait is
//! object-safe so the coordinator can hold an `Arc<dyn Spawner>`.

use std::io;
use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, Command};

/// Starts the companion executable as an OS process.
pub trait Spawner: Send + Sync {
    /// Spawn `executable` with `working_dir` as its current directory.
    ///
    /// Must be called from within a tokio runtime.
    fn spawn(&self, executable: &Path, working_dir: &Path) -> io::Result<Child>;
}

// Compile-time assertion: Spawner must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Spawner) {}
};

/// Spawns the companion directly (no shell), detached from the host's stdio.
///
/// On Windows the console window is suppressed; on Unix the child is moved
/// into its own process group so terminal signals aimed at the host do not
/// reach it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSpawner;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

impl Spawner for SystemSpawner {
    fn spawn(&self, executable: &Path, working_dir: &Path) -> io::Result<Child> {
        let mut cmd = Command::new(executable);
        cmd.current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);

        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        #[cfg(unix)]
        cmd.process_group(0);

        cmd.spawn()
    }
}
