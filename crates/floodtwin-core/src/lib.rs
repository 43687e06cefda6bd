//! Host-side launch and readiness handshake for the flood digital twin
//! companion process.
//!
//! The host and the companion share nothing but a directory: the host writes
//! an auth token before spawning, the companion writes a ready marker once it
//! has initialized, and the host removes both when the handshake ends.
//!
//! - [`exchange`]: coordination directory and handshake files
//! - [`watcher`]: background readiness polling with guaranteed cleanup
//! - [`lifecycle`]: ownership and termination of the live child
//! - [`launch`]: the coordinator tying it all together

pub mod config;
pub mod exchange;
pub mod launch;
pub mod lifecycle;
pub mod notice;
pub mod state;
pub mod watcher;

#[cfg(test)]
pub(crate) mod test_util;

pub use config::HandshakeConfig;
pub use launch::{LaunchCoordinator, LaunchError};
pub use lifecycle::{ChildProcessHandle, LifecycleGuard};
pub use notice::Notification;
pub use state::LaunchState;
pub use watcher::{HandshakeEvent, HandshakeOutcome};
