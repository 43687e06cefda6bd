//! User-facing notifications for launch results.
//!
//! Every launch attempt resolves to exactly one notification. Handshake
//! outcomes never produce one; a silent timeout stays silent.

use std::fmt;

use serde::Serialize;

use crate::launch::LaunchError;
use crate::lifecycle::ChildProcessHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A message for the UI layer: a dialog title and body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
}

impl Notification {
    fn new(level: NoticeLevel, title: &str, message: impl Into<String>) -> Self {
        Self {
            level,
            title: title.to_string(),
            message: message.into(),
        }
    }

    /// Shown after a successful spawn.
    pub fn launching() -> Self {
        Self::new(NoticeLevel::Info, "Launching", "Digital Twin is starting...")
    }

    pub fn from_error(err: &LaunchError) -> Self {
        match err {
            LaunchError::AlreadyRunning { .. } => {
                Self::new(NoticeLevel::Error, "Notice", "Digital Twin is already running.")
            }
            LaunchError::ExecutableNotFound { path, .. } => Self::new(
                NoticeLevel::Error,
                "Error",
                format!("Digital Twin executable not found:\n{}", path.display()),
            ),
            LaunchError::TokenWriteFailed(source) => Self::new(
                NoticeLevel::Error,
                "Error",
                format!("Unable to create auth token:\n{source}"),
            ),
            LaunchError::SpawnFailed { source, .. } => Self::new(
                NoticeLevel::Error,
                "Error",
                format!("Failed to open Digital Twin:\n{source}"),
            ),
            LaunchError::ShuttingDown => Self::new(
                NoticeLevel::Error,
                "Notice",
                "The application is closing; Digital Twin was not started.",
            ),
        }
    }

    pub fn for_result(result: &Result<ChildProcessHandle, LaunchError>) -> Self {
        match result {
            Ok(_) => Self::launching(),
            Err(e) => Self::from_error(e),
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == NoticeLevel::Error
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::path::PathBuf;

    use crate::exchange::ExchangeError;

    #[test]
    fn launching_is_informational() {
        let n = Notification::launching();
        assert_eq!(n.level, NoticeLevel::Info);
        assert_eq!(n.to_string(), "Launching: Digital Twin is starting...");
        assert!(!n.is_error());
    }

    #[test]
    fn already_running_maps_to_notice() {
        let n = Notification::from_error(&LaunchError::AlreadyRunning { pid: 7 });
        assert_eq!(n.title, "Notice");
        assert!(n.is_error());
    }

    #[test]
    fn not_found_includes_path() {
        let n = Notification::from_error(&LaunchError::ExecutableNotFound {
            path: PathBuf::from("/opt/twin/sim.exe"),
            candidates: vec![],
        });
        assert_eq!(n.message, "Digital Twin executable not found:\n/opt/twin/sim.exe");
    }

    #[test]
    fn token_failure_includes_cause() {
        let n = Notification::from_error(&LaunchError::TokenWriteFailed(
            ExchangeError::WriteToken {
                path: PathBuf::from("/coord/session_auth.txt"),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
            },
        ));
        assert!(n.message.starts_with("Unable to create auth token:\n"));
        assert!(n.message.contains("denied"));
    }

    #[test]
    fn spawn_failure_includes_cause() {
        let n = Notification::from_error(&LaunchError::SpawnFailed {
            path: PathBuf::from("/opt/twin/sim.exe"),
            source: io::Error::other("bad image"),
        });
        assert_eq!(n.message, "Failed to open Digital Twin:\nbad image");
    }
}
