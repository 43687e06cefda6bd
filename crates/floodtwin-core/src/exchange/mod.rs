//! Credential exchange: the host half of the filesystem handshake.
//!
//! The host and the companion share no channel other than a directory under
//! the user's data root:
//!
//! ```text
//! <user-data-root>/<app-name>/
//!     session_auth.txt   written by the host before spawn ("AUTHORIZED")
//!     ready.txt          written by the companion once it has initialized
//! ```
//!
//! The host is the only writer of the token and the only deleter of both
//! files. [`CredentialExchange::clear`] is the single cleanup primitive every
//! terminal path goes through.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rand::Rng;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::HandshakeConfig;

/// File the host writes to authorize the companion.
pub const AUTH_TOKEN_FILE: &str = "session_auth.txt";

/// File the companion writes once it is ready.
pub const READY_SIGNAL_FILE: &str = "ready.txt";

/// Literal content of the auth token file.
pub const AUTH_MARKER: &str = "AUTHORIZED";

/// Errors that can occur while staging the auth token.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("failed to create coordination directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write auth token {}: {source}", path.display())]
    WriteToken {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A staged handshake.
///
/// Returned by [`CredentialExchange::stage`]. Cleanup through a session is
/// skipped once a newer session has been staged, so a late watcher can never
/// delete the token of the handshake that replaced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    generation: u64,
    nonce: Option<String>,
}

impl Session {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The per-launch nonce, when nonce binding is enabled.
    pub fn nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }
}

/// What a cleanup pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    /// Files that existed and were deleted.
    pub removed: usize,
    /// Files whose deletion failed (already logged).
    pub failed: usize,
}

/// Snapshot of the coordination directory, for status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoordinationStatus {
    pub dir: PathBuf,
    pub dir_exists: bool,
    pub auth_token_present: bool,
    pub ready_signal_present: bool,
}

/// Owns the coordination directory and the two handshake files.
#[derive(Debug)]
pub struct CredentialExchange {
    dir: PathBuf,
    require_nonce: bool,
    /// Generation of the most recently staged session. The lock also
    /// serializes staging against session-scoped cleanup.
    generation: Mutex<u64>,
}

impl CredentialExchange {
    /// Create an exchange rooted at `dir`. Nothing touches the disk until
    /// [`stage`](Self::stage).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            require_nonce: false,
            generation: Mutex::new(0),
        }
    }

    pub fn from_config(config: &HandshakeConfig) -> Self {
        Self::new(config.coordination_dir()).with_nonce(config.require_nonce)
    }

    /// Append a random per-launch nonce to the token and require the ready
    /// marker to echo it back.
    pub fn with_nonce(mut self, require_nonce: bool) -> Self {
        self.require_nonce = require_nonce;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Generation of the most recently staged session; 0 before the first
    /// [`stage`](Self::stage).
    pub fn generation(&self) -> u64 {
        *lock(&self.generation)
    }

    pub fn auth_token_path(&self) -> PathBuf {
        self.dir.join(AUTH_TOKEN_FILE)
    }

    pub fn ready_signal_path(&self) -> PathBuf {
        self.dir.join(READY_SIGNAL_FILE)
    }

    /// Materialize the coordination directory and write the auth token.
    ///
    /// Any token left by an earlier session is overwritten. A ready marker
    /// left by a host that crashed mid-handshake is removed first, otherwise
    /// the new watcher would see it and declare readiness immediately.
    pub fn stage(&self) -> Result<Session, ExchangeError> {
        let mut generation = lock(&self.generation);

        fs::create_dir_all(&self.dir).map_err(|source| ExchangeError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;

        let ready = self.ready_signal_path();
        match fs::remove_file(&ready) {
            Ok(()) => warn!(path = %ready.display(), "removed stale ready marker"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %ready.display(), error = %e, "failed to remove stale ready marker")
            }
        }

        let nonce = self.require_nonce.then(generate_nonce);
        let contents = match &nonce {
            Some(nonce) => format!("{AUTH_MARKER}\n{nonce}"),
            None => AUTH_MARKER.to_string(),
        };

        let token = self.auth_token_path();
        if let Err(source) = fs::write(&token, contents) {
            // A half-written token must not linger.
            remove_if_present(&token);
            return Err(ExchangeError::WriteToken {
                path: token,
                source,
            });
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = fs::set_permissions(&token, fs::Permissions::from_mode(0o600)) {
                warn!(path = %token.display(), error = %e, "failed to restrict auth token permissions");
            }
        }

        *generation += 1;
        debug!(
            path = %token.display(),
            generation = *generation,
            nonce = nonce.is_some(),
            "staged auth token"
        );

        Ok(Session {
            generation: *generation,
            nonce,
        })
    }

    /// Delete the auth token and the ready marker if present.
    ///
    /// Each file is attempted independently; a failure on one never stops
    /// the other. Missing files are not an error. Failures are logged and
    /// counted, never returned.
    pub fn clear(&self) -> ClearReport {
        let mut report = ClearReport::default();
        for path in [self.auth_token_path(), self.ready_signal_path()] {
            match fs::remove_file(&path) {
                Ok(()) => report.removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(path = %path.display(), error = %e, "failed to remove handshake file");
                }
            }
        }
        report
    }

    /// [`clear`](Self::clear), unless `session` has been superseded by a
    /// newer [`stage`](Self::stage). Returns `None` when skipped.
    pub fn clear_session(&self, session: &Session) -> Option<ClearReport> {
        let generation = lock(&self.generation);
        if *generation != session.generation {
            debug!(
                session = session.generation,
                current = *generation,
                "skipping cleanup for superseded session"
            );
            return None;
        }
        Some(self.clear())
    }

    /// Whether the companion has signalled readiness for `session`.
    ///
    /// Without a nonce, existence of the marker is the whole signal. With a
    /// nonce, the marker must contain it; a foreign marker is ignored.
    pub fn ready_observed(&self, session: &Session) -> bool {
        let path = self.ready_signal_path();
        let Some(nonce) = session.nonce() else {
            return path.exists();
        };
        match fs::read_to_string(&path) {
            Ok(contents) => contents.contains(nonce),
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "ready marker not readable yet");
                false
            }
        }
    }

    pub fn status(&self) -> CoordinationStatus {
        CoordinationStatus {
            dir: self.dir.clone(),
            dir_exists: self.dir.is_dir(),
            auth_token_present: self.auth_token_path().exists(),
            ready_signal_present: self.ready_signal_path().exists(),
        }
    }
}

/// 16 random bytes, hex-encoded.
fn generate_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

fn remove_if_present(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove partial file");
        }
    }
}

fn lock(generation: &Mutex<u64>) -> std::sync::MutexGuard<'_, u64> {
    generation.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
