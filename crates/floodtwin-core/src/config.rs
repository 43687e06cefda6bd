//! Handshake configuration.
//!
//! Every knob has a compiled-in default matching the companion's expectations
//! (`ZarragaFloodMonitoring` coordination directory, 100 ms polling, 10 s
//! readiness window). [`HandshakeConfig::from_env`] layers `FLOODTWIN_*`
//! environment overrides on top of those defaults.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Errors produced while reading configuration overrides.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be a whole number of milliseconds, got {value:?}")]
    InvalidMillis { var: &'static str, value: String },

    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,

    #[error("ready timeout must be greater than zero")]
    ZeroReadyTimeout,
}

/// Settings for the filesystem handshake and child termination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeConfig {
    /// Name of the coordination directory under the user data root.
    pub app_dir_name: String,
    /// Overrides the platform user data root (mostly for tests and portable installs).
    pub data_root: Option<PathBuf>,
    /// Delay between two checks for the ready marker.
    pub poll_interval: Duration,
    /// Total time the readiness watcher waits before giving up silently.
    pub ready_timeout: Duration,
    /// Bind the ready marker to a per-launch nonce written into the token file.
    pub require_nonce: bool,
    /// How long shutdown waits after SIGTERM before force-killing the child.
    pub terminate_grace: Duration,
}

impl HandshakeConfig {
    pub const DEFAULT_APP_DIR: &str = "ZarragaFloodMonitoring";
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
    pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(5);

    pub const APP_DIR_ENV: &str = "FLOODTWIN_APP_DIR";
    pub const DATA_ROOT_ENV: &str = "FLOODTWIN_DATA_ROOT";
    pub const POLL_INTERVAL_ENV: &str = "FLOODTWIN_POLL_INTERVAL_MS";
    pub const READY_TIMEOUT_ENV: &str = "FLOODTWIN_READY_TIMEOUT_MS";

    /// Build a config from the environment, falling back to the defaults for
    /// anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    /// Override fields of `self` with any `FLOODTWIN_*` variables that are
    /// set, then validate the result.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        let mut config = self;

        if let Some(name) = non_empty_var(Self::APP_DIR_ENV) {
            config.app_dir_name = name;
        }
        if let Some(root) = non_empty_var(Self::DATA_ROOT_ENV) {
            config.data_root = Some(PathBuf::from(root));
        }
        if let Some(ms) = millis_var(Self::POLL_INTERVAL_ENV)? {
            config.poll_interval = ms;
        }
        if let Some(ms) = millis_var(Self::READY_TIMEOUT_ENV)? {
            config.ready_timeout = ms;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the watcher cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        // A zero window would clear the token before the companion reads it.
        if self.ready_timeout.is_zero() {
            return Err(ConfigError::ZeroReadyTimeout);
        }
        Ok(())
    }

    /// `<user-data-root>/<app-dir-name>`.
    pub fn coordination_dir(&self) -> PathBuf {
        self.data_root
            .clone()
            .unwrap_or_else(user_data_root)
            .join(&self.app_dir_name)
    }

    /// Number of checks the watcher performs before timing out
    /// (10 s / 100 ms = 100 with the defaults). Rounded up; the watcher
    /// shortens its last sleep so the window never exceeds `ready_timeout`.
    pub fn max_polls(&self) -> u32 {
        if self.poll_interval.is_zero() {
            return 0;
        }
        let interval = self.poll_interval.as_nanos();
        let polls = self.ready_timeout.as_nanos().div_ceil(interval);
        u32::try_from(polls).unwrap_or(u32::MAX)
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            app_dir_name: Self::DEFAULT_APP_DIR.to_string(),
            data_root: None,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            ready_timeout: Self::DEFAULT_READY_TIMEOUT,
            require_nonce: false,
            terminate_grace: Self::DEFAULT_TERMINATE_GRACE,
        }
    }
}

/// The per-user application data directory (`%APPDATA%` on Windows), or the
/// home directory when the platform has none.
pub fn user_data_root() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn non_empty_var(var: &str) -> Option<String> {
    env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn millis_var(var: &'static str) -> Result<Option<Duration>, ConfigError> {
    let Some(raw) = non_empty_var(var) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<u64>()
        .map(|ms| Some(Duration::from_millis(ms)))
        .map_err(|_| ConfigError::InvalidMillis { var, value: raw })
}
