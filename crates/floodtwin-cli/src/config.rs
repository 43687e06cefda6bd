//! Configuration file management for floodtwin.
//!
//! Provides a TOML-based config file at `~/.config/floodtwin/config.toml` and
//! a resolution chain: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use floodtwin_core::config::HandshakeConfig;
use floodtwin_core::launch::{DEFAULT_COMPANION_PATH, ExecutableLocator};

/// Overrides the companion executable path.
pub const COMPANION_EXE_ENV: &str = "FLOODTWIN_COMPANION_EXE";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub companion: CompanionSection,
    #[serde(default)]
    pub handshake: HandshakeSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CompanionSection {
    /// Companion path; relative paths resolve against the resource base.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<PathBuf>,
    /// Packaged resource base, used when `FLOODTWIN_RESOURCE_DIR` is unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct HandshakeSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_root: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_nonce: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminate_grace_ms: Option<u64>,
}

impl HandshakeSection {
    /// A section spelling out the compiled-in defaults, for `floodtwin init`.
    pub fn defaults() -> Self {
        let cfg = HandshakeConfig::default();
        Self {
            app_dir: Some(cfg.app_dir_name),
            data_root: None,
            poll_interval_ms: Some(millis(cfg.poll_interval)),
            ready_timeout_ms: Some(millis(cfg.ready_timeout)),
            require_nonce: Some(cfg.require_nonce),
            terminate_grace_ms: Some(millis(cfg.terminate_grace)),
        }
    }

    /// Lay the values present in this section over `base`.
    fn apply(&self, mut base: HandshakeConfig) -> HandshakeConfig {
        if let Some(ref name) = self.app_dir {
            base.app_dir_name = name.clone();
        }
        if let Some(ref root) = self.data_root {
            base.data_root = Some(root.clone());
        }
        if let Some(ms) = self.poll_interval_ms {
            base.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.ready_timeout_ms {
            base.ready_timeout = Duration::from_millis(ms);
        }
        if let Some(nonce) = self.require_nonce {
            base.require_nonce = nonce;
        }
        if let Some(ms) = self.terminate_grace_ms {
            base.terminate_grace = Duration::from_millis(ms);
        }
        base
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the floodtwin config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/floodtwin` or
/// `~/.config/floodtwin`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("floodtwin");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("floodtwin")
}

/// Return the path to the floodtwin config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file at `path`.
pub fn load_config_from(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))
}

/// Load the config file if there is one. A file that exists but cannot be
/// parsed is an error.
pub fn load_config() -> Result<Option<ConfigFile>> {
    let path = config_path();
    if !path.exists() {
        return Ok(None);
    }
    load_config_from(&path).map(Some)
}

/// Serialize and write the config file to `path`, creating parent dirs as
/// needed. Sets file permissions to 0600 on Unix.
pub fn save_config_to(config: &ConfigFile, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

pub fn save_config(config: &ConfigFile) -> Result<()> {
    save_config_to(config, &config_path())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct FloodtwinConfig {
    pub handshake: HandshakeConfig,
    /// Companion path as configured, before locator resolution.
    pub executable: PathBuf,
    pub locator: ExecutableLocator,
}

impl FloodtwinConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    pub fn resolve(cli_executable: Option<&Path>) -> Result<Self> {
        let file_config = load_config()?;
        Self::resolve_with(cli_executable, file_config.as_ref())
    }

    /// [`resolve`](Self::resolve) against an already loaded config file.
    ///
    /// - Executable: `cli_executable` > `FLOODTWIN_COMPANION_EXE` >
    ///   `companion.executable` > [`DEFAULT_COMPANION_PATH`]
    /// - Resource base: `FLOODTWIN_RESOURCE_DIR` > `companion.resource_dir` > none
    /// - Handshake: `FLOODTWIN_*` env > `[handshake]` > compiled-in defaults
    pub fn resolve_with(
        cli_executable: Option<&Path>,
        file_config: Option<&ConfigFile>,
    ) -> Result<Self> {
        let executable = if let Some(path) = cli_executable {
            path.to_path_buf()
        } else if let Some(path) = std::env::var_os(COMPANION_EXE_ENV).filter(|v| !v.is_empty()) {
            PathBuf::from(path)
        } else if let Some(path) = file_config.and_then(|c| c.companion.executable.clone()) {
            path
        } else {
            PathBuf::from(DEFAULT_COMPANION_PATH)
        };

        let mut locator = ExecutableLocator::from_env();
        if !locator.is_packaged() {
            let file_base = file_config.and_then(|c| c.companion.resource_dir.clone());
            locator = locator.with_packaged_base(file_base);
        }

        let base = match file_config {
            Some(cfg) => cfg.handshake.apply(HandshakeConfig::default()),
            None => HandshakeConfig::default(),
        };
        let handshake = base
            .apply_env()
            .context("invalid handshake settings in environment or config file")?;

        Ok(Self {
            handshake,
            executable,
            locator,
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
