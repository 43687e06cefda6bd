//! Companion executable resolution.
//!
//! The companion ships next to the host in one of two layouts:
//!
//! - **unpacked**: relative to the host's installation directory;
//! - **packaged**: a single-file bundle that extracts its resources to a
//!   temporary base directory at runtime, announced through
//!   `FLOODTWIN_RESOURCE_DIR`.
//!
//! Relative paths try the packaged base first (when packaged), then the
//! installation directory. Absolute paths are taken as-is.

use std::env;
use std::path::{Path, PathBuf};

/// Default location of the companion, relative to the resource base.
pub const DEFAULT_COMPANION_PATH: &str =
    "ZarragaFloodMonitoringAndSimulation/Zarraga Flood Simulation.exe";

/// Resolves a companion path against the host's resource layouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableLocator {
    packaged_base: Option<PathBuf>,
    install_dir: PathBuf,
}

impl ExecutableLocator {
    /// Set by the packaged bundle's bootstrap to the extraction directory.
    pub const RESOURCE_DIR_ENV: &str = "FLOODTWIN_RESOURCE_DIR";

    /// Locator for an unpacked layout rooted at `install_dir`.
    pub fn new(install_dir: impl Into<PathBuf>) -> Self {
        Self {
            packaged_base: None,
            install_dir: install_dir.into(),
        }
    }

    /// Mark the host as packaged, with resources extracted under `base`.
    pub fn with_packaged_base(mut self, base: Option<PathBuf>) -> Self {
        self.packaged_base = base;
        self
    }

    /// Locator for the running host: packaged base from
    /// `FLOODTWIN_RESOURCE_DIR`, installation directory from the host
    /// executable's own location.
    pub fn from_env() -> Self {
        let packaged_base = env::var_os(Self::RESOURCE_DIR_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        Self::new(host_install_dir()).with_packaged_base(packaged_base)
    }

    pub fn is_packaged(&self) -> bool {
        self.packaged_base.is_some()
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    pub fn packaged_base(&self) -> Option<&Path> {
        self.packaged_base.as_deref()
    }

    /// Every path `resolve` would try for `executable`, in order.
    pub fn candidates(&self, executable: &Path) -> Vec<PathBuf> {
        if executable.is_absolute() {
            return vec![executable.to_path_buf()];
        }
        self.packaged_base
            .iter()
            .chain(std::iter::once(&self.install_dir))
            .map(|base| base.join(executable))
            .collect()
    }

    /// The first candidate that is an existing file.
    pub fn resolve(&self, executable: &Path) -> Option<PathBuf> {
        self.candidates(executable)
            .into_iter()
            .find(|candidate| candidate.is_file())
    }
}

impl Default for ExecutableLocator {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Directory containing the running host binary, falling back to the
/// current directory.
fn host_install_dir() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .or_else(|| env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    #[test]
    fn unpacked_layout_uses_install_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        let exe = tmp.path().join("app").join(DEFAULT_COMPANION_PATH);
        touch(&exe);

        let locator = ExecutableLocator::new(tmp.path().join("app"));
        assert!(!locator.is_packaged());
        assert_eq!(locator.resolve(Path::new(DEFAULT_COMPANION_PATH)), Some(exe));
    }

    #[test]
    fn packaged_base_is_tried_first() {
        let tmp = tempfile::TempDir::new().unwrap();
        let packaged = tmp.path().join("_MEI1234").join("companion.exe");
        let installed = tmp.path().join("app").join("companion.exe");
        touch(&packaged);
        touch(&installed);

        let locator = ExecutableLocator::new(tmp.path().join("app"))
            .with_packaged_base(Some(tmp.path().join("_MEI1234")));

        assert_eq!(locator.resolve(Path::new("companion.exe")), Some(packaged));
    }

    #[test]
    fn packaged_falls_back_to_install_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        let installed = tmp.path().join("app").join("companion.exe");
        touch(&installed);

        let locator = ExecutableLocator::new(tmp.path().join("app"))
            .with_packaged_base(Some(tmp.path().join("_MEI1234")));

        assert_eq!(
            locator.candidates(Path::new("companion.exe")),
            vec![
                tmp.path().join("_MEI1234").join("companion.exe"),
                tmp.path().join("app").join("companion.exe"),
            ]
        );
        assert_eq!(locator.resolve(Path::new("companion.exe")), Some(installed));
    }

    #[test]
    fn absolute_path_is_used_verbatim() {
        let tmp = tempfile::TempDir::new().unwrap();
        let exe = tmp.path().join("elsewhere").join("companion.exe");
        touch(&exe);

        let locator = ExecutableLocator::new("/nonexistent-install-dir")
            .with_packaged_base(Some(PathBuf::from("/nonexistent-bundle")));

        assert_eq!(locator.candidates(&exe), vec![exe.clone()]);
        assert_eq!(locator.resolve(&exe), Some(exe));
    }

    #[test]
    fn directories_do_not_count_as_executables() {
        let tmp = tempfile::TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("companion.exe")).unwrap();

        let locator = ExecutableLocator::new(tmp.path());
        assert_eq!(locator.resolve(Path::new("companion.exe")), None);
    }

    #[test]
    fn from_env_reads_resource_dir() {
        let _lock = crate::test_util::lock_env();

        unsafe { env::set_var(ExecutableLocator::RESOURCE_DIR_ENV, "/tmp/_MEI42") };
        let packaged = ExecutableLocator::from_env();
        unsafe { env::set_var(ExecutableLocator::RESOURCE_DIR_ENV, "") };
        let empty = ExecutableLocator::from_env();
        unsafe { env::remove_var(ExecutableLocator::RESOURCE_DIR_ENV) };

        assert_eq!(packaged.packaged_base(), Some(Path::new("/tmp/_MEI42")));
        assert!(!empty.is_packaged());
        assert!(packaged.install_dir().is_absolute());
    }

    #[test]
    fn missing_executable_resolves_to_none() {
        let tmp = tempfile::TempDir::new().unwrap();
        let locator = ExecutableLocator::new(tmp.path());
        assert_eq!(locator.resolve(Path::new(DEFAULT_COMPANION_PATH)), None);
    }
}
