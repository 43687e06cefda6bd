//! `floodtwin status` command: show the coordination directory and where the
//! companion would be launched from.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

use floodtwin_core::exchange::{CoordinationStatus, CredentialExchange};

use crate::config::FloodtwinConfig;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub coordination: CoordinationStatus,
    pub executable: PathBuf,
    pub packaged: bool,
    pub candidates: Vec<Candidate>,
    /// First candidate that exists, i.e. what `launch` would spawn.
    pub resolved: Option<PathBuf>,
    pub poll_interval_ms: u64,
    pub ready_timeout_ms: u64,
    pub require_nonce: bool,
}

#[derive(Debug, Serialize)]
pub struct Candidate {
    pub path: PathBuf,
    pub exists: bool,
}

impl StatusReport {
    /// Whether handshake files are sitting on disk. Outside a running
    /// handshake this means a host died before it could clean up.
    pub fn has_leftovers(&self) -> bool {
        self.coordination.auth_token_present || self.coordination.ready_signal_present
    }
}

pub fn build_report(config: &FloodtwinConfig) -> StatusReport {
    let exchange = CredentialExchange::from_config(&config.handshake);
    let candidates = config
        .locator
        .candidates(&config.executable)
        .into_iter()
        .map(|path| Candidate {
            exists: path.is_file(),
            path,
        })
        .collect();

    StatusReport {
        coordination: exchange.status(),
        executable: config.executable.clone(),
        packaged: config.locator.is_packaged(),
        candidates,
        resolved: config.locator.resolve(&config.executable),
        poll_interval_ms: millis(config.handshake.poll_interval),
        ready_timeout_ms: millis(config.handshake.ready_timeout),
        require_nonce: config.handshake.require_nonce,
    }
}

/// Run the status command.
pub fn run_status(config: &FloodtwinConfig, json: bool) -> Result<()> {
    let report = build_report(config);

    if json {
        let out = serde_json::to_string_pretty(&report).context("failed to serialize status")?;
        println!("{out}");
        return Ok(());
    }

    let coord = &report.coordination;
    println!("Coordination dir: {}", coord.dir.display());
    println!("  exists: {}", yes_no(coord.dir_exists));
    println!("  auth token: {}", present(coord.auth_token_present));
    println!("  ready marker: {}", present(coord.ready_signal_present));
    println!();

    println!("Companion: {}", report.executable.display());
    println!("  packaged: {}", yes_no(report.packaged));
    for candidate in &report.candidates {
        let mark = if candidate.exists { "found" } else { "missing" };
        println!("  {:<8} {}", mark, candidate.path.display());
    }
    println!();

    println!(
        "Handshake: poll every {} ms, give up after {} ms, nonce {}",
        report.poll_interval_ms,
        report.ready_timeout_ms,
        if report.require_nonce { "required" } else { "off" }
    );

    if report.has_leftovers() {
        println!();
        println!("Handshake files are present but no launch is in progress here.");
        println!("If no other host is running, remove them with `floodtwin clear`.");
    }

    Ok(())
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn yes_no(b: bool) -> &'static str {
    if b { "yes" } else { "no" }
}

fn present(b: bool) -> &'static str {
    if b { "present" } else { "absent" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use floodtwin_test_utils::{COMPANION_RELATIVE_PATH, CompanionSandbox};

    fn config_for(sandbox: &CompanionSandbox, executable: &str) -> FloodtwinConfig {
        FloodtwinConfig {
            handshake: sandbox.config(),
            executable: PathBuf::from(executable),
            locator: sandbox.locator(),
        }
    }

    #[test]
    fn report_finds_installed_companion() {
        let sandbox = CompanionSandbox::fast();
        let report = build_report(&config_for(&sandbox, COMPANION_RELATIVE_PATH));

        assert_eq!(report.resolved, Some(sandbox.executable()));
        assert_eq!(report.candidates.len(), 1);
        assert!(report.candidates[0].exists);
        assert!(!report.coordination.dir_exists);
        assert!(!report.has_leftovers());
        assert_eq!(report.poll_interval_ms, 20);
    }

    #[test]
    fn report_flags_leftover_files() {
        let sandbox = CompanionSandbox::fast();
        sandbox.signal_ready();

        let report = build_report(&config_for(&sandbox, "missing.exe"));

        assert!(report.has_leftovers());
        assert!(report.coordination.ready_signal_present);
        assert_eq!(report.resolved, None);
    }

    #[test]
    fn report_serializes_to_json() {
        let sandbox = CompanionSandbox::fast();
        let report = build_report(&config_for(&sandbox, COMPANION_RELATIVE_PATH));

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["coordination"]["auth_token_present"], false);
        assert_eq!(value["require_nonce"], false);
        assert!(value["candidates"].is_array());
    }
}
