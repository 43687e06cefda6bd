//! `floodtwin clear` command: remove handshake files left behind by a host
//! that exited mid-handshake.

use anyhow::{Result, bail};

use floodtwin_core::config::HandshakeConfig;
use floodtwin_core::exchange::CredentialExchange;

/// Run the clear command.
pub fn run_clear(config: &HandshakeConfig) -> Result<()> {
    let exchange = CredentialExchange::from_config(config);
    let report = exchange.clear();

    match report.removed {
        0 => println!("Nothing to clear in {}", exchange.dir().display()),
        n => println!("Removed {n} handshake file(s) from {}", exchange.dir().display()),
    }

    if report.failed > 0 {
        bail!(
            "{} handshake file(s) in {} could not be removed",
            report.failed,
            exchange.dir().display()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use floodtwin_test_utils::CompanionSandbox;

    #[test]
    fn clear_removes_leftovers() {
        let sandbox = CompanionSandbox::fast();
        std::fs::create_dir_all(sandbox.coordination_dir()).unwrap();
        std::fs::write(sandbox.token_path(), "AUTHORIZED").unwrap();
        sandbox.signal_ready();

        run_clear(&sandbox.config()).unwrap();

        assert!(sandbox.handshake_files_absent());
        assert!(sandbox.coordination_dir().is_dir());
    }

    #[test]
    fn clear_on_missing_directory_is_fine() {
        let sandbox = CompanionSandbox::fast();
        run_clear(&sandbox.config()).unwrap();
        assert!(!sandbox.coordination_dir().exists());
    }
}
