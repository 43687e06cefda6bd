mod clear_cmd;
mod config;
mod launch_cmd;
mod status_cmd;
#[cfg(test)]
mod test_util;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use floodtwin_core::launch::DEFAULT_COMPANION_PATH;

use config::FloodtwinConfig;

#[derive(Parser)]
#[command(
    name = "floodtwin",
    about = "Launch the flood Digital Twin companion and run its readiness handshake"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a floodtwin config file with the default settings
    Init {
        /// Companion executable to record in the config file
        #[arg(long)]
        executable: Option<PathBuf>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Launch the companion and wait for its ready signal
    Launch {
        /// Companion executable (overrides FLOODTWIN_COMPANION_EXE and the config file)
        #[arg(long)]
        executable: Option<PathBuf>,
        /// Return once the handshake resolves, leaving the companion running
        #[arg(long)]
        detach: bool,
    },
    /// Show the coordination directory and companion resolution
    Status {
        /// Companion executable to check
        #[arg(long)]
        executable: Option<PathBuf>,
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove handshake files left behind by a crashed host
    Clear,
}

/// Execute the `floodtwin init` command: write config file.
fn cmd_init(executable: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let executable = executable.unwrap_or_else(|| PathBuf::from(DEFAULT_COMPANION_PATH));
    let cfg = config::ConfigFile {
        companion: config::CompanionSection {
            executable: Some(executable.clone()),
            resource_dir: None,
        },
        handshake: config::HandshakeSection::defaults(),
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  companion.executable = {}", executable.display());
    if let Some(ref app_dir) = cfg.handshake.app_dir {
        println!("  handshake.app_dir = {app_dir}");
    }
    println!();
    println!("Next: run `floodtwin status` to check that the companion can be found.");

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { executable, force } => {
            cmd_init(executable, force)?;
        }
        Commands::Launch { executable, detach } => {
            let resolved = FloodtwinConfig::resolve(executable.as_deref())?;
            launch_cmd::run_launch(resolved, detach).await?;
        }
        Commands::Status { executable, json } => {
            let resolved = FloodtwinConfig::resolve(executable.as_deref())?;
            status_cmd::run_status(&resolved, json)?;
        }
        Commands::Clear => {
            let resolved = FloodtwinConfig::resolve(None)?;
            clear_cmd::run_clear(&resolved.handshake)?;
        }
    }

    Ok(())
}
