//! `floodtwin launch` command: start the companion and host its session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use floodtwin_core::{
    HandshakeEvent, HandshakeOutcome, LaunchCoordinator, LifecycleGuard, Notification,
};

use crate::config::FloodtwinConfig;

/// How often the hosting loop checks whether the companion is still alive.
const CHILD_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Run the launch command.
///
/// Without `detach`, stays in the foreground until the companion exits or
/// the user presses Ctrl+C, then shuts the session down. With `detach`,
/// returns as soon as the handshake resolves and leaves the companion
/// running.
pub async fn run_launch(config: FloodtwinConfig, detach: bool) -> Result<()> {
    let shutdown = CancellationToken::new();
    let guard = Arc::new(LifecycleGuard::from_config(&config.handshake));
    let coordinator = LaunchCoordinator::new(config.handshake.clone(), guard)
        .with_locator(config.locator.clone())
        .with_shutdown_token(shutdown.clone());
    let mut events = coordinator.subscribe();

    let result = coordinator.launch(&config.executable);
    let notice = Notification::for_result(&result);
    let handle = match result {
        Ok(handle) => handle,
        Err(e) => return Err(anyhow::Error::new(e).context(notice.to_string())),
    };

    println!("{notice}");
    println!("  pid: {}", handle.pid);
    println!("  executable: {}", handle.executable.display());
    println!("  coordination dir: {}", coordinator.exchange().dir().display());

    // Set up graceful shutdown: first signal cancels, second force-exits.
    let cancel_clone = shutdown.clone();
    let got_first_signal = AtomicBool::new(false);

    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_signal.swap(true, Ordering::SeqCst) {
                eprintln!("\nForce exit.");
                std::process::exit(130);
            }
            eprintln!("\nShutting down gracefully (Ctrl+C again to force)...");
            cancel_clone.cancel();
        }
    });

    let mut handshake_pending = true;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv(), if handshake_pending => {
                handshake_pending = false;
                if let Ok(event) = event {
                    report_handshake(&event);
                }
                if detach {
                    println!("Detached; Digital Twin keeps running (pid {}).", handle.pid);
                    return Ok(());
                }
            }
            _ = tokio::time::sleep(CHILD_CHECK_INTERVAL) => {
                if !coordinator.guard().is_live() {
                    println!("Digital Twin exited.");
                    break;
                }
            }
        }
    }

    coordinator.shutdown().await;
    Ok(())
}

/// Only readiness is printed; a timeout is left to the log.
fn report_handshake(event: &HandshakeEvent) {
    debug!(
        launch_id = %event.launch_id,
        outcome = ?event.outcome,
        elapsed_ms = event.elapsed.as_millis() as u64,
        "handshake finished"
    );
    if event.outcome == HandshakeOutcome::Ready {
        println!(
            "Digital Twin reported ready after {} ms.",
            event.elapsed.as_millis()
        );
    }
}
