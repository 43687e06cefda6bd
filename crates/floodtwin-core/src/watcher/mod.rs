//! Readiness watcher: polls for the companion's ready marker in the
//! background and always finishes by clearing the handshake files.
//!
//! The watcher never reports failure to the user. A timeout is silent; the
//! only externally visible effects are the cleanup and the
//! [`HandshakeEvent`] the coordinator broadcasts for callers that care.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::HandshakeConfig;
use crate::exchange::{CredentialExchange, Session};

/// How a handshake ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeOutcome {
    /// The companion created its ready marker.
    Ready,
    /// The readiness window elapsed without a marker.
    TimedOut,
    /// The host shut down before either of the above.
    Cancelled,
}

/// Completion notice for one handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandshakeEvent {
    pub launch_id: Uuid,
    pub pid: u32,
    pub outcome: HandshakeOutcome,
    pub elapsed: Duration,
    pub finished_at: DateTime<Utc>,
}

/// One handshake's background poll loop.
#[derive(Debug)]
pub struct ReadinessWatcher {
    exchange: Arc<CredentialExchange>,
    session: Session,
    poll_interval: Duration,
    max_polls: u32,
    ready_timeout: Duration,
    cancel: CancellationToken,
    launch_id: Uuid,
}

impl ReadinessWatcher {
    pub fn new(
        exchange: Arc<CredentialExchange>,
        session: Session,
        config: &HandshakeConfig,
        cancel: CancellationToken,
        launch_id: Uuid,
    ) -> Self {
        Self {
            exchange,
            session,
            poll_interval: config.poll_interval,
            max_polls: config.max_polls(),
            ready_timeout: config.ready_timeout,
            cancel,
            launch_id,
        }
    }

    /// Poll until ready, timed out, or cancelled, then clear the handshake
    /// files. Cleanup runs on every path.
    pub async fn run(self) -> HandshakeOutcome {
        let started = Instant::now();
        let outcome = self.poll().await;
        let elapsed = started.elapsed();

        match self.exchange.clear_session(&self.session) {
            Some(report) if report.failed > 0 => warn!(
                launch_id = %self.launch_id,
                removed = report.removed,
                failed = report.failed,
                "handshake cleanup left files behind"
            ),
            Some(report) => debug!(
                launch_id = %self.launch_id,
                removed = report.removed,
                "handshake files cleared"
            ),
            None => debug!(
                launch_id = %self.launch_id,
                "newer handshake staged; leaving its files alone"
            ),
        }

        match outcome {
            HandshakeOutcome::Ready => info!(
                launch_id = %self.launch_id,
                elapsed_ms = elapsed.as_millis() as u64,
                "companion reported ready"
            ),
            HandshakeOutcome::TimedOut => warn!(
                launch_id = %self.launch_id,
                elapsed_ms = elapsed.as_millis() as u64,
                "companion did not report ready in time"
            ),
            HandshakeOutcome::Cancelled => info!(
                launch_id = %self.launch_id,
                elapsed_ms = elapsed.as_millis() as u64,
                "readiness watch cancelled by host shutdown"
            ),
        }

        outcome
    }

    /// The last sleep is cut short so the window ends at `ready_timeout`
    /// even when it is not a multiple of the poll interval.
    async fn poll(&self) -> HandshakeOutcome {
        let deadline = Instant::now() + self.ready_timeout;
        for attempt in 0..self.max_polls {
            if self.cancel.is_cancelled() {
                return HandshakeOutcome::Cancelled;
            }
            if self.exchange.ready_observed(&self.session) {
                debug!(launch_id = %self.launch_id, attempt, "ready marker observed");
                return HandshakeOutcome::Ready;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return HandshakeOutcome::Cancelled,
                _ = tokio::time::sleep(self.poll_interval.min(remaining)) => {}
            }
        }
        HandshakeOutcome::TimedOut
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn setup() -> (tempfile::TempDir, Arc<CredentialExchange>, Session) {
        let tmp = tempfile::TempDir::new().unwrap();
        let exchange = Arc::new(CredentialExchange::new(tmp.path().join("coord")));
        let session = exchange.stage().unwrap();
        (tmp, exchange, session)
    }

    fn watcher(
        exchange: &Arc<CredentialExchange>,
        session: Session,
        config: &HandshakeConfig,
        cancel: CancellationToken,
    ) -> ReadinessWatcher {
        ReadinessWatcher::new(Arc::clone(exchange), session, config, cancel, Uuid::new_v4())
    }

    #[tokio::test(start_paused = true)]
    async fn ready_marker_already_present_returns_immediately() {
        let config = HandshakeConfig::default();
        let (_tmp, exchange, session) = setup();
        fs::write(exchange.ready_signal_path(), "").unwrap();

        let started = Instant::now();
        let outcome = watcher(&exchange, session, &config, CancellationToken::new())
            .run()
            .await;

        assert_eq!(outcome, HandshakeOutcome::Ready);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(!exchange.auth_token_path().exists());
        assert!(!exchange.ready_signal_path().exists());
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_after_configured_polls() {
        let config = HandshakeConfig {
            poll_interval: Duration::from_millis(50),
            ready_timeout: Duration::from_millis(500),
            ..HandshakeConfig::default()
        };
        let (_tmp, exchange, session) = setup();

        let started = Instant::now();
        let outcome = watcher(&exchange, session, &config, CancellationToken::new())
            .run()
            .await;

        assert_eq!(outcome, HandshakeOutcome::TimedOut);
        assert_eq!(started.elapsed(), Duration::from_millis(500));
        assert!(!exchange.auth_token_path().exists());
    }

    #[tokio::test(start_paused = true)]
    async fn window_never_exceeds_ready_timeout() {
        let config = HandshakeConfig {
            poll_interval: Duration::from_millis(300),
            ready_timeout: Duration::from_millis(1000),
            ..HandshakeConfig::default()
        };
        let (_tmp, exchange, session) = setup();

        let started = Instant::now();
        let outcome = watcher(&exchange, session, &config, CancellationToken::new())
            .run()
            .await;

        assert_eq!(outcome, HandshakeOutcome::TimedOut);
        assert_eq!(started.elapsed(), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_still_cleans_up() {
        let config = HandshakeConfig::default();
        let (_tmp, exchange, session) = setup();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(watcher(&exchange, session, &config, cancel.clone()).run());
        tokio::time::sleep(Duration::from_millis(250)).await;
        cancel.cancel();

        let outcome = task.await.unwrap();
        assert_eq!(outcome, HandshakeOutcome::Cancelled);
        assert!(!exchange.auth_token_path().exists());
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_session_leaves_new_token_in_place() {
        let config = HandshakeConfig {
            poll_interval: Duration::from_millis(10),
            ready_timeout: Duration::from_millis(30),
            ..HandshakeConfig::default()
        };
        let (_tmp, exchange, old_session) = setup();
        let _new_session = exchange.stage().unwrap();

        let outcome = watcher(&exchange, old_session, &config, CancellationToken::new())
            .run()
            .await;

        assert_eq!(outcome, HandshakeOutcome::TimedOut);
        assert!(exchange.auth_token_path().exists());
    }
}
