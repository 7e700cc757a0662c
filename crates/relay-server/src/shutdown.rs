//! Server-wide stop signal.
//!
//! One token is observed by the listener's graceful shutdown and by the hub
//! actor. The hub closes every member as it stops, which in turn ends each
//! session's reader, writer and heartbeat.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long [`ShutdownCoordinator::drain`] waits by default.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// How the server task ended during [`ShutdownCoordinator::drain`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Listener and hub stopped on their own.
    Drained,
    /// The deadline passed and the task was aborted.
    Aborted,
}

/// Owner of the server-wide cancellation token.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a coordinator that has not fired yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token handed to the listener and the hub.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Fire the stop signal. Later calls are no-ops.
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            info!("shutdown requested");
            self.token.cancel();
        }
    }

    /// Whether the stop signal has fired.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fire the stop signal and wait for the server task returned by
    /// `RelayServer::listen`, aborting it after `timeout`
    /// (default [`DRAIN_TIMEOUT`]).
    pub async fn drain(&self, server: JoinHandle<()>, timeout: Option<Duration>) -> DrainOutcome {
        let timeout = timeout.unwrap_or(DRAIN_TIMEOUT);
        self.shutdown();

        let abort = server.abort_handle();
        match tokio::time::timeout(timeout, server).await {
            Ok(Ok(())) => DrainOutcome::Drained,
            Ok(Err(e)) => {
                warn!(error = %e, "server task failed while draining");
                DrainOutcome::Drained
            }
            Err(_) => {
                warn!(?timeout, "server did not stop in time, aborting");
                abort.abort();
                DrainOutcome::Aborted
            }
        }
    }
}
