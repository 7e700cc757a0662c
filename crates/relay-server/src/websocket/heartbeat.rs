//! Heartbeat ping/pong liveness monitoring.
//!
//! The writer loop sends the Ping frames; this loop only watches for the
//! Pongs (recorded by the reader via [`ClientConnection::mark_alive`]).

use std::sync::Arc;
use std::time::Duration;

use tokio::time;

use super::connection::ClientConnection;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The client stopped responding within the timeout window.
    TimedOut,
    /// The connection started closing for another reason.
    Cancelled,
}

/// Number of consecutive missed checks tolerated before timing out.
///
/// `timeout / interval`, clamped to at least 1.
pub fn max_missed(interval: Duration, timeout: Duration) -> u32 {
    let interval_ms = interval.as_millis().max(1);
    let missed = (timeout.as_millis() / interval_ms).max(1);
    u32::try_from(missed).unwrap_or(u32::MAX)
}

/// Run heartbeat checks for a connection until it times out or closes.
///
/// The writer sends a Ping every `interval`, starting one interval in. Checks
/// run half an interval after each Ping, so the Pong for that Ping has time
/// to arrive. A check with no inbound frame since the previous one counts as
/// a miss; any frame resets the count.
pub async fn run_heartbeat(
    connection: Arc<ClientConnection>,
    interval: Duration,
    timeout: Duration,
) -> HeartbeatResult {
    let first_check = time::Instant::now() + interval + interval / 2;
    let mut check_interval = time::interval_at(first_check, interval);
    let limit = max_missed(interval, timeout);
    let mut missed_pongs: u32 = 0;
    // Activity before the first Ping does not count towards it.
    let _ = connection.check_alive();

    loop {
        tokio::select! {
            _ = check_interval.tick() => {
                if connection.check_alive() {
                    missed_pongs = 0;
                } else {
                    missed_pongs += 1;
                    if missed_pongs >= limit {
                        return HeartbeatResult::TimedOut;
                    }
                }
            }
            () = connection.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}
