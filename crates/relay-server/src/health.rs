//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while the hub answers, `"degraded"` otherwise.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Current hub membership.
    pub connections: usize,
}

/// Build a health response from the hub's member count.
///
/// `None` means the hub did not answer (it has stopped).
pub fn health_check(start_time: Instant, connections: Option<usize>) -> HealthResponse {
    HealthResponse {
        status: if connections.is_some() { "ok" } else { "degraded" }.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections: connections.unwrap_or(0),
    }
}
