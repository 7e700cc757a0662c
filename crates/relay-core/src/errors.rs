//! Error taxonomy for the relay hub.
//!
//! Only [`RelayError::Bind`] is ever fatal, and only at startup. Every other
//! variant is scoped to a single connection or request: it is logged, turned
//! into a leave/evict or an HTTP error response, and the hub keeps running.

use thiserror::Error;

/// Errors raised by the hub, its connections and the HTTP surface.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The WebSocket upgrade negotiation failed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Reading from an established connection failed.
    #[error("stream read failed: {0}")]
    StreamRead(String),

    /// Writing to an established connection failed.
    #[error("stream write failed: {0}")]
    StreamWrite(String),

    /// A recipient's outbound queue was full at broadcast time.
    #[error("outbound queue full for {conn_id} (capacity {capacity})")]
    BackpressureOverflow {
        /// The recipient that could not keep up.
        conn_id: String,
        /// Capacity of its outbound queue.
        capacity: usize,
    },

    /// The home-page template could not be loaded.
    #[error("template error: {0}")]
    TemplateRender(String),

    /// The hub actor has stopped (server shutting down).
    #[error("hub is no longer running")]
    HubUnavailable,

    /// The listener could not bind its address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Result alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_display() {
        let err = RelayError::Handshake("missing upgrade header".into());
        assert_eq!(err.to_string(), "handshake failed: missing upgrade header");
    }

    #[test]
    fn backpressure_display_names_connection() {
        let err = RelayError::BackpressureOverflow {
            conn_id: "conn_1".into(),
            capacity: 64,
        };
        let msg = err.to_string();
        assert!(msg.contains("conn_1"));
        assert!(msg.contains("64"));
    }

    #[test]
    fn bind_error_keeps_source() {
        let err = RelayError::Bind {
            addr: "0.0.0.0:80".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("0.0.0.0:80"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
