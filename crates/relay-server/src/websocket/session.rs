//! WebSocket session lifecycle — bridges one upgraded socket to the hub,
//! from join through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use relay_core::{ConnectionId, RelayError};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::connection::{ClientConnection, CloseReason, Payload};
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use super::hub::Hub;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};

/// Shortest heartbeat interval a session runs with.
pub const MIN_HEARTBEAT_INTERVAL: Duration =
    Duration::from_millis(relay_settings::MIN_HEARTBEAT_INTERVAL_MS);

/// Per-connection settings handed to every session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Outbound queue capacity.
    pub queue_capacity: usize,
    /// Interval between server Ping frames.
    pub heartbeat_interval: Duration,
    /// Close after this long without a Pong.
    pub heartbeat_timeout: Duration,
}

impl SessionConfig {
    /// Clamp the heartbeat to a usable range.
    ///
    /// The interval is at least [`MIN_HEARTBEAT_INTERVAL`] and the timeout is
    /// never shorter than the interval.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        self.heartbeat_interval = self.heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL);
        self.heartbeat_timeout = self.heartbeat_timeout.max(self.heartbeat_interval);
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
        }
    }
}

/// Run a WebSocket session for a connected client.
///
/// 1. Creates the connection and joins it to the hub
/// 2. Spawns the writer (queue → socket, periodic Ping) and the heartbeat
/// 3. Reads inbound frames, handing text to [`Hub::broadcast`]
/// 4. On the first failure from either side, cancels both loops, waits for
///    them, and leaves the hub exactly once
#[instrument(skip_all, fields(conn_id = %conn_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    conn_id: ConnectionId,
    hub: Hub,
    config: SessionConfig,
) {
    let config = config.clamped();
    let (ws_tx, ws_rx) = ws.split();
    let (connection, outbound) = ClientConnection::with_queue(conn_id.clone(), config.queue_capacity);
    let connection = Arc::new(connection);

    if let Err(e) = hub.join(connection.clone()).await {
        warn!(error = %e, "hub unavailable, dropping connection");
        connection.mark_closed();
        return;
    }

    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let writer = tokio::spawn(write_loop(
        ws_tx,
        outbound,
        connection.clone(),
        config.heartbeat_interval,
    ));

    let hb_conn = connection.clone();
    let (interval, timeout) = (config.heartbeat_interval, config.heartbeat_timeout);
    let heartbeat = tokio::spawn(async move {
        if run_heartbeat(hb_conn.clone(), interval, timeout).await == HeartbeatResult::TimedOut {
            warn!(
                conn_id = %hb_conn.id,
                silent_for = ?hb_conn.last_pong_elapsed(),
                "client unresponsive, disconnecting"
            );
            let _ = hb_conn.close(CloseReason::HeartbeatTimeout);
        }
    });

    read_loop(ws_rx, &connection, &hub).await;

    // Whichever side failed first has already cancelled the other; make sure
    // of it, then wait for both before leaving.
    let _ = connection.close(CloseReason::Left);
    let _ = writer.await;
    let _ = heartbeat.await;
    hub.leave(&conn_id).await;
    connection.mark_closed();

    let reason = connection
        .close_reason()
        .map_or("unknown", CloseReason::as_str);
    info!(
        reason,
        dropped = connection.drop_count(),
        "client disconnected"
    );
    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
}

/// Reader half: inbound frames → hub.
///
/// Returns once the connection is closing, recording why when the reader
/// itself is the cause.
async fn read_loop(
    mut ws_rx: SplitStream<WebSocket>,
    connection: &ClientConnection,
    hub: &Hub,
) {
    loop {
        let frame = tokio::select! {
            () = connection.cancelled() => return,
            frame = ws_rx.next() => frame,
        };

        if matches!(frame, Some(Ok(_))) {
            connection.mark_alive();
        }

        match frame {
            Some(Ok(Message::Text(text))) => {
                let payload: Payload = Arc::from(text.as_str());
                if let Err(e) = hub.broadcast(Some(&connection.id), payload).await {
                    debug!(error = %e, "broadcast rejected");
                    let _ = connection.close(CloseReason::Shutdown);
                    return;
                }
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) | None => {
                debug!("client closed stream");
                let _ = connection.close(CloseReason::PeerClosed);
                return;
            }
            Some(Ok(Message::Binary(data))) => {
                info!(len = data.len(), "non-text frame received, closing");
                let _ = connection.close(CloseReason::UnsupportedFrame);
                return;
            }
            Some(Err(e)) => {
                let err = RelayError::StreamRead(e.to_string());
                debug!(error = %err, "read failed");
                let _ = connection.close(CloseReason::ReadFailed);
                return;
            }
        }
    }
}

/// Writer half: queue → socket, plus periodic Ping frames.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Payload>,
    connection: Arc<ClientConnection>,
    ping_every: Duration,
) {
    let mut ping_interval = tokio::time::interval(ping_every);
    // Skip the immediate first tick
    let _ = ping_interval.tick().await;

    loop {
        let frame = tokio::select! {
            () = connection.cancelled() => break,
            msg = outbound.recv() => match msg {
                Some(payload) => Message::Text(payload.to_string().into()),
                None => break,
            },
            _ = ping_interval.tick() => Message::Ping(Vec::new().into()),
        };

        if let Err(e) = ws_tx.send(frame).await {
            let err = RelayError::StreamWrite(e.to_string());
            debug!(error = %err, "write failed");
            let _ = connection.close(CloseReason::WriteFailed);
            break;
        }
    }

    // Dropping the receiver releases anything still queued.
    drop(outbound);
    let _ = ws_tx.close().await;
}
