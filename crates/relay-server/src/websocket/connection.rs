//! WebSocket client connection state.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use relay_core::ConnectionId;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// An outbound text payload, shared across every recipient of a broadcast.
pub type Payload = Arc<str>;

/// Lifecycle of a joined connection.
///
/// `Connecting` is not represented: a [`ClientConnection`] only exists once
/// the upgrade has succeeded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Joined and eligible for broadcast.
    Active,
    /// Teardown has started; no further enqueue succeeds.
    Closing,
    /// Both loops have stopped and the hub no longer knows this connection.
    Closed,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Active,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Active => 0,
            Self::Closing => 1,
            Self::Closed => 2,
        }
    }
}

/// Why a connection started closing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer sent a Close frame or ended the stream.
    PeerClosed,
    /// Reading from the socket failed.
    ReadFailed,
    /// Writing to the socket failed.
    WriteFailed,
    /// The peer sent a non-text data frame.
    UnsupportedFrame,
    /// The hub evicted the connection because its queue was full.
    Evicted,
    /// No Pong arrived within the heartbeat timeout.
    HeartbeatTimeout,
    /// The hub removed the connection on request.
    Left,
    /// The server is shutting down.
    Shutdown,
}

impl CloseReason {
    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::ReadFailed => "read_failed",
            Self::WriteFailed => "write_failed",
            Self::UnsupportedFrame => "unsupported_frame",
            Self::Evicted => "evicted",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::Left => "left",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a non-blocking enqueue attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The message is on the outbound queue.
    Queued,
    /// The queue is at capacity; the recipient cannot keep up.
    Full,
    /// The connection is closing or its writer is gone.
    Closed,
}

impl EnqueueOutcome {
    /// Whether the hub should evict the recipient.
    pub fn requires_eviction(self) -> bool {
        !matches!(self, Self::Queued)
    }
}

/// Represents a connected WebSocket client.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Send half of the outbound queue, drained by the writer task.
    tx: mpsc::Sender<Payload>,
    /// Encoded [`ConnectionState`].
    state: AtomicU8,
    /// First reason recorded by [`close`](Self::close).
    close_reason: Mutex<Option<CloseReason>>,
    /// Cancels the reader, writer and heartbeat together.
    cancel: CancellationToken,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the client has responded to the last ping.
    pub is_alive: AtomicBool,
    /// When the last Pong (or any activity) was received.
    last_pong: Mutex<Instant>,
    /// Count of messages dropped due to a full queue.
    pub dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection around an existing queue sender.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Payload>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            state: AtomicU8::new(ConnectionState::Active.as_u8()),
            close_reason: Mutex::new(None),
            cancel: CancellationToken::new(),
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Create a connection with a fresh outbound queue of `capacity` slots.
    ///
    /// Returns the receiver the writer task drains.
    pub fn with_queue(id: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(id, tx), rx)
    }

    /// Try to place a message on the outbound queue without waiting.
    pub fn enqueue(&self, message: Payload) -> EnqueueOutcome {
        if !self.is_active() {
            return EnqueueOutcome::Closed;
        }
        match self.tx.try_send(message) {
            Ok(()) => EnqueueOutcome::Queued,
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                EnqueueOutcome::Full
            }
            Err(TrySendError::Closed(_)) => EnqueueOutcome::Closed,
        }
    }

    /// Capacity of the outbound queue.
    pub fn queue_capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether broadcasts may still target this connection.
    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    /// Begin teardown: move to `Closing` and cancel both I/O loops.
    ///
    /// Idempotent. Returns `true` only for the call that performed the
    /// transition; later callers see `false` and the first reason is kept.
    pub fn close(&self, reason: CloseReason) -> bool {
        let first = self
            .state
            .compare_exchange(
                ConnectionState::Active.as_u8(),
                ConnectionState::Closing.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if first {
            *self.close_reason.lock() = Some(reason);
        }
        self.cancel.cancel();
        first
    }

    /// Mark the connection terminal once cleanup has finished.
    pub fn mark_closed(&self) {
        let _ = self.close(CloseReason::Left);
        self.state
            .store(ConnectionState::Closed.as_u8(), Ordering::Release);
    }

    /// The reason recorded by the first [`close`](Self::close) call.
    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.lock()
    }

    /// Resolves once the connection has started closing.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Whether teardown has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (pong received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("dropped_messages", &self.drop_count())
            .finish_non_exhaustive()
    }
}
