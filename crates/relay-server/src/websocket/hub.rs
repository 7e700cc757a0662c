//! Broadcast hub: the single owner of connection membership.
//!
//! All membership changes and every fan-out pass run inside one actor task,
//! one command at a time in arrival order. Connection tasks only ever talk to
//! the hub through its command channel, so the member map is never iterated
//! while something else mutates it.
//!
//! Fan-out never waits on a recipient. Each member gets a non-blocking
//! [`ClientConnection::enqueue`]; a member whose queue is full (or already
//! closing) is evicted within the same pass.

use std::collections::HashMap;
use std::sync::Arc;

use relay_core::{ConnectionId, RelayError, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::{ClientConnection, CloseReason, EnqueueOutcome, Payload};
use crate::metrics::{HUB_MESSAGES_TOTAL, WS_BROADCAST_DROPS_TOTAL};

/// Size of the hub's command channel.
const COMMAND_BUFFER_SIZE: usize = 1024;

/// Fan-out policy.
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Whether the originating connection receives its own message.
    pub echo_to_sender: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            echo_to_sender: true,
        }
    }
}

/// Outcome of one broadcast pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Members that got the message on their queue.
    pub delivered: usize,
    /// Members removed because they could not take the message.
    pub evicted: Vec<ConnectionId>,
}

enum HubCommand {
    Join {
        connection: Arc<ClientConnection>,
        reply: oneshot::Sender<()>,
    },
    Leave {
        id: ConnectionId,
    },
    Broadcast {
        origin: Option<ConnectionId>,
        message: Payload,
        reply: Option<oneshot::Sender<BroadcastReport>>,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
    Members {
        reply: oneshot::Sender<Vec<ConnectionId>>,
    },
}

/// Cloneable handle to the hub actor.
#[derive(Clone, Debug)]
pub struct Hub {
    tx: mpsc::Sender<HubCommand>,
}

impl Hub {
    /// Spawn the hub actor.
    ///
    /// The actor runs until `shutdown` is cancelled or every handle is
    /// dropped; on exit it closes all remaining members.
    pub fn spawn(config: HubConfig, shutdown: CancellationToken) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER_SIZE);
        let state = HubState::new(config);
        let handle = tokio::spawn(run(state, rx, shutdown));
        (Self { tx }, handle)
    }

    /// Add a connection to the membership set.
    ///
    /// Resolves once the actor has processed the join, so a connection is
    /// never left queued behind a hub that stopped.
    pub async fn join(&self, connection: Arc<ClientConnection>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Join { connection, reply }).await?;
        rx.await.map_err(|_| RelayError::HubUnavailable)
    }

    /// Remove a connection if present and close it.
    ///
    /// Idempotent. Leaving after shutdown is a no-op, since the hub has
    /// already closed every member.
    pub async fn leave(&self, id: &ConnectionId) {
        if self
            .send(HubCommand::Leave { id: id.clone() })
            .await
            .is_err()
        {
            debug!(conn_id = %id, "hub stopped before leave");
        }
    }

    /// Fan a message out to every member, fire-and-forget.
    ///
    /// `origin` identifies the sending connection for the echo policy.
    pub async fn broadcast(&self, origin: Option<&ConnectionId>, message: Payload) -> Result<()> {
        self.send(HubCommand::Broadcast {
            origin: origin.cloned(),
            message,
            reply: None,
        })
        .await
    }

    /// Fan a message out and wait for the pass to finish.
    pub async fn broadcast_with_report(
        &self,
        origin: Option<&ConnectionId>,
        message: Payload,
    ) -> Result<BroadcastReport> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Broadcast {
            origin: origin.cloned(),
            message,
            reply: Some(reply),
        })
        .await?;
        rx.await.map_err(|_| RelayError::HubUnavailable)
    }

    /// Number of current members.
    pub async fn connection_count(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Count { reply }).await?;
        rx.await.map_err(|_| RelayError::HubUnavailable)
    }

    /// Snapshot of current member IDs, in no particular order.
    pub async fn members(&self) -> Result<Vec<ConnectionId>> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Members { reply }).await?;
        rx.await.map_err(|_| RelayError::HubUnavailable)
    }

    async fn send(&self, command: HubCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| RelayError::HubUnavailable)
    }
}

/// Membership owned by the actor task.
struct HubState {
    members: HashMap<ConnectionId, Arc<ClientConnection>>,
    config: HubConfig,
}

impl HubState {
    fn new(config: HubConfig) -> Self {
        Self {
            members: HashMap::new(),
            config,
        }
    }

    fn apply(&mut self, command: HubCommand) {
        match command {
            HubCommand::Join { connection, reply } => {
                self.join(connection);
                let _ = reply.send(());
            }
            HubCommand::Leave { id } => {
                let _ = self.leave(&id);
            }
            HubCommand::Broadcast {
                origin,
                message,
                reply,
            } => {
                let report = self.broadcast(origin.as_ref(), &message);
                if let Some(reply) = reply {
                    let _ = reply.send(report);
                }
            }
            HubCommand::Count { reply } => {
                let _ = reply.send(self.members.len());
            }
            HubCommand::Members { reply } => {
                let _ = reply.send(self.members.keys().cloned().collect());
            }
        }
    }

    fn join(&mut self, connection: Arc<ClientConnection>) {
        if !connection.is_active() {
            debug!(conn_id = %connection.id, "ignoring join of closing connection");
            return;
        }
        if self.members.contains_key(&connection.id) {
            debug!(conn_id = %connection.id, "connection already joined");
            return;
        }
        let conn_id = connection.id.clone();
        let _ = self.members.insert(conn_id.clone(), connection);
        info!(conn_id = %conn_id, members = self.members.len(), "client joined");
    }

    fn leave(&mut self, id: &ConnectionId) -> bool {
        match self.members.remove(id) {
            Some(connection) => {
                let _ = connection.close(CloseReason::Left);
                info!(conn_id = %id, members = self.members.len(), "client left");
                true
            }
            None => false,
        }
    }

    fn broadcast(&mut self, origin: Option<&ConnectionId>, message: &Payload) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for (id, connection) in &self.members {
            if !self.config.echo_to_sender && origin == Some(id) {
                continue;
            }
            let outcome = connection.enqueue(message.clone());
            if !outcome.requires_eviction() {
                report.delivered += 1;
                continue;
            }
            if outcome == EnqueueOutcome::Full {
                let err = RelayError::BackpressureOverflow {
                    conn_id: id.to_string(),
                    capacity: connection.queue_capacity(),
                };
                warn!(error = %err, "evicting slow client");
                metrics::counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
            } else {
                debug!(conn_id = %id, "recipient already closing, evicting");
            }
            report.evicted.push(id.clone());
        }
        for id in &report.evicted {
            if let Some(connection) = self.members.remove(id) {
                let _ = connection.close(CloseReason::Evicted);
            }
        }
        metrics::counter!(HUB_MESSAGES_TOTAL).increment(1);
        debug!(
            delivered = report.delivered,
            evicted = report.evicted.len(),
            bytes = message.len(),
            "broadcast message"
        );
        report
    }

    fn close_all(&mut self) {
        let count = self.members.len();
        for (_, connection) in self.members.drain() {
            let _ = connection.close(CloseReason::Shutdown);
        }
        if count > 0 {
            info!(count, "closed remaining clients");
        }
    }
}

async fn run(
    mut state: HubState,
    mut rx: mpsc::Receiver<HubCommand>,
    shutdown: CancellationToken,
) {
    debug!("hub started");
    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(command) => state.apply(command),
                None => break,
            },
            () = shutdown.cancelled() => break,
        }
    }
    state.close_all();
    info!("hub stopped");
}
