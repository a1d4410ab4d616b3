//! Broadcast hub
//!
//! Owns the [`ConnectionRegistry`] and one bounded outbound queue per
//! connection, all behind a single lock. Every mutation follows the same
//! sequence:
//!
//! 1. take the lock, mutate the registry
//! 2. bump the commit sequence and capture the presence snapshot
//! 3. enqueue the serialized event for the dispatcher, together with the
//!    recipients registered at that instant
//! 4. release the lock
//!
//! A single dispatcher task drains the queue in commit order and pushes each
//! payload onto every recipient's queue without waiting. Since the queues are
//! FIFO, all clients see broadcasts in the same relative order. A recipient
//! whose queue is full has fallen too far behind: its queue is closed so the
//! session reaps itself, and nobody else waits for it.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::config::HubConfig;
use crate::presence::PresenceSnapshot;
use crate::protocol::ServerEvent;
use crate::registry::{ConnectionRegistry, RegistryError, Session};
use crate::types::{new_connection_id, ConnectionId};

/// Serialized frame shared between all recipients of one broadcast
pub type Payload = Arc<str>;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Recipient {connection_id} unreachable: {reason}")]
    RecipientUnreachable {
        connection_id: ConnectionId,
        reason: String,
    },

    #[error("Hub is shutting down")]
    ShuttingDown,
}

/// A connection freshly admitted to the hub
pub struct Connected {
    pub session: Session,
    /// Frames the hub wants delivered to this connection, in commit order
    pub outbound: mpsc::Receiver<Payload>,
}

struct HubState {
    registry: ConnectionRegistry,
    outbound: HashMap<ConnectionId, mpsc::Sender<Payload>>,
    seq: u64,
    accepting: bool,
}

struct Dispatch {
    seq: u64,
    payload: Payload,
    recipients: Vec<(ConnectionId, mpsc::Sender<Payload>)>,
}

/// Outcome of delivering one broadcast
#[derive(Default)]
struct DeliveryReport {
    seq: u64,
    delivered: usize,
    closed: usize,
    lagging: Vec<(ConnectionId, mpsc::Sender<Payload>)>,
}

#[derive(Clone)]
pub struct BroadcastHub {
    state: Arc<Mutex<HubState>>,
    dispatch_tx: mpsc::UnboundedSender<Dispatch>,
    outbound_buffer: usize,
}

impl BroadcastHub {
    /// Create a hub and spawn its dispatcher task.
    ///
    /// Must be called from within a tokio runtime. The dispatcher stops once
    /// every clone of the hub is dropped.
    pub fn new(config: &HubConfig) -> Self {
        let state = Arc::new(Mutex::new(HubState {
            registry: ConnectionRegistry::new(config.max_username_len),
            outbound: HashMap::new(),
            seq: 0,
            accepting: true,
        }));
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_dispatcher(dispatch_rx, state.clone()));

        Self {
            state,
            dispatch_tx,
            outbound_buffer: config.outbound_buffer.max(1),
        }
    }

    /// Admit a new connection under a freshly generated id
    pub async fn connect(&self) -> Result<Connected, HubError> {
        self.register(new_connection_id()).await
    }

    /// Admit a connection under the given id. No broadcast is sent since
    /// presence only changes once a username is set.
    pub async fn register(&self, connection_id: ConnectionId) -> Result<Connected, HubError> {
        let mut state = self.state.lock().await;
        if !state.accepting {
            return Err(HubError::ShuttingDown);
        }

        let session = state.registry.register(connection_id.clone())?;
        let (tx, rx) = mpsc::channel(self.outbound_buffer);
        state.outbound.insert(connection_id.clone(), tx);

        tracing::debug!(
            connection_id = %connection_id,
            connections = state.registry.len(),
            "Connection registered"
        );

        Ok(Connected {
            session,
            outbound: rx,
        })
    }

    /// Set a connection's username and broadcast the new presence to everyone.
    ///
    /// Returns the snapshot that was broadcast. On error nothing changes and
    /// nothing is sent.
    pub async fn on_username_set(
        &self,
        connection_id: &str,
        username: &str,
    ) -> Result<PresenceSnapshot, HubError> {
        let mut state = self.state.lock().await;
        state.registry.set_username(connection_id, username)?;

        let snapshot = self.commit(&mut state);
        drop(state);

        tracing::info!(
            connection_id,
            username = username.trim(),
            seq = snapshot.seq,
            clients = snapshot.len(),
            "Username set"
        );
        Ok(snapshot)
    }

    /// Remove a connection and broadcast the new presence to the remaining
    /// connections. Idempotent: a second call returns `None` and sends nothing.
    pub async fn on_disconnect(&self, connection_id: &str) -> Option<Session> {
        let mut state = self.state.lock().await;
        state.outbound.remove(connection_id);
        let session = state.registry.remove(connection_id)?;

        let snapshot = self.commit(&mut state);
        drop(state);

        tracing::info!(
            connection_id,
            username = session.username.as_deref().unwrap_or(""),
            seq = snapshot.seq,
            clients = snapshot.len(),
            "Connection removed"
        );
        Some(session)
    }

    /// Deliver an arbitrary event to every registered connection.
    ///
    /// Ordered with respect to presence broadcasts. Delivery failures are
    /// logged per recipient and never reported to the caller.
    pub async fn broadcast(&self, event: ServerEvent) {
        let mut state = self.state.lock().await;
        state.seq += 1;
        let seq = state.seq;
        self.enqueue(&state, seq, &event);
    }

    /// Current presence, read under the lock
    pub async fn snapshot(&self) -> PresenceSnapshot {
        let state = self.state.lock().await;
        PresenceSnapshot::capture(&state.registry, state.seq)
    }

    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.registry.len()
    }

    /// Refuse new connections and close every outbound queue.
    ///
    /// Sessions observe the closed queue, shut their transport and remove
    /// themselves through [`BroadcastHub::on_disconnect`].
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.accepting = false;
        let closed = state.outbound.len();
        state.outbound.clear();
        tracing::info!(connections = closed, "Hub shutting down");
    }

    pub async fn is_accepting(&self) -> bool {
        self.state.lock().await.accepting
    }

    /// Record a committed mutation: bump the sequence, snapshot and enqueue.
    /// Caller holds the lock.
    fn commit(&self, state: &mut HubState) -> PresenceSnapshot {
        state.seq += 1;
        let snapshot = PresenceSnapshot::capture(&state.registry, state.seq);
        self.enqueue(state, snapshot.seq, &snapshot.to_event());
        snapshot
    }

    fn enqueue(&self, state: &HubState, seq: u64, event: &ServerEvent) {
        let payload: Payload = match event.to_json() {
            Ok(json) => json.into(),
            Err(e) => {
                tracing::error!(seq, "Failed to serialize broadcast: {}", e);
                return;
            }
        };

        let recipients = state
            .outbound
            .iter()
            .map(|(id, tx)| (id.clone(), tx.clone()))
            .collect();

        // Only fails once the dispatcher is gone, i.e. the runtime is shutting down
        if self
            .dispatch_tx
            .send(Dispatch {
                seq,
                payload,
                recipients,
            })
            .is_err()
        {
            tracing::warn!(seq, "Dispatcher stopped, dropping broadcast");
        }
    }
}

async fn run_dispatcher(mut rx: mpsc::UnboundedReceiver<Dispatch>, state: Arc<Mutex<HubState>>) {
    while let Some(dispatch) = rx.recv().await {
        let report = deliver(dispatch);
        tracing::debug!(
            seq = report.seq,
            delivered = report.delivered,
            lagging = report.lagging.len(),
            closed = report.closed,
            "Broadcast delivered"
        );
        if !report.lagging.is_empty() {
            reap_lagging(&state, report.lagging).await;
        }
    }
    tracing::debug!("Dispatcher stopped");
}

/// Hand one payload to every recipient without waiting on any of them.
///
/// Queues are FIFO and dispatches arrive in commit order, so a non-blocking
/// push keeps every client's view ordered. A full queue means the reader fell
/// `outbound_buffer` frames behind; it is reported as lagging.
fn deliver(dispatch: Dispatch) -> DeliveryReport {
    let Dispatch {
        seq,
        payload,
        recipients,
    } = dispatch;

    let mut report = DeliveryReport {
        seq,
        ..Default::default()
    };
    for (connection_id, tx) in recipients {
        match tx.try_send(payload.clone()) {
            Ok(()) => report.delivered += 1,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let err = HubError::RecipientUnreachable {
                    connection_id: connection_id.clone(),
                    reason: "outbound queue full".to_string(),
                };
                tracing::warn!(seq, "{}", err);
                report.lagging.push((connection_id, tx));
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                let err = HubError::RecipientUnreachable {
                    connection_id,
                    reason: "connection closed".to_string(),
                };
                tracing::debug!(seq, "{}", err);
                report.closed += 1;
            }
        }
    }
    report
}

/// Close the queues of recipients that fell behind. Their sessions drain what
/// is already queued, see the queue close and disconnect themselves.
async fn reap_lagging(
    state: &Mutex<HubState>,
    lagging: Vec<(ConnectionId, mpsc::Sender<Payload>)>,
) {
    let mut state = state.lock().await;
    for (connection_id, tx) in lagging {
        // Skip if the id was already removed or re-registered with a new queue
        let current = state
            .outbound
            .get(&connection_id)
            .is_some_and(|registered| registered.same_channel(&tx));
        if current {
            state.outbound.remove(&connection_id);
            tracing::warn!(connection_id = %connection_id, "Dropping lagging connection");
        }
    }
}
