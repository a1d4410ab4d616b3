//! Per-connection session state machine
//!
//! `Connecting -> Open -> Closed`. A session registers with the hub when it
//! opens, turns inbound frames into hub calls while open, and always removes
//! itself from the hub when it closes, whichever side ended the connection.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::hub::{BroadcastHub, Connected, HubError, Payload};
use crate::protocol::{decode_frame, ClientEvent};
use crate::transport::{FrameReceiver, FrameSender};
use crate::types::{new_connection_id, ConnectionId, SessionState};

/// What happened to a single inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Registry changed and a broadcast was queued
    Applied,
    /// Unknown event type, malformed frame, or session not open
    Ignored,
    /// Well-formed but refused by the registry
    Rejected,
}

pub struct SessionHandler {
    hub: BroadcastHub,
    connection_id: ConnectionId,
    state: SessionState,
    send_timeout: Duration,
}

impl SessionHandler {
    pub fn new(hub: BroadcastHub, send_timeout: Duration) -> Self {
        Self::with_connection_id(hub, new_connection_id(), send_timeout)
    }

    pub fn with_connection_id(
        hub: BroadcastHub,
        connection_id: ConnectionId,
        send_timeout: Duration,
    ) -> Self {
        Self {
            hub,
            connection_id,
            state: SessionState::Connecting,
            send_timeout,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the connection until either side closes it. Returns the final
    /// state, which is always `Closed`.
    pub async fn run<S, R>(mut self, mut sender: S, mut receiver: R) -> SessionState
    where
        S: FrameSender,
        R: FrameReceiver,
    {
        let Connected { session, outbound } =
            match self.hub.register(self.connection_id.clone()).await {
                Ok(connected) => connected,
                Err(e) => {
                    log_hub_error(&self.connection_id, &e);
                    let _ = sender.close().await;
                    self.state = SessionState::Closed;
                    return self.state;
                }
            };
        self.state = SessionState::Open;
        tracing::info!(
            connection_id = %self.connection_id,
            joined_at = %session.joined_at,
            "Session open"
        );

        let mut writer = tokio::spawn(write_outbound(
            sender,
            outbound,
            self.send_timeout,
            self.connection_id.clone(),
        ));

        let writer_finished = loop {
            tokio::select! {
                frame = receiver.recv() => match frame {
                    Some(Ok(text)) => {
                        self.handle_frame(&text).await;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(connection_id = %self.connection_id, "Transport error: {}", e);
                        break false;
                    }
                    None => {
                        tracing::debug!(connection_id = %self.connection_id, "Peer closed connection");
                        break false;
                    }
                },
                _ = &mut writer => {
                    tracing::debug!(connection_id = %self.connection_id, "Outbound side finished");
                    break true;
                }
            }
        };

        self.state = SessionState::Closed;
        if !writer_finished {
            writer.abort();
        }
        self.hub.on_disconnect(&self.connection_id).await;

        tracing::info!(connection_id = %self.connection_id, "Session closed");
        self.state
    }

    /// Apply one inbound text frame
    pub async fn handle_frame(&mut self, text: &str) -> FrameOutcome {
        if !self.state.accepts_frames() {
            tracing::debug!(
                connection_id = %self.connection_id,
                state = ?self.state,
                "Frame ignored, session not open"
            );
            return FrameOutcome::Ignored;
        }

        let event = match decode_frame(text) {
            Ok(Some(event)) => event,
            Ok(None) => {
                tracing::debug!(connection_id = %self.connection_id, "Ignoring unknown event type");
                return FrameOutcome::Ignored;
            }
            Err(e) => {
                tracing::warn!(connection_id = %self.connection_id, "{}", e);
                return FrameOutcome::Ignored;
            }
        };

        match event {
            ClientEvent::Username { username } => {
                match self.hub.on_username_set(&self.connection_id, &username).await {
                    Ok(_) => FrameOutcome::Applied,
                    Err(e) => {
                        log_hub_error(&self.connection_id, &e);
                        FrameOutcome::Rejected
                    }
                }
            }
            ClientEvent::Unknown => FrameOutcome::Ignored,
        }
    }
}

fn log_hub_error(connection_id: &str, err: &HubError) {
    match err {
        HubError::Registry(e) if e.is_internal() => {
            tracing::error!(connection_id, "Registry invariant violated: {}", e)
        }
        HubError::Registry(e) => tracing::warn!(connection_id, "Rejected: {}", e),
        HubError::ShuttingDown => tracing::info!(connection_id, "{}", err),
        HubError::RecipientUnreachable { .. } => tracing::warn!(connection_id, "{}", err),
    }
}

/// Copy queued frames to the transport, one at a time, each bounded by
/// `send_timeout`. Ends when the hub closes the queue or the transport fails.
async fn write_outbound<S: FrameSender>(
    mut sender: S,
    mut outbound: mpsc::Receiver<Payload>,
    send_timeout: Duration,
    connection_id: ConnectionId,
) {
    while let Some(payload) = outbound.recv().await {
        match tokio::time::timeout(send_timeout, sender.send(payload.to_string())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(connection_id = %connection_id, "Send failed: {}", e);
                return;
            }
            Err(_) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    "Send timed out after {:?}, dropping connection",
                    send_timeout
                );
                return;
            }
        }
    }
    let _ = sender.close().await;
}

/// Spawn a session on its own task
pub fn spawn_session<S, R>(
    hub: BroadcastHub,
    send_timeout: Duration,
    sender: S,
    receiver: R,
) -> JoinHandle<SessionState>
where
    S: FrameSender,
    R: FrameReceiver,
{
    let handler = SessionHandler::new(hub, send_timeout);
    tokio::spawn(handler.run(sender, receiver))
}
