//! Presence view derived from the registry
//!
//! Presence is never stored on its own. A [`PresenceSnapshot`] is captured
//! from the [`ConnectionRegistry`] while the hub lock is held, stamped with
//! the commit sequence of the mutation that produced it.

use crate::protocol::ServerEvent;
use crate::registry::ConnectionRegistry;
use crate::types::Username;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceSnapshot {
    /// Commit sequence of the registry mutation this snapshot follows
    pub seq: u64,
    /// Sorted, unique usernames
    pub clients: Vec<Username>,
}

impl PresenceSnapshot {
    pub fn capture(registry: &ConnectionRegistry, seq: u64) -> Self {
        Self {
            seq,
            clients: registry.snapshot_usernames().into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::ConnectedClients {
            clients: self.clients.clone(),
        }
    }
}
