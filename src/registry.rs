//! Connection registry
//!
//! Maps every live connection to its [`Session`]. This is the single source of
//! truth for presence: the set of usernames is always derived from here.
//!
//! The registry itself is a plain data structure. Serialization of concurrent
//! callers happens one level up, in [`crate::hub::BroadcastHub`], which holds it
//! behind a lock together with the outbound queues.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};

use crate::types::{ConnectionId, Username};

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors raised by registry mutations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("Connection already registered: {0}")]
    DuplicateConnection(ConnectionId),

    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    #[error("Username already taken: {0}")]
    UsernameTaken(Username),

    #[error("Username already set for connection {connection_id} (as {current})")]
    UsernameAlreadySet {
        connection_id: ConnectionId,
        current: Username,
    },
}

impl RegistryError {
    /// Whether this error signals a broken registry/transport invariant rather
    /// than bad client input
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            RegistryError::UnknownConnection(_) | RegistryError::DuplicateConnection(_)
        )
    }
}

/// Per-connection state tying a transport connection to an optional username
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub connection_id: ConnectionId,
    pub username: Option<Username>,
    pub joined_at: DateTime<Utc>,
}

impl Session {
    fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            username: None,
            joined_at: Utc::now(),
        }
    }
}

#[derive(Debug)]
pub struct ConnectionRegistry {
    sessions: HashMap<ConnectionId, Session>,
    /// Reverse index enforcing username uniqueness
    owners: HashMap<Username, ConnectionId>,
    max_username_len: usize,
}

impl ConnectionRegistry {
    pub fn new(max_username_len: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            owners: HashMap::new(),
            max_username_len,
        }
    }

    /// Create a session with no username
    pub fn register(&mut self, connection_id: ConnectionId) -> RegistryResult<Session> {
        if self.sessions.contains_key(&connection_id) {
            return Err(RegistryError::DuplicateConnection(connection_id));
        }

        let session = Session::new(connection_id.clone());
        self.sessions.insert(connection_id, session.clone());
        Ok(session)
    }

    /// Set the username of a registered connection.
    ///
    /// Names are trimmed before validation. A name held by another live
    /// connection is rejected, and a session's name can only be set once.
    pub fn set_username(&mut self, connection_id: &str, username: &str) -> RegistryResult<()> {
        // Invariant violations take precedence over bad input
        let session = self
            .sessions
            .get(connection_id)
            .ok_or_else(|| RegistryError::UnknownConnection(connection_id.to_string()))?;

        if let Some(current) = &session.username {
            return Err(RegistryError::UsernameAlreadySet {
                connection_id: connection_id.to_string(),
                current: current.clone(),
            });
        }

        let username = self.validate_username(username)?;
        if self.owners.contains_key(&username) {
            return Err(RegistryError::UsernameTaken(username));
        }

        if let Some(session) = self.sessions.get_mut(connection_id) {
            session.username = Some(username.clone());
            self.owners.insert(username, connection_id.to_string());
        }
        Ok(())
    }

    /// Remove a connection. Idempotent: returns `None` if already gone.
    pub fn remove(&mut self, connection_id: &str) -> Option<Session> {
        let session = self.sessions.remove(connection_id)?;
        if let Some(name) = &session.username {
            self.owners.remove(name);
        }
        Some(session)
    }

    /// Point-in-time read of every username currently set, sorted
    pub fn snapshot_usernames(&self) -> BTreeSet<Username> {
        self.owners.keys().cloned().collect()
    }

    pub fn get(&self, connection_id: &str) -> Option<&Session> {
        self.sessions.get(connection_id)
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.sessions.contains_key(connection_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn validate_username(&self, raw: &str) -> RegistryResult<Username> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(RegistryError::InvalidUsername(
                "username must not be empty".to_string(),
            ));
        }
        let len = name.chars().count();
        if len > self.max_username_len {
            return Err(RegistryError::InvalidUsername(format!(
                "username is {} characters, limit is {}",
                len, self.max_username_len
            )));
        }
        if name.chars().any(char::is_control) {
            return Err(RegistryError::InvalidUsername(
                "username must not contain control characters".to_string(),
            ));
        }
        Ok(name.to_string())
    }
}
