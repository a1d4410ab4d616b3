/// Opaque ID types for type safety
pub type ConnectionId = String;
pub type Username = String;

/// Generate a fresh connection id
pub fn new_connection_id() -> ConnectionId {
    ulid::Ulid::new().to_string()
}

/// Lifecycle of a single connection's session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closed,
}

impl SessionState {
    /// Whether inbound frames are still processed in this state
    pub fn accepts_frames(self) -> bool {
        self == SessionState::Open
    }
}
