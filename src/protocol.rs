use serde::{Deserialize, Serialize};

use crate::types::Username;

/// Errors decoding an inbound frame
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
}

/// Events sent by clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Claim a username for this connection
    Username { username: String },
    /// Any `type` this server does not understand
    #[serde(other)]
    Unknown,
}

/// Events sent by the server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Full presence list, sent to every connection after each change
    ConnectedClients { clients: Vec<Username> },
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Decode an inbound text frame.
///
/// Returns `Ok(None)` for well-formed frames with an unrecognized `type`, which
/// callers ignore. Missing `type`, non-object payloads and invalid fields for a
/// known type are `MalformedFrame`.
pub fn decode_frame(text: &str) -> Result<Option<ClientEvent>, ProtocolError> {
    match serde_json::from_str::<ClientEvent>(text) {
        Ok(ClientEvent::Unknown) => Ok(None),
        Ok(event) => Ok(Some(event)),
        Err(e) => Err(ProtocolError::MalformedFrame(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_username() {
        let event = decode_frame(r#"{"type": "username", "username": "alice"}"#).unwrap();
        assert_eq!(
            event,
            Some(ClientEvent::Username {
                username: "alice".to_string()
            })
        );
    }

    #[test]
    fn test_decode_ignores_extra_fields() {
        let event =
            decode_frame(r#"{"type":"username","username":"bob","color":"red"}"#).unwrap();
        assert!(matches!(event, Some(ClientEvent::Username { .. })));
    }

    #[test]
    fn test_decode_unknown_type_is_ignored() {
        assert_eq!(decode_frame(r#"{"type":"typing","on":true}"#).unwrap(), None);
    }

    #[test]
    fn test_decode_malformed_frames() {
        let cases = [
            "not json",
            r#"{"username":"alice"}"#,
            r#"{"type":"username"}"#,
            r#"{"type":"username","username":42}"#,
            r#"{"type":"username","username":null}"#,
            "42",
            "",
        ];
        for case in cases {
            assert!(
                matches!(decode_frame(case), Err(ProtocolError::MalformedFrame(_))),
                "expected malformed: {:?}",
                case
            );
        }
    }

    #[test]
    fn test_connected_clients_wire_shape() {
        let event = ServerEvent::ConnectedClients {
            clients: vec!["alice".to_string(), "bob".to_string()],
        };
        assert_eq!(
            event.to_json().unwrap(),
            r#"{"type":"connected_clients","clients":["alice","bob"]}"#
        );
    }
}
