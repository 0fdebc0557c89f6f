/// Wire messages exchanged with the browser terminal
///
/// Control messages travel as JSON text frames shaped
/// `{"type": "...", "payload": ...}`. Terminal output from the server is sent
/// as raw binary frames; binary frames from the client are raw input.
use serde::{Deserialize, Serialize};

/// Client -> server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Keystrokes / pasted input
    Data(#[serde(with = "text_bytes")] Vec<u8>),
    /// Window size change
    Resize { cols: u16, rows: u16 },
    /// Start a new session; missing sizes use the configured defaults
    Create {
        #[serde(default)]
        cols: Option<u16>,
        #[serde(default)]
        rows: Option<u16>,
    },
    /// Resume a session by the id the server handed out earlier
    Attach { session_id: String },
    /// End the session explicitly
    Disconnect,
}

impl ClientMessage {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Server -> client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Terminal output; never JSON encoded, sent as a binary frame
    #[serde(skip)]
    Data(Vec<u8>),
    /// Id of the session this connection is attached to
    SessionId(String),
    Error { code: ErrorCode, message: String },
    /// The session ended; `code` is the shell's exit code when known
    Exit { code: Option<u32> },
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code,
            message: message.into(),
        }
    }
}

/// Stable error identifiers shown to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    SpawnFailed,
    NotFound,
    InvalidCredentials,
    SessionLimit,
    BadRequest,
    Internal,
}

mod text_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        String::deserialize(deserializer).map(String::into_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_client_messages() {
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"data","payload":"ls -la\r"}"#).unwrap(),
            ClientMessage::Data(b"ls -la\r".to_vec())
        );
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"resize","payload":{"cols":120,"rows":40}}"#)
                .unwrap(),
            ClientMessage::Resize {
                cols: 120,
                rows: 40
            }
        );
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"create","payload":{}}"#).unwrap(),
            ClientMessage::Create {
                cols: None,
                rows: None
            }
        );
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"attach","payload":{"session_id":"abc"}}"#)
                .unwrap(),
            ClientMessage::Attach {
                session_id: "abc".to_string()
            }
        );
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"disconnect"}"#).unwrap(),
            ClientMessage::Disconnect
        );
    }

    #[test]
    fn test_reject_unknown_or_malformed() {
        assert!(ClientMessage::from_json(r#"{"type":"reboot"}"#).is_err());
        assert!(ClientMessage::from_json(r#"{"type":"resize","payload":{"cols":-1}}"#).is_err());
        assert!(ClientMessage::from_json("not json").is_err());
    }

    #[test]
    fn test_server_message_shapes() {
        assert_eq!(
            ServerMessage::SessionId("abc".to_string()).to_json().unwrap(),
            r#"{"type":"session_id","payload":"abc"}"#
        );
        assert_eq!(
            ServerMessage::error(ErrorCode::NotFound, "no such session")
                .to_json()
                .unwrap(),
            r#"{"type":"error","payload":{"code":"not_found","message":"no such session"}}"#
        );
        assert_eq!(
            ServerMessage::Exit { code: Some(0) }.to_json().unwrap(),
            r#"{"type":"exit","payload":{"code":0}}"#
        );
        assert!(ServerMessage::Data(vec![1, 2]).to_json().is_err());
    }
}
