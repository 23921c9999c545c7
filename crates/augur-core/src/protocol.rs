//! WebSocket protocol definitions
//!
//! One JSON object per frame, discriminated by the string field `type`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved `stream` payload that terminates one assistant turn.
pub const STREAM_END: &str = "[END]";

/// Messages sent from client to gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Bind a client session to this connection
    #[serde(rename_all = "camelCase")]
    Auth {
        /// Authenticated user
        user_id: String,
        /// Existing session ID to resume, generated when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        /// Shared secret, checked only when the gateway requires one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    /// Start a conversational turn
    #[serde(rename_all = "camelCase")]
    Message {
        /// Sending user
        user_id: String,
        /// User text
        content: String,
    },
}

impl ClientMessage {
    /// Discriminants understood by the gateway
    pub const TYPES: [&'static str; 2] = ["auth", "message"];

    /// Build an auth envelope
    pub fn auth(user_id: impl Into<String>, session_id: Option<String>) -> Self {
        ClientMessage::Auth {
            user_id: user_id.into(),
            session_id,
            token: None,
        }
    }

    /// Build a message envelope
    pub fn message(user_id: impl Into<String>, content: impl Into<String>) -> Self {
        ClientMessage::Message {
            user_id: user_id.into(),
            content: content.into(),
        }
    }

    /// The wire discriminant of this envelope
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Auth { .. } => "auth",
            ClientMessage::Message { .. } => "message",
        }
    }
}

/// Events sent from gateway to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Auth completed
    #[serde(rename_all = "camelCase")]
    AuthSuccess {
        /// Resolved session ID
        session_id: String,
    },
    /// Turn accepted, work started
    Processing {
        /// Human-readable note
        message: String,
    },
    /// Progress note shown until the next fragment arrives
    Status {
        /// Human-readable note
        message: String,
    },
    /// One text fragment, or [`STREAM_END`]
    Stream {
        /// Fragment content
        content: String,
    },
    /// Recoverable failure
    Error {
        /// Failure description
        message: String,
    },
}

impl ServerMessage {
    /// Discriminants understood by the client
    pub const TYPES: [&'static str; 5] = ["auth_success", "processing", "status", "stream", "error"];

    pub fn stream(content: impl Into<String>) -> Self {
        ServerMessage::Stream {
            content: content.into(),
        }
    }

    /// The terminal stream marker
    pub fn stream_end() -> Self {
        Self::stream(STREAM_END)
    }

    pub fn status(message: impl Into<String>) -> Self {
        ServerMessage::Status {
            message: message.into(),
        }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        ServerMessage::Processing {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    /// Whether this is the terminal stream marker
    pub fn is_stream_end(&self) -> bool {
        matches!(self, ServerMessage::Stream { content } if content == STREAM_END)
    }
}

/// Envelope decoding failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid message: {0}")]
    Malformed(String),
    #[error("Unknown message type: {0}")]
    UnknownType(String),
    #[error("Invalid {kind} message: {detail}")]
    InvalidFields { kind: String, detail: String },
}

/// Split a frame into its JSON value and `type` discriminant.
fn discriminant(text: &str) -> Result<(Value, String), ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::Malformed("missing \"type\" field".to_string()))?
        .to_string();
    Ok((value, kind))
}

/// Decode a client frame, naming the offending `type` on failure.
pub fn decode_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    let (value, kind) = discriminant(text)?;
    if !ClientMessage::TYPES.contains(&kind.as_str()) {
        return Err(ProtocolError::UnknownType(kind));
    }
    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidFields {
        kind,
        detail: e.to_string(),
    })
}

/// Decode a gateway frame.
///
/// Unrecognized `type` values decode to `Ok(None)` so older clients keep
/// working against newer gateways.
pub fn decode_server_message(text: &str) -> Result<Option<ServerMessage>, ProtocolError> {
    let (value, kind) = discriminant(text)?;
    if !ServerMessage::TYPES.contains(&kind.as_str()) {
        return Ok(None);
    }
    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| ProtocolError::InvalidFields {
            kind,
            detail: e.to_string(),
        })
}
