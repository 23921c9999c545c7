//! Client-side chat state
//!
//! Reassembles streamed fragments into assistant turns. The transport
//! applies every decoded envelope here and publishes the result.

use augur_blocks::{RenderDispatcher, RenderPlan};
use augur_core::{ChatTurn, ServerMessage, STREAM_END};

/// Transport connection indicator, kept apart from chat errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Waiting before reconnect attempt `attempt`
    Reconnecting { attempt: u32 },
    /// Reconnect attempts exhausted
    Failed,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Reconnecting { attempt } => write!(f, "reconnecting (attempt {})", attempt),
            ConnectionStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatStore {
    /// Completed turns, oldest first
    pub messages: Vec<ChatTurn>,
    /// Raw text of the in-flight assistant turn
    pub buffer: String,
    /// Progress note shown until the next fragment
    pub status_text: Option<String>,
    pub is_processing: bool,
    pub session_id: Option<String>,
    pub connection: ConnectionStatus,
    /// Persistent error after reconnects are exhausted
    pub connection_error: Option<String>,
}

impl ChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one envelope from the gateway
    pub fn apply(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::AuthSuccess { session_id } => {
                self.session_id = Some(session_id);
            }
            ServerMessage::Stream { content } if content == STREAM_END => {
                self.finalize();
            }
            ServerMessage::Stream { content } => {
                self.buffer.push_str(&content);
                self.status_text = None;
            }
            ServerMessage::Processing { .. } => {
                self.is_processing = true;
            }
            ServerMessage::Status { message } => {
                self.status_text = Some(message);
            }
            ServerMessage::Error { message } => {
                self.messages.push(ChatTurn::assistant(message));
                self.is_processing = false;
            }
        }
    }

    /// Record a turn the user just sent
    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(ChatTurn::user(content));
    }

    /// Render plan of the in-flight buffer
    pub fn streaming_plan(&self, dispatcher: &RenderDispatcher) -> RenderPlan {
        dispatcher.plan_streaming(&self.buffer)
    }

    pub fn last_message(&self) -> Option<&ChatTurn> {
        self.messages.last()
    }

    fn finalize(&mut self) {
        let text = self.buffer.trim();
        if !text.is_empty() {
            self.messages.push(ChatTurn::assistant(text));
        }
        self.buffer.clear();
        self.status_text = None;
        self.is_processing = false;
    }
}
