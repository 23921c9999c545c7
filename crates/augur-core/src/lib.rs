//! Augur core types
//!
//! Shared by the gateway, the client transport and the server binary:
//! the JSON envelope protocol, conversation turns, and the traits the
//! gateway uses to reach the reasoning backend.

pub mod protocol;
pub mod reasoning;
pub mod types;

pub use protocol::{
    decode_client_message, decode_server_message, ClientMessage, ProtocolError, ServerMessage,
    STREAM_END,
};
pub use reasoning::{
    EngineError, EngineEvent, EngineEvents, ProviderError, ReasoningEngine, ReasoningSession,
    ReasoningSessionProvider, ToolDescriptor,
};
pub use types::{ChatTurn, Conversation, Role};
