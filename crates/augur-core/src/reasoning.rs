//! Reasoning backend seams
//!
//! The gateway never talks to a model or a market API directly. It is
//! handed a [`ReasoningSessionProvider`] that opens per-user tool sessions
//! and a [`ReasoningEngine`] that turns a user message into streamed text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::types::ChatTurn;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Session unavailable: {0}")]
    Unavailable(String),

    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool error: {0}")]
    Tool(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error(transparent)]
    Session(#[from] ProviderError),
}

/// A tool exposed by a reasoning session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
}

/// Per-user handle to the tool-capable backend.
///
/// Keyed by user ID and outlives any single connection.
#[async_trait]
pub trait ReasoningSession: Send + Sync {
    /// The user this session belongs to
    fn user_id(&self) -> &str;

    /// Whether the tool backend is currently reachable
    fn is_connected(&self) -> bool;

    /// Establish connectivity; may fail and may be retried later
    async fn initialize(&self) -> Result<(), ProviderError>;

    /// Tools this session can run
    fn tools(&self) -> Vec<ToolDescriptor>;

    /// Run a named tool
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ProviderError>;
}

/// Opens reasoning sessions; the gateway layers get-or-create on top.
#[async_trait]
pub trait ReasoningSessionProvider: Send + Sync {
    async fn open_session(&self, user_id: &str) -> Result<Arc<dyn ReasoningSession>, ProviderError>;
}

/// Incremental output of one engine invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A text fragment of the response
    Chunk(String),
    /// A human-readable progress note
    Status(String),
}

/// Sender half handed to the engine for streaming its output.
///
/// Sends never fail from the engine's point of view: once the receiving
/// side is gone the event is dropped and the engine runs to completion.
#[derive(Debug, Clone)]
pub struct EngineEvents {
    tx: mpsc::Sender<EngineEvent>,
}

impl EngineEvents {
    /// Create a sender and the receiver that drains it
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub async fn chunk(&self, text: impl Into<String>) {
        self.emit(EngineEvent::Chunk(text.into())).await;
    }

    pub async fn status(&self, text: impl Into<String>) {
        self.emit(EngineEvent::Status(text.into())).await;
    }

    async fn emit(&self, event: EngineEvent) {
        if self.tx.send(event).await.is_err() {
            debug!("Engine event dropped, receiver closed");
        }
    }
}

/// Produces an assistant response with access to a reasoning session.
///
/// Implementations may emit any number of chunks and status notes through
/// `events` before returning the full response text.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    async fn process_message_with_tools(
        &self,
        message: &str,
        history: &[ChatTurn],
        session: Arc<dyn ReasoningSession>,
        events: EngineEvents,
    ) -> Result<String, EngineError>;
}
