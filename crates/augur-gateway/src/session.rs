//! Client session management
//!
//! One client session per authenticated connection, keyed by the
//! generated connection ID. Sessions live in memory only and are dropped
//! when their connection closes.

use augur_core::{ChatTurn, Conversation};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A handle to a client session for external reference
pub type ClientSessionHandle = Arc<RwLock<ClientSession>>;

/// Per-connection application state bound at auth
#[derive(Debug, Clone)]
pub struct ClientSession {
    /// Session ID, supplied by the client or generated
    pub session_id: String,
    /// Authenticated user ID, never empty
    pub user_id: String,
    /// Conversation history for this connection
    pub conversation: Conversation,
    pub bound_at: DateTime<Utc>,
}

impl ClientSession {
    pub fn new(session_id: Option<String>, user_id: impl Into<String>) -> Self {
        let session_id = session_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Self {
            session_id,
            user_id: user_id.into(),
            conversation: Conversation::new(),
            bound_at: Utc::now(),
        }
    }
}

/// Connection ID → client session
#[derive(Debug, Clone, Default)]
pub struct ClientSessionTable {
    sessions: Arc<DashMap<String, ClientSessionHandle>>,
}

impl ClientSessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a session to a connection, replacing any previous one
    pub fn bind(&self, connection_id: &str, session: ClientSession) -> ClientSessionHandle {
        let handle = Arc::new(RwLock::new(session));
        self.sessions
            .insert(connection_id.to_string(), Arc::clone(&handle));
        handle
    }

    pub fn get(&self, connection_id: &str) -> Option<ClientSessionHandle> {
        self.sessions
            .get(connection_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Drop the session of a closed connection
    pub fn unbind(&self, connection_id: &str) -> Option<ClientSessionHandle> {
        self.sessions
            .remove(connection_id)
            .map(|(_, handle)| handle)
    }

    /// Snapshot of a connection's conversation
    pub async fn history(&self, connection_id: &str) -> Option<Vec<ChatTurn>> {
        let handle = self.get(connection_id)?;
        let session = handle.read().await;
        Some(session.conversation.turns().to_vec())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
