//! WebSocket connection management
//!
//! Tracks live connections, their lifecycle state, and the channel used to
//! push envelopes to each socket writer.

use augur_core::ServerMessage;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::debug;

/// Lifecycle of one connection.
///
/// `Connected → Authenticating → Authenticated ⇄ Processing`, with
/// `Closed` reachable from anywhere and terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Authenticating,
    Authenticated,
    Processing,
    Closed,
}

impl ConnectionState {
    /// Whether a client session is bound
    pub fn is_authenticated(&self) -> bool {
        matches!(self, ConnectionState::Authenticated | ConnectionState::Processing)
    }
}

/// Handle to a WebSocket connection for sending messages
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    /// Connection ID
    pub id: String,
    /// Client address
    pub addr: SocketAddr,
    /// Channel for sending envelopes to the connection
    sender: mpsc::UnboundedSender<ServerMessage>,
    state: Arc<Mutex<ConnectionState>>,
}

impl ConnectionHandle {
    /// Create a new connection handle in the `Connected` state
    pub fn new(id: String, addr: SocketAddr, sender: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self {
            id,
            addr,
            sender,
            state: Arc::new(Mutex::new(ConnectionState::Connected)),
        }
    }

    /// Send an envelope to this connection
    pub fn send(&self, message: ServerMessage) -> Result<(), ConnectionError> {
        self.sender
            .send(message)
            .map_err(|_| ConnectionError::Closed)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Move to `next` unless the connection is already closed
    pub fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock();
        if *state != ConnectionState::Closed {
            *state = next;
        }
    }

    /// Atomically move `Authenticated → Processing`.
    ///
    /// Returns false when the connection is not idle, which is how a second
    /// turn on the same connection is refused.
    pub fn begin_turn(&self) -> bool {
        self.transition(ConnectionState::Authenticated, ConnectionState::Processing)
    }

    /// Move `Processing → Authenticated`; a closed connection stays closed
    pub fn end_turn(&self) -> bool {
        self.transition(ConnectionState::Processing, ConnectionState::Authenticated)
    }

    pub fn close(&self) {
        *self.state.lock() = ConnectionState::Closed;
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let mut state = self.state.lock();
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }
}

/// Manages all WebSocket connections
#[derive(Debug)]
pub struct ConnectionPool {
    /// Map of connection ID to connection handle
    connections: Arc<AsyncMutex<HashMap<String, ConnectionHandle>>>,
    /// Maximum number of connections allowed
    max_connections: usize,
}

impl ConnectionPool {
    /// Create a new connection pool
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Arc::new(AsyncMutex::new(HashMap::new())),
            max_connections,
        }
    }

    /// Get current connection count
    pub async fn count(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Claim a slot for `handle`.
    ///
    /// The capacity check and the insert happen under one lock, so a burst
    /// of accepts can never overshoot `max_connections`. Returns false when
    /// the pool is full.
    pub async fn try_add(&self, handle: ConnectionHandle) -> bool {
        let mut connections = self.connections.lock().await;
        if connections.len() >= self.max_connections {
            return false;
        }
        connections.insert(handle.id.clone(), handle);
        true
    }

    /// Remove a connection from the pool
    pub async fn remove(&self, connection_id: &str) -> Option<ConnectionHandle> {
        let mut connections = self.connections.lock().await;
        connections.remove(connection_id)
    }

    /// Number of connections with a bound client session
    pub async fn authenticated_count(&self) -> usize {
        let connections = self.connections.lock().await;
        connections
            .values()
            .filter(|handle| handle.state().is_authenticated())
            .count()
    }

    /// Send an envelope to every authenticated connection.
    ///
    /// Returns how many connections accepted it.
    pub async fn broadcast(&self, message: ServerMessage) -> usize {
        let connections = self.connections.lock().await;
        let mut delivered = 0;
        for handle in connections.values() {
            if !handle.state().is_authenticated() {
                continue;
            }
            match handle.send(message.clone()) {
                Ok(()) => delivered += 1,
                // Connection closed, will be cleaned up by its own loop
                Err(_) => debug!(connection_id = %handle.id, "Broadcast skipped closed connection"),
            }
        }
        delivered
    }
}

/// Connection-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection closed")]
    Closed,
}
