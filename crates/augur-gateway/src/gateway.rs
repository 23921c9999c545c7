//! Gateway main structure
//!
//! The WebSocket server that binds client sessions and relays turns.

use augur_core::{
    decode_client_message, ChatTurn, ClientMessage, ReasoningEngine, ReasoningSessionProvider,
    ServerMessage,
};
use augur_observability::connection_span;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::connection::{ConnectionError, ConnectionHandle, ConnectionPool, ConnectionState};
use crate::registry::ReasoningSessionRegistry;
use crate::session::{ClientSession, ClientSessionTable};
use crate::turn::{run_turn, Turn};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bind address (e.g., "127.0.0.1:8787")
    pub bind: String,
    /// Optional shared secret expected in `auth.token`
    pub auth_token: Option<String>,
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    /// Heartbeat interval in seconds
    pub heartbeat_interval_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_string(),
            auth_token: None,
            max_connections: 1000,
            heartbeat_interval_secs: 30,
        }
    }
}

/// What the connection loop should do after a text frame
#[derive(Debug)]
pub enum FrameOutcome {
    Continue,
    /// A turn was started; the task may be detached or awaited
    Turn(JoinHandle<()>),
    /// Flush pending envelopes and close the connection
    Close,
}

/// The main Gateway server
#[derive(Clone)]
pub struct Gateway {
    config: GatewayConfig,
    connections: Arc<ConnectionPool>,
    sessions: ClientSessionTable,
    registry: ReasoningSessionRegistry,
    engine: Arc<dyn ReasoningEngine>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.config)
            .field("connections", &self.connections)
            .field("sessions", &self.sessions)
            .field("registry", &self.registry)
            .field("engine", &"<engine>")
            .finish()
    }
}

impl Gateway {
    /// Create a new Gateway instance
    pub fn new(
        config: GatewayConfig,
        provider: Arc<dyn ReasoningSessionProvider>,
        engine: Arc<dyn ReasoningEngine>,
    ) -> Self {
        let connections = Arc::new(ConnectionPool::new(config.max_connections));
        Self {
            config,
            connections,
            sessions: ClientSessionTable::new(),
            registry: ReasoningSessionRegistry::new(provider),
            engine,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Get the connection pool
    pub fn connection_pool(&self) -> &ConnectionPool {
        &self.connections
    }

    pub fn registry(&self) -> &ReasoningSessionRegistry {
        &self.registry
    }

    /// Bind the configured address and serve until the listener fails
    pub async fn run(&self) -> Result<(), GatewayError> {
        let addr: SocketAddr = self.config.bind.parse()?;
        let listener = TcpListener::bind(&addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GatewayError> {
        info!("Gateway listening on ws://{}", listener.local_addr()?);

        loop {
            let (stream, peer_addr) = listener.accept().await?;
            debug!("New connection from {}", peer_addr);

            // The slot is claimed before the handshake so bursts cannot overshoot
            let (tx, rx) = mpsc::unbounded_channel::<ServerMessage>();
            let connection = ConnectionHandle::new(Uuid::new_v4().to_string(), peer_addr, tx);
            let gateway = self.clone();
            if !self.connections.try_add(connection.clone()).await {
                warn!("Connection pool full, rejecting {}", peer_addr);
                tokio::spawn(async move {
                    if let Err(e) = gateway.reject_connection(stream, "Server at capacity").await {
                        debug!("Failed to reject {}: {}", peer_addr, e);
                    }
                });
                continue;
            }

            tokio::spawn(async move {
                if let Err(e) = gateway.handle_connection(stream, connection, rx).await {
                    error!("Connection error for {}: {}", peer_addr, e);
                }
            });
        }
    }

    /// Reject a connection with an error message
    async fn reject_connection(&self, stream: TcpStream, reason: &str) -> Result<(), GatewayError> {
        let ws_stream = accept_async(stream).await?;
        let (mut sender, _) = ws_stream.split();
        send_envelope(&mut sender, &ServerMessage::error(reason)).await?;
        sender.close().await?;
        Ok(())
    }

    /// Handle a WebSocket connection that already holds a pool slot
    async fn handle_connection(
        &self,
        stream: TcpStream,
        connection: ConnectionHandle,
        rx: mpsc::UnboundedReceiver<ServerMessage>,
    ) -> Result<(), GatewayError> {
        let span = connection_span(&connection.id);
        let result = match accept_async(stream).await {
            Ok(ws_stream) => {
                self.connection_loop(ws_stream, &connection, rx)
                    .instrument(span)
                    .await
            }
            Err(e) => Err(e.into()),
        };

        // Cleanup releases the slot; the user's reasoning session is kept for reconnects
        connection.close();
        self.sessions.unbind(&connection.id);
        self.connections.remove(&connection.id).await;
        info!(connection_id = %connection.id, "Connection {} disconnected", connection.addr);

        result
    }

    async fn connection_loop(
        &self,
        ws_stream: WebSocketStream<TcpStream>,
        connection: &ConnectionHandle,
        mut rx: mpsc::UnboundedReceiver<ServerMessage>,
    ) -> Result<(), GatewayError> {
        let (mut sender, mut receiver) = ws_stream.split();
        let period = Duration::from_secs(self.config.heartbeat_interval_secs.max(1));
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                // Handle outgoing envelopes
                Some(message) = rx.recv() => {
                    if let Err(e) = send_envelope(&mut sender, &message).await {
                        warn!("Failed to send to {}: {}", connection.addr, e);
                        break;
                    }
                }

                _ = heartbeat.tick() => {
                    if let Err(e) = sender.send(Message::Ping(Vec::new())).await {
                        warn!("Heartbeat to {} failed: {}", connection.addr, e);
                        break;
                    }
                }

                // Handle incoming frames
                incoming = receiver.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            match self.handle_frame(connection, &text).await {
                                FrameOutcome::Continue => {}
                                // Detached; a dropped connection discards its result
                                FrameOutcome::Turn(_task) => {}
                                FrameOutcome::Close => {
                                    while let Ok(message) = rx.try_recv() {
                                        send_envelope(&mut sender, &message).await?;
                                    }
                                    sender.close().await?;
                                    break;
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = sender.send(Message::Pong(data)).await {
                                warn!("Failed to send pong: {}", e);
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("Connection {} closed", connection.addr);
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("WebSocket error on {}: {}", connection.addr, e);
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        Ok(())
    }

    /// Handle one text frame from a connection.
    ///
    /// Transport independent: replies go through the connection's channel.
    pub async fn handle_frame(&self, connection: &ConnectionHandle, text: &str) -> FrameOutcome {
        let message = match decode_client_message(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(connection_id = %connection.id, error = %e, "Rejected frame");
                reply(connection, ServerMessage::error(e.to_string()));
                return FrameOutcome::Continue;
            }
        };

        match message {
            ClientMessage::Auth {
                user_id,
                session_id,
                token,
            } => self.handle_auth(connection, user_id, session_id, token),
            ClientMessage::Message { user_id, content } => {
                self.handle_message(connection, user_id, content).await
            }
        }
    }

    fn handle_auth(
        &self,
        connection: &ConnectionHandle,
        user_id: String,
        session_id: Option<String>,
        token: Option<String>,
    ) -> FrameOutcome {
        if let Some(ref required) = self.config.auth_token {
            if token.as_deref() != Some(required.as_str()) {
                warn!(connection_id = %connection.id, "Invalid auth token");
                reply(connection, ServerMessage::error("Invalid auth token"));
                return FrameOutcome::Close;
            }
        }

        if connection.state() == ConnectionState::Processing {
            reply(
                connection,
                ServerMessage::error("Cannot re-authenticate while a message is being processed"),
            );
            return FrameOutcome::Continue;
        }

        if user_id.trim().is_empty() {
            reply(
                connection,
                ServerMessage::error("Invalid auth message: userId must not be empty"),
            );
            return FrameOutcome::Continue;
        }

        connection.set_state(ConnectionState::Authenticating);
        let session = ClientSession::new(session_id, user_id.clone());
        let session_id = session.session_id.clone();
        self.sessions.bind(&connection.id, session);

        // Failures surface on first message use
        let registry = self.registry.clone();
        let eager_user = user_id.clone();
        tokio::spawn(
            async move {
                if let Err(e) = registry.get_or_create(&eager_user).await {
                    warn!(user_id = %eager_user, error = %e, "Reasoning session not ready");
                }
            }
            .in_current_span(),
        );

        connection.set_state(ConnectionState::Authenticated);
        info!(
            connection_id = %connection.id,
            user_id = %user_id,
            session_id = %session_id,
            "Client authenticated"
        );
        reply(connection, ServerMessage::AuthSuccess { session_id });
        FrameOutcome::Continue
    }

    async fn handle_message(
        &self,
        connection: &ConnectionHandle,
        user_id: String,
        content: String,
    ) -> FrameOutcome {
        let session = match self.sessions.get(&connection.id) {
            Some(session) if connection.state().is_authenticated() => session,
            _ => {
                reply(connection, ServerMessage::error("Not authenticated: send auth first"));
                return FrameOutcome::Continue;
            }
        };

        let (bound_user, session_id) = {
            let guard = session.read().await;
            (guard.user_id.clone(), guard.session_id.clone())
        };
        if user_id != bound_user {
            warn!(connection_id = %connection.id, user_id = %user_id, "userId mismatch");
            reply(
                connection,
                ServerMessage::error("userId does not match the authenticated user"),
            );
            return FrameOutcome::Continue;
        }

        if !connection.begin_turn() {
            reply(
                connection,
                ServerMessage::error("A message is already being processed"),
            );
            return FrameOutcome::Continue;
        }

        let turn = Turn {
            connection: connection.clone(),
            session,
            user_id: bound_user,
            session_id,
            content,
        };
        let task = tokio::spawn(run_turn(
            turn,
            self.registry.clone(),
            Arc::clone(&self.engine),
        ));
        FrameOutcome::Turn(task)
    }

    /// Send an envelope to every authenticated connection
    pub async fn broadcast(&self, message: ServerMessage) -> usize {
        self.connections.broadcast(message).await
    }

    /// Conversation of a connection's bound client session
    pub async fn history(&self, connection_id: &str) -> Option<Vec<ChatTurn>> {
        self.sessions.history(connection_id).await
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.count().await
    }

    pub async fn authenticated_count(&self) -> usize {
        self.connections.authenticated_count().await
    }

    pub fn reasoning_session_count(&self) -> usize {
        self.registry.len()
    }
}

impl std::fmt::Display for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Gateway({})", self.config.bind)
    }
}

fn reply(connection: &ConnectionHandle, message: ServerMessage) {
    if let Err(e) = connection.send(message) {
        debug!(connection_id = %connection.id, error = %e, "Reply dropped");
    }
}

async fn send_envelope(sender: &mut WsSink, message: &ServerMessage) -> Result<(), GatewayError> {
    let json = serde_json::to_string(message)?;
    sender.send(Message::Text(json)).await?;
    Ok(())
}

/// Gateway-related errors
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Address parse error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
}
