//! Reconnecting WebSocket transport
//!
//! Owns one logical session against the gateway: connect, authenticate,
//! feed every envelope into the [`ChatStore`], and reconnect on a linear
//! backoff until the attempts run out.

use augur_core::{decode_server_message, ClientMessage};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, ReconnectPolicy};
use crate::store::{ChatStore, ConnectionStatus};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unable to reach {url} after {attempts} reconnect attempts")]
    RetriesExhausted { url: String, attempts: u32 },
}

/// Why a connected session ended
enum SessionEnd {
    /// `disconnect()` was called
    Shutdown,
    /// The transport dropped; reconnect
    Lost,
}

#[derive(Debug)]
struct Inner {
    config: ClientConfig,
    policy: ReconnectPolicy,
    store: watch::Sender<ChatStore>,
    /// Present while a connection is open
    outgoing: Mutex<Option<mpsc::UnboundedSender<ClientMessage>>>,
    shutdown: watch::Sender<bool>,
}

/// Client handle; cheap to clone
#[derive(Debug, Clone)]
pub struct TransportClient {
    inner: Arc<Inner>,
}

impl TransportClient {
    pub fn new(config: ClientConfig) -> Self {
        let policy = config.policy();
        let (store, _) = watch::channel(ChatStore::new());
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                config,
                policy,
                store,
                outgoing: Mutex::new(None),
                shutdown,
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Subscribe to store changes
    pub fn subscribe(&self) -> watch::Receiver<ChatStore> {
        self.inner.store.subscribe()
    }

    /// Clone of the current store
    pub fn snapshot(&self) -> ChatStore {
        self.inner.store.borrow().clone()
    }

    /// Start the connection loop.
    ///
    /// The task ends with `Ok` after [`disconnect`](Self::disconnect), or with
    /// [`ClientError::RetriesExhausted`] once every reconnect attempt failed.
    pub fn connect(&self) -> JoinHandle<Result<(), ClientError>> {
        self.inner.shutdown.send_replace(false);
        self.inner.store.send_modify(|store| store.connection_error = None);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.run().await })
    }

    /// Close the connection and stop reconnecting
    pub fn disconnect(&self) {
        self.inner.shutdown.send_replace(true);
    }

    /// Send a user message.
    ///
    /// Returns false, and only logs, when the transport is not open.
    pub fn send(&self, text: &str) -> bool {
        let message = ClientMessage::message(self.inner.config.user_id.clone(), text);
        let sent = match self.inner.outgoing.lock().as_ref() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        };

        if sent {
            self.inner.store.send_modify(|store| store.push_user(text));
        } else {
            warn!("Cannot send message: not connected");
        }
        sent
    }

    pub fn is_connected(&self) -> bool {
        self.inner.outgoing.lock().is_some()
    }
}

impl Inner {
    async fn run(&self) -> Result<(), ClientError> {
        let mut shutdown = self.shutdown.subscribe();
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            self.set_status(if attempt == 0 {
                ConnectionStatus::Connecting
            } else {
                ConnectionStatus::Reconnecting { attempt }
            });

            match connect_async(self.config.url.as_str()).await {
                Ok((ws_stream, _)) => {
                    info!("Connected to {}", self.config.url);
                    attempt = 0;
                    self.store.send_modify(|store| {
                        store.connection = ConnectionStatus::Connected;
                        store.connection_error = None;
                    });

                    match self.run_session(ws_stream, &mut shutdown).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost => warn!("Disconnected from {}", self.config.url),
                    }
                }
                Err(e) => {
                    warn!("Failed to connect to {}: {}", self.config.url, e);
                }
            }

            attempt += 1;
            let Some(delay) = self.policy.delay_for(attempt) else {
                let error = ClientError::RetriesExhausted {
                    url: self.config.url.clone(),
                    attempts: self.policy.max_attempts,
                };
                warn!("{}", error);
                self.store.send_modify(|store| {
                    store.connection = ConnectionStatus::Failed;
                    store.connection_error = Some(error.to_string());
                    store.is_processing = false;
                    store.status_text = None;
                });
                return Err(error);
            };

            self.set_status(ConnectionStatus::Reconnecting { attempt });
            info!("Reconnecting to {} in {:?}", self.config.url, delay);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    info!("Shutdown during reconnect backoff");
                    break;
                }
            }
        }

        self.set_status(ConnectionStatus::Disconnected);
        Ok(())
    }

    async fn run_session(
        &self,
        ws_stream: WsStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let (mut write, mut read) = ws_stream.split();

        let auth = ClientMessage::Auth {
            user_id: self.config.user_id.clone(),
            session_id: self
                .store
                .borrow()
                .session_id
                .clone()
                .or_else(|| self.config.session_id.clone()),
            token: self.config.token.clone(),
        };
        if let Err(e) = send_message(&mut write, &auth).await {
            warn!("Failed to send auth: {}", e);
            return SessionEnd::Lost;
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        *self.outgoing.lock() = Some(tx);

        let end = self.message_loop(&mut write, &mut read, &mut rx, shutdown).await;

        *self.outgoing.lock() = None;
        // A turn cut off by the drop will never see its terminal marker
        self.store.send_modify(|store| {
            store.is_processing = false;
            store.status_text = None;
        });

        if matches!(end, SessionEnd::Shutdown) {
            if let Err(e) = write.close().await {
                debug!("Close after shutdown failed: {}", e);
            }
        }
        end
    }

    async fn message_loop(
        &self,
        write: &mut WsWrite,
        read: &mut WsRead,
        rx: &mut mpsc::UnboundedReceiver<ClientMessage>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        loop {
            tokio::select! {
                Some(message) = rx.recv() => {
                    if let Err(e) = send_message(write, &message).await {
                        warn!("Failed to send message: {}", e);
                        return SessionEnd::Lost;
                    }
                }

                incoming = read.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => self.handle_frame(&text),
                        Some(Ok(Message::Ping(data))) => {
                            if write.send(Message::Pong(data)).await.is_err() {
                                warn!("Failed to send pong");
                                return SessionEnd::Lost;
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("WebSocket closed by gateway");
                            return SessionEnd::Lost;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("WebSocket error: {}", e);
                            return SessionEnd::Lost;
                        }
                        None => return SessionEnd::Lost,
                    }
                }

                _ = shutdown.changed() => {
                    info!("Shutdown signal received");
                    return SessionEnd::Shutdown;
                }
            }
        }
    }

    fn handle_frame(&self, text: &str) {
        match decode_server_message(text) {
            Ok(Some(message)) => self.store.send_modify(|store| store.apply(message)),
            Ok(None) => debug!("Ignoring unrecognized envelope"),
            Err(e) => warn!("Invalid envelope from gateway: {}", e),
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.store.send_modify(|store| store.connection = status);
    }
}

async fn send_message(write: &mut WsWrite, message: &ClientMessage) -> Result<(), ClientError> {
    let json = serde_json::to_string(message)?;
    write.send(Message::Text(json)).await?;
    Ok(())
}
