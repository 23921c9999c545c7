//! End-to-end tests over a real WebSocket

use async_trait::async_trait;
use augur_core::{
    decode_server_message, ChatTurn, ClientMessage, EngineError, EngineEvents, ProviderError,
    ReasoningEngine, ReasoningSession, ReasoningSessionProvider, ServerMessage, ToolDescriptor,
};
use augur_gateway::{Gateway, GatewayConfig};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct MockSession {
    user_id: String,
}

#[async_trait]
impl ReasoningSession for MockSession {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn is_connected(&self) -> bool {
        true
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    fn tools(&self) -> Vec<ToolDescriptor> {
        vec![ToolDescriptor {
            name: "search_markets".to_string(),
            description: "Search markets".to_string(),
        }]
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ProviderError> {
        match name {
            "search_markets" => Ok(json!({ "query": arguments, "markets": [] })),
            other => Err(ProviderError::ToolNotFound(other.to_string())),
        }
    }
}

#[derive(Default)]
struct MockSessionProvider {
    opened: AtomicUsize,
}

#[async_trait]
impl ReasoningSessionProvider for MockSessionProvider {
    async fn open_session(&self, user_id: &str) -> Result<Arc<dyn ReasoningSession>, ProviderError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockSession {
            user_id: user_id.to_string(),
        }))
    }
}

/// Streams a fixed script of fragments
struct ScriptedEngine {
    fragments: Vec<&'static str>,
}

#[async_trait]
impl ReasoningEngine for ScriptedEngine {
    async fn process_message_with_tools(
        &self,
        _message: &str,
        _history: &[ChatTurn],
        session: Arc<dyn ReasoningSession>,
        events: EngineEvents,
    ) -> Result<String, EngineError> {
        events.status("Searching markets").await;
        session.call_tool("search_markets", json!("rain")).await?;
        for fragment in &self.fragments {
            events.chunk(*fragment).await;
        }
        Ok(self.fragments.concat())
    }
}

const SCRIPT: [&str; 3] = [
    "Here is one:\n[MARKET_CARD]{\"id\":\"m1\",",
    "\"question\":\"Rain tomorrow?\",\"probability\":0.7}",
    "[/MARKET_CARD]\nGood luck!",
];

/// Streams numbered fragments with a pause between each, then records
/// that it ran to completion
struct SlowEngine {
    fragments: usize,
    pause: Duration,
    completed: Arc<AtomicBool>,
}

#[async_trait]
impl ReasoningEngine for SlowEngine {
    async fn process_message_with_tools(
        &self,
        _message: &str,
        _history: &[ChatTurn],
        _session: Arc<dyn ReasoningSession>,
        events: EngineEvents,
    ) -> Result<String, EngineError> {
        let mut full = String::new();
        for i in 0..self.fragments {
            let fragment = format!("part {} ", i);
            full.push_str(&fragment);
            events.chunk(fragment).await;
            tokio::time::sleep(self.pause).await;
        }
        self.completed.store(true, Ordering::SeqCst);
        Ok(full)
    }
}

async fn start(config: GatewayConfig) -> (String, Arc<MockSessionProvider>, Gateway) {
    let engine = Arc::new(ScriptedEngine {
        fragments: SCRIPT.to_vec(),
    });
    start_with(config, engine).await
}

async fn start_with(
    config: GatewayConfig,
    engine: Arc<dyn ReasoningEngine>,
) -> (String, Arc<MockSessionProvider>, Gateway) {
    let provider = Arc::new(MockSessionProvider::default());
    let gateway = Gateway::new(config, provider.clone(), engine);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let server = gateway.clone();
    tokio::spawn(async move { server.serve(listener).await });
    (url, provider, gateway)
}

async fn wait_for_connections(gateway: &Gateway, expected: usize) {
    for _ in 0..100 {
        if gateway.connection_count().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(gateway.connection_count().await, expected);
}

async fn send(ws: &mut Ws, message: &ClientMessage) {
    let json = serde_json::to_string(message).unwrap();
    ws.send(Message::Text(json)).await.unwrap();
}

async fn next_envelope(ws: &mut Ws) -> Option<ServerMessage> {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")?;
        match frame {
            Ok(Message::Text(text)) => return decode_server_message(&text).unwrap(),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

async fn authenticate(ws: &mut Ws, user_id: &str) -> String {
    send(ws, &ClientMessage::auth(user_id, None)).await;
    match next_envelope(ws).await {
        Some(ServerMessage::AuthSuccess { session_id }) => session_id,
        other => panic!("expected auth_success, got {:?}", other),
    }
}

#[tokio::test]
async fn test_full_turn_over_websocket() {
    let (url, _provider, gateway) = start(GatewayConfig::default()).await;
    let (mut ws, _) = connect_async(url.as_str()).await.unwrap();

    let session_id = authenticate(&mut ws, "u1").await;
    assert!(!session_id.is_empty());

    send(&mut ws, &ClientMessage::message("u1", "Will it rain?")).await;

    assert!(matches!(next_envelope(&mut ws).await, Some(ServerMessage::Processing { .. })));
    assert_eq!(
        next_envelope(&mut ws).await,
        Some(ServerMessage::status("Searching markets"))
    );

    let mut streamed = String::new();
    loop {
        match next_envelope(&mut ws).await {
            Some(message) if message.is_stream_end() => break,
            Some(ServerMessage::Stream { content }) => streamed.push_str(&content),
            other => panic!("unexpected envelope {:?}", other),
        }
    }
    assert_eq!(streamed, SCRIPT.concat());
    assert_eq!(gateway.reasoning_session_count(), 1);
}

#[tokio::test]
async fn test_reconnect_reuses_reasoning_session() {
    let (url, provider, gateway) = start(GatewayConfig::default()).await;

    let (mut first, _) = connect_async(url.as_str()).await.unwrap();
    authenticate(&mut first, "u1").await;
    first.close(None).await.unwrap();
    drop(first);

    let (mut second, _) = connect_async(url.as_str()).await.unwrap();
    authenticate(&mut second, "u1").await;
    send(&mut second, &ClientMessage::message("u1", "again")).await;
    while let Some(message) = next_envelope(&mut second).await {
        if message.is_stream_end() {
            break;
        }
    }

    assert_eq!(provider.opened.load(Ordering::SeqCst), 1);
    assert_eq!(gateway.reasoning_session_count(), 1);
}

#[tokio::test]
async fn test_bad_token_closes_connection() {
    let config = GatewayConfig {
        auth_token: Some("secret".to_string()),
        ..Default::default()
    };
    let (url, _provider, _gateway) = start(config).await;
    let (mut ws, _) = connect_async(url.as_str()).await.unwrap();

    send(&mut ws, &ClientMessage::auth("u1", None)).await;
    assert_eq!(
        next_envelope(&mut ws).await,
        Some(ServerMessage::error("Invalid auth token"))
    );
    assert_eq!(next_envelope(&mut ws).await, None);
}

#[tokio::test]
async fn test_capacity_rejection() {
    let config = GatewayConfig {
        max_connections: 1,
        ..Default::default()
    };
    let (url, _provider, gateway) = start(config).await;

    let (mut first, _) = connect_async(url.as_str()).await.unwrap();
    authenticate(&mut first, "u1").await;
    assert_eq!(gateway.connection_count().await, 1);

    let (mut second, _) = connect_async(url.as_str()).await.unwrap();
    assert_eq!(
        next_envelope(&mut second).await,
        Some(ServerMessage::error("Server at capacity"))
    );
}

#[tokio::test]
async fn test_disconnect_unbinds_client_session() {
    let (url, _provider, gateway) = start(GatewayConfig::default()).await;
    let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
    authenticate(&mut ws, "u1").await;
    assert_eq!(gateway.authenticated_count().await, 1);

    ws.close(None).await.unwrap();
    wait_for_connections(&gateway, 0).await;
    assert_eq!(gateway.reasoning_session_count(), 1);
}

#[tokio::test]
async fn test_connect_burst_never_exceeds_capacity() {
    let config = GatewayConfig {
        max_connections: 1,
        ..Default::default()
    };
    let (url, _provider, gateway) = start(config).await;

    let attempts: Vec<_> = (0..5)
        .map(|_| {
            let url = url.clone();
            tokio::spawn(async move {
                let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
                let first =
                    tokio::time::timeout(Duration::from_millis(500), next_envelope(&mut ws)).await;
                (ws, first.ok().flatten())
            })
        })
        .collect();

    let mut admitted = Vec::new();
    let mut rejected = 0;
    for attempt in attempts {
        let (ws, first) = attempt.await.unwrap();
        match first {
            Some(ServerMessage::Error { message }) if message == "Server at capacity" => rejected += 1,
            None => admitted.push(ws),
            other => panic!("unexpected first envelope: {:?}", other),
        }
    }

    assert_eq!(admitted.len(), 1);
    assert_eq!(rejected, 4);
    assert_eq!(gateway.connection_count().await, 1);
}

#[tokio::test]
async fn test_drop_during_turn_lets_engine_finish() {
    let completed = Arc::new(AtomicBool::new(false));
    let engine = Arc::new(SlowEngine {
        fragments: 20,
        pause: Duration::from_millis(20),
        completed: Arc::clone(&completed),
    });
    let (url, _provider, gateway) = start_with(GatewayConfig::default(), engine).await;

    let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
    authenticate(&mut ws, "u1").await;
    send(&mut ws, &ClientMessage::message("u1", "long answer please")).await;
    assert!(matches!(next_envelope(&mut ws).await, Some(ServerMessage::Processing { .. })));
    assert!(matches!(next_envelope(&mut ws).await, Some(ServerMessage::Stream { .. })));

    // Drop the transport mid-turn without a close handshake
    drop(ws);
    wait_for_connections(&gateway, 0).await;
    assert_eq!(gateway.authenticated_count().await, 0);

    for _ in 0..100 {
        if completed.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(completed.load(Ordering::SeqCst));
    // The user's reasoning session survives for a later reconnect
    assert_eq!(gateway.reasoning_session_count(), 1);
}
