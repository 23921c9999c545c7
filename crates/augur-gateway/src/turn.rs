//! One conversational turn
//!
//! Runs detached from the connection loop. Whatever happens, the client
//! receives the terminal stream marker and the connection returns to
//! `Authenticated`.

use augur_core::{
    EngineError, EngineEvent, EngineEvents, ProviderError, ReasoningEngine, ServerMessage,
};
use augur_observability::turn_span;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

use crate::connection::ConnectionHandle;
use crate::registry::ReasoningSessionRegistry;
use crate::session::ClientSessionHandle;

pub(crate) const CONNECTING_STATUS: &str = "Connecting to market data...";
pub(crate) const PROCESSING_NOTE: &str = "Processing your message...";

/// Buffered engine events per turn
const EVENT_BUFFER: usize = 64;

/// Failures that end a turn early
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("Market data unavailable: {0}")]
    Unavailable(#[source] ProviderError),

    #[error("Failed to process message: {0}")]
    Engine(#[from] EngineError),

    #[error("Failed to process message: engine task aborted")]
    Aborted,
}

pub(crate) struct Turn {
    pub connection: ConnectionHandle,
    pub session: ClientSessionHandle,
    pub user_id: String,
    pub session_id: String,
    pub content: String,
}

pub(crate) async fn run_turn(
    turn: Turn,
    registry: ReasoningSessionRegistry,
    engine: Arc<dyn ReasoningEngine>,
) {
    let span = turn_span(&turn.user_id, &turn.session_id);
    async move {
        let connection = turn.connection.clone();
        match execute(turn, &registry, engine).await {
            Ok(()) => info!("Turn completed"),
            Err(e) => {
                warn!(error = %e, "Turn failed");
                notify(&connection, ServerMessage::error(e.to_string()));
            }
        }
        notify(&connection, ServerMessage::stream_end());
        connection.end_turn();
    }
    .instrument(span)
    .await
}

async fn execute(
    turn: Turn,
    registry: &ReasoningSessionRegistry,
    engine: Arc<dyn ReasoningEngine>,
) -> Result<(), TurnError> {
    let Turn {
        connection,
        session,
        user_id,
        content,
        ..
    } = turn;

    let reasoning = registry
        .get_or_create(&user_id)
        .await
        .map_err(TurnError::Unavailable)?;

    if !reasoning.is_connected() {
        notify(&connection, ServerMessage::status(CONNECTING_STATUS));
        reasoning
            .initialize()
            .await
            .map_err(TurnError::Unavailable)?;
    }

    // The engine sees the history before this message
    let history = {
        let mut guard = session.write().await;
        let prior = guard.conversation.turns().to_vec();
        guard.conversation.push_user(content.as_str());
        prior
    };

    notify(&connection, ServerMessage::processing(PROCESSING_NOTE));

    let (events, mut rx) = EngineEvents::channel(EVENT_BUFFER);
    let relay = connection.clone();
    let forwarder = tokio::spawn(
        async move {
            while let Some(event) = rx.recv().await {
                let message = match event {
                    EngineEvent::Chunk(text) => ServerMessage::stream(text),
                    EngineEvent::Status(text) => ServerMessage::status(text),
                };
                // Keep draining after a disconnect so the engine never blocks
                notify(&relay, message);
            }
        }
        .in_current_span(),
    );

    // A panicking engine surfaces here as a join error
    let call = tokio::spawn(
        async move {
            engine
                .process_message_with_tools(&content, &history, reasoning, events)
                .await
        }
        .in_current_span(),
    );
    let outcome = call.await;

    // Every relayed fragment must precede the terminal marker
    if let Err(e) = forwarder.await {
        warn!(error = %e, "Event forwarder stopped abnormally");
    }

    let result = match outcome {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) => Err(TurnError::Engine(e)),
        Err(e) => {
            warn!(error = %e, "Engine task did not complete");
            Err(TurnError::Aborted)
        }
    };

    let mut guard = session.write().await;
    match result {
        Ok(response) => {
            guard.conversation.push_assistant(response);
            Ok(())
        }
        Err(e) => {
            guard.conversation.rollback_user();
            Err(e)
        }
    }
}

fn notify(connection: &ConnectionHandle, message: ServerMessage) {
    if connection.send(message).is_err() {
        debug!(connection_id = %connection.id, "Dropped envelope for closed connection");
    }
}
