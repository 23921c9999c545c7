//! OpenAI-compatible streaming reasoning engine

use async_trait::async_trait;
use augur_core::{ChatTurn, EngineError, EngineEvents, ReasoningEngine, ReasoningSession, Role};
use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::markets::{search_arguments, SEARCH_MARKETS};
use crate::prompt::{market_context, DEFAULT_SYSTEM_PROMPT};

pub const ANALYZING_STATUS: &str = "Analyzing markets...";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptMessage {
    pub role: &'static str,
    pub content: String,
}

impl PromptMessage {
    fn new(role: &'static str, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OpenAiEngine {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    system_prompt: String,
    search_limit: usize,
}

impl OpenAiEngine {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Upstream(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            search_limit: 5,
        })
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_search_limit(mut self, limit: usize) -> Self {
        self.search_limit = limit;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Market search results for the message, when the session can run one
    async fn lookup_markets(&self, message: &str, session: &dyn ReasoningSession) -> Option<Value> {
        if !session.is_connected() || !session.tools().iter().any(|t| t.name == SEARCH_MARKETS) {
            return None;
        }
        match session
            .call_tool(SEARCH_MARKETS, search_arguments(message, self.search_limit))
            .await
        {
            Ok(markets) => Some(markets),
            Err(e) => {
                warn!(user_id = %session.user_id(), error = %e, "Market search failed, continuing without it");
                None
            }
        }
    }

    /// Assemble the message list sent upstream
    pub fn build_messages(
        &self,
        message: &str,
        history: &[ChatTurn],
        markets: Option<&Value>,
    ) -> Vec<PromptMessage> {
        let mut system = self.system_prompt.clone();
        if let Some(markets) = markets {
            system.push_str("\n\n");
            system.push_str(&market_context(markets));
        }

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(PromptMessage::new("system", system));
        messages.extend(history.iter().map(|turn| {
            let role = match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            PromptMessage::new(role, turn.content.as_str())
        }));
        messages.push(PromptMessage::new("user", message));
        messages
    }
}

#[async_trait]
impl ReasoningEngine for OpenAiEngine {
    async fn process_message_with_tools(
        &self,
        message: &str,
        history: &[ChatTurn],
        session: Arc<dyn ReasoningSession>,
        events: EngineEvents,
    ) -> Result<String, EngineError> {
        events.status(ANALYZING_STATUS).await;
        let markets = self.lookup_markets(message, session.as_ref()).await;
        let messages = self.build_messages(message, history, markets.as_ref());

        let body = CompletionRequest {
            model: &self.model,
            messages: &messages,
            stream: true,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::Upstream(format!("HTTP {}: {}", status.as_u16(), text)));
        }

        stream_completion(response.bytes_stream(), &events).await
    }
}

/// Forward each content delta of an SSE completion stream and return the
/// concatenated text
pub async fn stream_completion<S, B, E>(stream: S, events: &EngineEvents) -> Result<String, EngineError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut stream = Box::pin(stream.eventsource());
    let mut full = String::new();

    while let Some(event) = stream.next().await {
        let event = event.map_err(|e| EngineError::Upstream(e.to_string()))?;
        if event.data == "[DONE]" {
            break;
        }

        match serde_json::from_str::<CompletionChunk>(&event.data) {
            Ok(chunk) => {
                for choice in chunk.choices {
                    if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                        full.push_str(&text);
                        events.chunk(text).await;
                    }
                }
            }
            Err(e) => debug!(error = %e, data = %event.data, "Skipping unparseable completion chunk"),
        }
    }

    Ok(full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use augur_core::EngineEvent;
    use futures_util::stream;
    use std::convert::Infallible;

    fn engine() -> OpenAiEngine {
        OpenAiEngine::new("http://localhost:1234/v1/", "test-model", None, Duration::from_secs(1)).unwrap()
    }

    #[tokio::test]
    async fn test_stream_completion_forwards_deltas() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Rain \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"is likely\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        );
        // Split mid-event to exercise reassembly
        let (a, b) = body.split_at(70);
        let chunks = stream::iter(vec![Ok::<_, Infallible>(a), Ok(b)]);

        let (events, mut rx) = EngineEvents::channel(16);
        let text = stream_completion(chunks, &events).await.unwrap();
        drop(events);

        assert_eq!(text, "Rain is likely");
        assert_eq!(rx.recv().await, Some(EngineEvent::Chunk("Rain ".to_string())));
        assert_eq!(rx.recv().await, Some(EngineEvent::Chunk("is likely".to_string())));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_stream_completion_skips_garbage() {
        let chunks = stream::iter(vec![Ok::<_, Infallible>(
            "data: not json\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\n",
        )]);
        let (events, _rx) = EngineEvents::channel(16);
        let text = stream_completion(chunks, &events).await.unwrap();
        assert_eq!(text, "ok");
    }

    #[test]
    fn test_build_messages_orders_history() {
        let history = vec![ChatTurn::user("hi"), ChatTurn::assistant("hello")];
        let messages = engine().build_messages("rain?", &history, None);

        let roles: Vec<&str> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(messages[0].content, DEFAULT_SYSTEM_PROMPT);
        assert_eq!(messages[3].content, "rain?");
    }

    #[test]
    fn test_build_messages_folds_market_context() {
        let markets = serde_json::json!([{ "id": "m1", "question": "Rain?" }]);
        let messages = engine()
            .with_system_prompt("Be brief.")
            .build_messages("rain?", &[], Some(&markets));

        assert!(messages[0].content.starts_with("Be brief.\n\n"));
        assert!(messages[0].content.contains("\"id\":\"m1\""));
    }
}
