//! Market-data tool sessions over HTTP
//!
//! Each user gets a [`MarketSession`] that talks to the market API:
//! `GET {base}/health`, `GET {base}/markets?search=..&limit=..` and
//! `GET {base}/markets/{id}`.

use async_trait::async_trait;
use augur_core::{ProviderError, ReasoningSession, ReasoningSessionProvider, ToolDescriptor};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const SEARCH_MARKETS: &str = "search_markets";
pub const GET_MARKET: &str = "get_market";

/// Opens one [`MarketSession`] per user against a shared HTTP client
#[derive(Debug, Clone)]
pub struct MarketToolProvider {
    client: Client,
    base_url: String,
    search_limit: usize,
}

impl MarketToolProvider {
    pub fn new(
        base_url: impl Into<String>,
        search_limit: usize,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Initialization(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            search_limit,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ReasoningSessionProvider for MarketToolProvider {
    async fn open_session(&self, user_id: &str) -> Result<Arc<dyn ReasoningSession>, ProviderError> {
        let session = MarketSession {
            user_id: user_id.to_string(),
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            search_limit: self.search_limit,
            connected: AtomicBool::new(false),
        };
        // An unreachable API is not fatal here; the turn retries initialize
        if let Err(e) = session.initialize().await {
            warn!(user_id = %user_id, error = %e, "Market API not reachable yet");
        }
        Ok(Arc::new(session))
    }
}

#[derive(Debug)]
pub struct MarketSession {
    user_id: String,
    client: Client,
    base_url: String,
    search_limit: usize,
    connected: AtomicBool,
}

impl MarketSession {
    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Market API request");

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                self.connected.store(false, Ordering::SeqCst);
                ProviderError::Unavailable(e.to_string())
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ProviderError::Tool(format!("Not found: {}", path)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Tool(format!("HTTP {}: {}", status.as_u16(), body)));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::Tool(format!("Invalid response: {}", e)))
    }

    async fn search(&self, arguments: &Value) -> Result<Value, ProviderError> {
        let query = match arguments {
            Value::String(s) => s.clone(),
            other => other
                .get("query")
                .and_then(Value::as_str)
                .ok_or_else(|| ProviderError::Tool("search_markets requires a query".to_string()))?
                .to_string(),
        };
        let limit = arguments
            .get("limit")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(self.search_limit);

        self.get_json("/markets", &[("search", query), ("limit", limit.to_string())])
            .await
    }

    async fn market(&self, arguments: &Value) -> Result<Value, ProviderError> {
        let id = match arguments {
            Value::String(s) => s.as_str(),
            other => other
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| ProviderError::Tool("get_market requires an id".to_string()))?,
        };
        self.get_json(&format!("/markets/{}", id), &[]).await
    }
}

#[async_trait]
impl ReasoningSession for MarketSession {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::Initialization(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Initialization(format!(
                "Health check returned {}",
                response.status()
            )));
        }

        self.connected.store(true, Ordering::SeqCst);
        info!(user_id = %self.user_id, "Market session connected");
        Ok(())
    }

    fn tools(&self) -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor {
                name: SEARCH_MARKETS.to_string(),
                description: "Search prediction markets by keyword".to_string(),
            },
            ToolDescriptor {
                name: GET_MARKET.to_string(),
                description: "Fetch one market by id".to_string(),
            },
        ]
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ProviderError> {
        match name {
            SEARCH_MARKETS => self.search(&arguments).await,
            GET_MARKET => self.market(&arguments).await,
            other => Err(ProviderError::ToolNotFound(other.to_string())),
        }
    }
}

/// Arguments for a keyword search
pub fn search_arguments(query: &str, limit: usize) -> Value {
    json!({ "query": query, "limit": limit })
}
