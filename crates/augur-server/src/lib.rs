//! Augur Server - wires the gateway to an OpenAI-compatible engine and a
//! market-data API

pub mod engine;
pub mod markets;
pub mod prompt;

pub use engine::{OpenAiEngine, PromptMessage};
pub use markets::{MarketSession, MarketToolProvider};

use augur_config::Config;
use augur_gateway::{Gateway, GatewayConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Gateway settings from the config file
pub fn gateway_config(config: &Config) -> GatewayConfig {
    GatewayConfig {
        bind: config.gateway.bind.clone(),
        auth_token: config.gateway.auth_token.clone(),
        max_connections: config.gateway.max_connections,
        heartbeat_interval_secs: config.gateway.heartbeat_interval_secs,
    }
}

/// Build the gateway with its market provider and engine
pub fn build_gateway(config: &Config) -> anyhow::Result<Gateway> {
    let provider = MarketToolProvider::new(
        config.markets.base_url.as_str(),
        config.markets.search_limit,
        Duration::from_secs(config.markets.timeout_seconds),
    )?;

    let api_key = config.engine.api_key();
    if api_key.is_none() {
        warn!(
            "{} is not set; completion requests are sent without credentials",
            config.engine.api_key_env
        );
    }

    let mut engine = OpenAiEngine::new(
        config.engine.base_url.as_str(),
        config.engine.model.as_str(),
        api_key,
        Duration::from_secs(config.engine.timeout_seconds),
    )?
    .with_search_limit(config.markets.search_limit);
    if let Some(prompt) = &config.engine.system_prompt {
        engine = engine.with_system_prompt(prompt.as_str());
    }

    Ok(Gateway::new(
        gateway_config(config),
        Arc::new(provider),
        Arc::new(engine),
    ))
}
