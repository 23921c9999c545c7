use augur_observability::LoggingConfig;
use serde::{Deserialize, Serialize};

/// Main configuration document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub markets: MarketsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            gateway: GatewayConfig::default(),
            client: ClientConfig::default(),
            engine: EngineConfig::default(),
            markets: MarketsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl Config {
    /// Read a value by dotted key, e.g. `gateway.bind`
    pub fn get_value(&self, key: &str) -> Option<String> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["version"] => Some(self.version.clone()),
            ["gateway", "bind"] => Some(self.gateway.bind.clone()),
            ["gateway", "auth_token"] => self.gateway.auth_token.clone(),
            ["gateway", "max_connections"] => Some(self.gateway.max_connections.to_string()),
            ["gateway", "heartbeat_interval_secs"] => {
                Some(self.gateway.heartbeat_interval_secs.to_string())
            }
            ["client", "url"] => Some(self.client.url.clone()),
            ["client", "user_id"] => self.client.user_id.clone(),
            ["client", "max_reconnect_attempts"] => {
                Some(self.client.max_reconnect_attempts.to_string())
            }
            ["client", "reconnect_base_delay_ms"] => {
                Some(self.client.reconnect_base_delay_ms.to_string())
            }
            ["engine", "base_url"] => Some(self.engine.base_url.clone()),
            ["engine", "model"] => Some(self.engine.model.clone()),
            ["engine", "api_key_env"] => Some(self.engine.api_key_env.clone()),
            ["engine", "timeout_seconds"] => Some(self.engine.timeout_seconds.to_string()),
            ["markets", "base_url"] => Some(self.markets.base_url.clone()),
            ["markets", "search_limit"] => Some(self.markets.search_limit.to_string()),
            ["markets", "timeout_seconds"] => Some(self.markets.timeout_seconds.to_string()),
            ["logging", "level"] => Some(self.logging.level.clone()),
            ["logging", "json_format"] => Some(self.logging.json_format.to_string()),
            _ => None,
        }
    }

    /// Set a value by dotted key
    pub fn set_value(&mut self, key: &str, value: &str) -> ConfigResult<()> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["gateway", "bind"] => self.gateway.bind = value.to_string(),
            ["gateway", "auth_token"] => {
                self.gateway.auth_token = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            ["gateway", "max_connections"] => self.gateway.max_connections = parse_number(value)?,
            ["gateway", "heartbeat_interval_secs"] => {
                self.gateway.heartbeat_interval_secs = parse_number(value)?
            }
            ["client", "url"] => self.client.url = value.to_string(),
            ["client", "user_id"] => self.client.user_id = Some(value.to_string()),
            ["client", "max_reconnect_attempts"] => {
                self.client.max_reconnect_attempts = parse_number(value)?
            }
            ["client", "reconnect_base_delay_ms"] => {
                self.client.reconnect_base_delay_ms = parse_number(value)?
            }
            ["engine", "base_url"] => self.engine.base_url = value.to_string(),
            ["engine", "model"] => self.engine.model = value.to_string(),
            ["engine", "api_key_env"] => self.engine.api_key_env = value.to_string(),
            ["engine", "timeout_seconds"] => self.engine.timeout_seconds = parse_number(value)?,
            ["markets", "base_url"] => self.markets.base_url = value.to_string(),
            ["markets", "search_limit"] => self.markets.search_limit = parse_number(value)?,
            ["markets", "timeout_seconds"] => self.markets.timeout_seconds = parse_number(value)?,
            ["logging", "level"] => self.logging.level = value.to_string(),
            ["logging", "json_format"] => {
                self.logging.json_format = value
                    .parse()
                    .map_err(|_| ConfigError::Validation(format!("Invalid boolean: {}", value)))?;
            }
            _ => return Err(ConfigError::KeyNotFound(key.to_string())),
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(value: &str) -> ConfigResult<T> {
    value
        .parse()
        .map_err(|_| ConfigError::Validation(format!("Invalid number: {}", value)))
}

/// Gateway settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Bind address (e.g., "127.0.0.1:8787")
    pub bind: String,
    /// Shared secret expected in `auth.token`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    pub max_connections: usize,
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

/// Chat client settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Gateway URL
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub max_reconnect_attempts: u32,
    /// Delay before attempt `k` is `k` times this
    pub reconnect_base_delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8787".to_string(),
            user_id: None,
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 2000,
        }
    }
}

/// OpenAI-compatible chat completion endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Replaces the built-in system prompt when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            system_prompt: None,
            timeout_seconds: 120,
        }
    }
}

impl EngineConfig {
    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|key| !key.is_empty())
    }
}

/// Market data API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MarketsConfig {
    pub base_url: String,
    /// Markets folded into each prompt
    pub search_limit: usize,
    pub timeout_seconds: u64,
}

impl Default for MarketsConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3001/api".to_string(),
            search_limit: 5,
            timeout_seconds: 10,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
