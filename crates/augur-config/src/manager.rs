use crate::config::{Config, ConfigError, ConfigResult};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

static ENV_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid"));

/// Loads, validates and persists the configuration file
#[derive(Debug, Clone)]
pub struct ConfigManager {
    path: PathBuf,
    config: Arc<RwLock<Config>>,
}

impl ConfigManager {
    /// Load the configuration file, writing defaults if it does not exist
    pub async fn load(path: &Path) -> ConfigResult<Self> {
        let config = if path.exists() {
            info!("Loading config from {:?}", path);
            Self::read(path).await?
        } else {
            info!("Config file not found, creating default config at {:?}", path);
            let default_config = Config::default();
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let content = serde_json::to_string_pretty(&default_config)?;
            tokio::fs::write(path, &content).await?;
            default_config
        };

        Ok(Self::new(config, path.to_path_buf()))
    }

    /// Load from `~/.augur/config.json`
    pub async fn load_default() -> ConfigResult<Self> {
        let config_path = Self::default_config_path()?;
        Self::load(&config_path).await
    }

    pub fn default_config_path() -> ConfigResult<PathBuf> {
        crate::default_config_path()
            .ok_or_else(|| ConfigError::InvalidPath("Could not find home directory".to_string()))
    }

    /// Wrap an in-memory config, e.g. for tests
    pub fn new(config: Config, path: PathBuf) -> Self {
        Self {
            path,
            config: Arc::new(RwLock::new(config)),
        }
    }

    pub fn get(&self) -> Arc<RwLock<Config>> {
        Arc::clone(&self.config)
    }

    /// Clone of the current config
    pub async fn snapshot(&self) -> Config {
        self.config.read().await.clone()
    }

    pub async fn save(&self) -> ConfigResult<()> {
        self.save_to(&self.path).await?;
        info!("Config saved to {:?}", self.path);
        Ok(())
    }

    pub async fn save_to(&self, path: &Path) -> ConfigResult<()> {
        let content = {
            let config = self.config.read().await;
            serde_json::to_string_pretty(&*config)?
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Re-read the file; the current config is kept if the new one is invalid
    pub async fn reload(&self) -> ConfigResult<()> {
        if !self.path.exists() {
            return Err(ConfigError::InvalidPath(format!(
                "Config file not found: {:?}",
                self.path
            )));
        }

        let new_config = Self::read(&self.path).await?;
        *self.config.write().await = new_config;

        info!("Config reloaded from {:?}", self.path);
        Ok(())
    }

    /// Apply `f`, validate, and save
    pub async fn update<F>(&self, f: F) -> ConfigResult<()>
    where
        F: FnOnce(&mut Config),
    {
        {
            let mut config = self.config.write().await;
            let mut next = config.clone();
            f(&mut next);
            Self::validate(&next)?;
            *config = next;
        }
        self.save().await
    }

    pub fn validate(config: &Config) -> ConfigResult<()> {
        if config.gateway.bind.trim().is_empty() {
            return Err(ConfigError::Validation("Gateway bind address cannot be empty".to_string()));
        }

        if config.gateway.bind.ends_with(":0") {
            return Err(ConfigError::Validation("Gateway port cannot be 0".to_string()));
        }

        if config.gateway.max_connections == 0 {
            return Err(ConfigError::Validation(
                "Gateway max_connections must be greater than 0".to_string(),
            ));
        }

        if config.client.max_reconnect_attempts == 0 {
            return Err(ConfigError::Validation(
                "Client max_reconnect_attempts must be greater than 0".to_string(),
            ));
        }

        if config.client.reconnect_base_delay_ms == 0 {
            return Err(ConfigError::Validation(
                "Client reconnect_base_delay_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    async fn read(path: &Path) -> ConfigResult<Config> {
        let content = tokio::fs::read_to_string(path).await?;
        let content = Self::expand_env_vars(&content)?;
        let config: Config = serde_json::from_str(&content)?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Expand `${VAR}` or `${VAR:-default}`.
    ///
    /// Environment values are JSON-escaped so quotes and backslashes survive
    /// inside string literals. Defaults are file text and are kept verbatim.
    pub fn expand_env_vars(content: &str) -> ConfigResult<String> {
        let mut missing = None;
        let expanded = ENV_VAR.replace_all(content, |caps: &Captures| {
            let expr = &caps[1];
            let (name, default) = match expr.split_once(":-") {
                Some((name, default)) => (name, Some(default)),
                None => (expr, None),
            };
            match (std::env::var(name), default) {
                (Ok(value), _) => json_escape(&value),
                (Err(_), Some(default)) => default.to_string(),
                (Err(_), None) => {
                    missing.get_or_insert_with(|| name.to_string());
                    String::new()
                }
            }
        });

        match missing {
            Some(name) => Err(ConfigError::EnvVarNotFound(name)),
            None => Ok(expanded.into_owned()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Escape `value` for use inside a JSON string literal
fn json_escape(value: &str) -> String {
    let quoted = serde_json::Value::String(value.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}
