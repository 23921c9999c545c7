pub mod config;
pub mod manager;

pub use augur_observability::LoggingConfig;
pub use config::{
    ClientConfig, Config, ConfigError, ConfigResult, EngineConfig, GatewayConfig, MarketsConfig,
};
pub use manager::ConfigManager;

use std::path::PathBuf;

/// `~/.augur`
pub fn augur_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".augur"))
}

pub fn default_config_path() -> Option<PathBuf> {
    augur_dir().map(|dir| dir.join("config.json"))
}

pub fn default_log_path() -> Option<PathBuf> {
    augur_dir().map(|dir| dir.join("logs").join("augur.log"))
}

/// Expand a leading `~/` to the home directory
pub fn expand_tilde(path: &str) -> Option<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir().map(|home| home.join(rest)),
        None => Some(PathBuf::from(path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_augur_dir() {
        let dir = augur_dir();
        assert!(dir.is_some());
        assert!(dir.unwrap().to_string_lossy().contains(".augur"));
    }

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde("~/.augur/config.json").unwrap();
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert_eq!(expand_tilde("/etc/augur.json"), Some(PathBuf::from("/etc/augur.json")));
    }
}
