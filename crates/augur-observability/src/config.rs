//! Logging configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive (trace, debug, info, warn, error, or a full `EnvFilter` string)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit one JSON object per event
    #[serde(default)]
    pub json_format: bool,

    /// Also append events to this file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,

    /// Per-module levels, e.g. `"augur_gateway": "debug"`
    #[serde(default)]
    pub module_levels: HashMap<String, String>,

    #[serde(default = "default_true")]
    pub ansi_colors: bool,

    #[serde(default = "default_true")]
    pub include_target: bool,

    #[serde(default)]
    pub include_thread_id: bool,

    #[serde(default = "default_true")]
    pub include_line_number: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            file_path: None,
            module_levels: HashMap::new(),
            ansi_colors: true,
            include_target: true,
            include_thread_id: false,
            include_line_number: true,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_json_format(mut self, json: bool) -> Self {
        self.json_format = json;
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_module_level(mut self, module: impl Into<String>, level: impl Into<String>) -> Self {
        self.module_levels.insert(module.into(), level.into());
        self
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config: LoggingConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, LoggingConfig::default());
        assert_eq!(config.level, "info");
        assert!(config.ansi_colors);
    }

    #[test]
    fn test_builders() {
        let config = LoggingConfig::default()
            .with_level("debug")
            .with_json_format(true)
            .with_module_level("augur_gateway", "trace");
        assert_eq!(config.level, "debug");
        assert!(config.json_format);
        assert_eq!(config.module_levels["augur_gateway"], "trace");
    }
}
