//! Structured logging
//!
//! Installs a `tracing` subscriber whose filter can be swapped at runtime.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, MakeWriter},
    layer::{Layered, SubscriberExt},
    registry::LookupSpan,
    reload::{self, Handle},
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::LoggingConfig;
use crate::error::{ObservabilityError, Result};

/// Reload handle for the active filter
type ReloadHandle = Handle<EnvFilter, Registry>;

type FilteredRegistry = Layered<reload::Layer<EnvFilter, Registry>, Registry>;

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// Owns the installed subscriber's reload handle and file writer
#[derive(Debug)]
pub struct LogManager {
    config: LoggingConfig,
    reload_handle: ReloadHandle,
    /// Flushes the file writer on drop
    _file_guard: Option<WorkerGuard>,
}

impl LogManager {
    /// Install the global subscriber.
    ///
    /// Fails if the configuration is invalid or a subscriber is already set.
    pub fn init(config: LoggingConfig) -> Result<Self> {
        let filter = Self::build_filter(&config)?;
        let (filter, reload_handle) = reload::Layer::new(filter);

        let mut layers: Vec<BoxedLayer<FilteredRegistry>> =
            vec![output_layer(&config, std::io::stderr, config.ansi_colors)];

        let file_guard = match &config.file_path {
            Some(path) => {
                let (writer, guard) = file_writer(path)?;
                layers.push(output_layer(&config, writer, false));
                Some(guard)
            }
            None => None,
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(layers)
            .try_init()
            .map_err(|e| ObservabilityError::logging(format!("Failed to install subscriber: {}", e)))?;

        tracing::info!(
            target: "augur_observability",
            "Log manager initialized with level: {}",
            config.level
        );

        Ok(Self {
            config,
            reload_handle,
            _file_guard: file_guard,
        })
    }

    /// Build the filter from the base level and per-module overrides
    pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
        let mut filter = EnvFilter::try_new(&config.level)
            .map_err(|e| ObservabilityError::logging(format!("Invalid log level: {}", e)))?;

        for (module, level) in &config.module_levels {
            filter = filter.add_directive(
                format!("{}={}", module, level)
                    .parse()
                    .map_err(|e| ObservabilityError::logging(format!("Invalid directive: {}", e)))?,
            );
        }

        Ok(filter)
    }

    /// Swap the base level at runtime, keeping module overrides
    pub fn update_level(&mut self, level: &str) -> Result<()> {
        let mut next = self.config.clone();
        next.level = level.to_string();
        let filter = Self::build_filter(&next)?;

        self.reload_handle
            .modify(|current| *current = filter)
            .map_err(|e| ObservabilityError::logging(format!("Failed to update log level: {}", e)))?;
        self.config = next;

        tracing::info!(target: "augur_observability", "Log level updated to: {}", level);
        Ok(())
    }

    pub fn config(&self) -> &LoggingConfig {
        &self.config
    }
}

fn output_layer<S, W>(config: &LoggingConfig, writer: W, ansi: bool) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_id)
        .with_line_number(config.include_line_number)
        .with_ansi(ansi);

    if config.json_format {
        layer.json().boxed()
    } else {
        layer.boxed()
    }
}

fn file_writer(path: &Path) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let file_name = path
        .file_name()
        .ok_or_else(|| ObservabilityError::config(format!("Not a file path: {}", path.display())))?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let appender = tracing_appender::rolling::never(dir, file_name);
    Ok(tracing_appender::non_blocking(appender))
}

/// Span for everything that happens on one WebSocket connection
pub fn connection_span(connection_id: &str) -> tracing::Span {
    tracing::info_span!("connection", connection_id = %connection_id)
}

/// Span for one conversational turn
pub fn turn_span(user_id: &str, session_id: &str) -> tracing::Span {
    tracing::info_span!("turn", user_id = %user_id, session_id = %session_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_accepts_module_levels() {
        let config = LoggingConfig::default()
            .with_level("warn")
            .with_module_level("augur_gateway", "debug");
        assert!(LogManager::build_filter(&config).is_ok());
    }

    #[test]
    fn test_filter_rejects_bad_module_level() {
        let config = LoggingConfig::default().with_module_level("augur_gateway", "loud");
        let err = LogManager::build_filter(&config).unwrap_err();
        assert_eq!(err.category(), "logging");
    }

    #[test]
    fn test_file_writer_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("augur.log");
        let (_writer, _guard) = file_writer(&path).unwrap();
        assert!(dir.path().join("logs").is_dir());
    }

    #[test]
    fn test_create_spans() {
        let span = connection_span("conn-1");
        assert_eq!(span.metadata().unwrap().name(), "connection");

        let span = turn_span("u1", "s-1");
        assert_eq!(span.metadata().unwrap().name(), "turn");
    }

    #[test]
    fn test_init_then_update_level() {
        let mut manager = LogManager::init(LoggingConfig::default().with_level("info")).unwrap();
        manager.update_level("debug").unwrap();
        assert_eq!(manager.config().level, "debug");

        // Only one global subscriber per process
        assert!(LogManager::init(LoggingConfig::default()).is_err());
    }
}
