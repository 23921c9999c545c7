//! Augur Observability
//!
//! `tracing` subscriber setup with a reloadable filter, optional JSON and
//! file output, and span helpers shared by the gateway and binaries.

pub mod config;
pub mod error;
pub mod logging;

pub use config::LoggingConfig;
pub use error::{ObservabilityError, Result};
pub use logging::{connection_span, turn_span, LogManager};
