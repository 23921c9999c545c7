//! Augur Client - reconnecting transport for chat frontends
//!
//! Connects to the gateway, authenticates, reassembles streamed replies in
//! a [`ChatStore`], and publishes every change through a `watch` channel.

pub mod config;
pub mod store;
pub mod text;
pub mod transport;

pub use config::{ClientConfig, ReconnectPolicy};
pub use store::{ChatStore, ConnectionStatus};
pub use transport::{ClientError, TransportClient};
