//! Augur Gateway - WebSocket relay for real-time assistant sessions
//!
//! Accepts chat clients, binds each authenticated connection to a client
//! session, and relays the reasoning engine's streamed output back as
//! `stream` / `status` envelopes.

mod connection;
mod gateway;
mod registry;
mod session;
mod turn;

pub use connection::{ConnectionError, ConnectionHandle, ConnectionPool, ConnectionState};
pub use gateway::{FrameOutcome, Gateway, GatewayConfig, GatewayError};
pub use registry::ReasoningSessionRegistry;
pub use session::{ClientSession, ClientSessionHandle, ClientSessionTable};
pub use turn::TurnError;
