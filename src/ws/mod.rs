//! Core WebSocket infrastructure.
//!
//! This module provides a connection manager that owns one WebSocket connection and
//! exposes it as two broadcast channels: decoded messages and connection status.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: connection lifecycle, teardown, and fixed-delay reconnection
//! - [`FrameCodec`]: trait for turning text frames into [`MessageEnvelope`]s and back
//! - [`MessageBus`]: fan-out of inbound envelopes, no replay
//! - [`StatusBus`]: connected/disconnected status, replayed to late subscribers
//! - [`ReconnectPolicy`]: decides whether and when to retry
//!
//! # Example
//!
//! ```ignore
//! let manager = ConnectionManager::new(Config::default())?;
//! let mut status = manager.status();
//! let messages = manager.messages().filter_type("ticker");
//!
//! manager.connect("wss://stream.example/ticker");
//! ```

pub mod bus;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod reconnect;
pub mod traits;

pub use bus::{MessageBus, MessageSubscription, StatusBus, StatusSubscription};
pub use codec::{DEFAULT_MESSAGE_TYPE, JsonCodec, MessageEnvelope, OutboundFormat};
pub use connection::{ConnectionManager, ConnectionState};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use reconnect::ReconnectPolicy;
pub use traits::*;
