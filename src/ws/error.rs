#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;

/// WebSocket error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// The transport for the requested URL could not be constructed (malformed URL,
    /// unsupported scheme). Not retried.
    TransportConstruction(String),
    /// Error connecting to or communicating with the WebSocket server
    Connection(tokio_tungstenite::tungstenite::Error),
    /// A send was attempted while the connection was not established
    NotConnected,
    /// The transport closed or errored without an explicit `close()`
    UnexpectedDisconnect,
    /// An inbound frame could not be parsed as structured data
    MalformedFrame(serde_json::Error),
    /// Subscription stream lagged and missed messages
    Lagged {
        /// Number of messages that were missed
        count: u64,
    },
    /// The connection driver has exited and no longer accepts commands
    Shutdown,
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransportConstruction(reason) => {
                write!(f, "Unable to construct WebSocket transport: {reason}")
            }
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::NotConnected => write!(f, "WebSocket is not connected"),
            Self::UnexpectedDisconnect => write!(f, "WebSocket disconnected unexpectedly"),
            Self::MalformedFrame(e) => write!(f, "Malformed WebSocket frame: {e}"),
            Self::Lagged { count } => write!(f, "Subscription lagged, missed {count} messages"),
            Self::Shutdown => write!(f, "WebSocket connection manager has shut down"),
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            Self::MalformedFrame(e) => Some(e),
            _ => None,
        }
    }
}

// Integration with main Error type
impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for crate::error::Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, WsError::Connection(e))
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn lagged_display_includes_count() {
        assert_eq!(
            WsError::Lagged { count: 7 }.to_string(),
            "Subscription lagged, missed 7 messages"
        );
    }

    #[test]
    fn malformed_frame_exposes_source() {
        let parse = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let error = WsError::MalformedFrame(parse);

        assert!(error.source().is_some(), "serde error should be the source");
    }
}
