//! Core traits for the WebSocket connection manager.

use super::codec::MessageEnvelope;

/// Frame codec trait for converting between wire text and envelopes.
///
/// The connection manager decodes every inbound text frame (and every binary frame
/// that is valid UTF-8) with [`decode`](Self::decode), and encodes outbound envelopes
/// with [`encode`](Self::encode) before handing them to the transport.
///
/// Decoding is infallible: a frame that cannot be understood structurally must still
/// produce an envelope so that no inbound text is lost.
///
/// # Example
///
/// ```ignore
/// pub struct UppercaseCodec;
///
/// impl FrameCodec for UppercaseCodec {
///     fn decode(&self, frame: &str) -> MessageEnvelope {
///         MessageEnvelope::new("shout", json!({ "text": frame.to_uppercase() }))
///     }
///
///     fn encode(&self, envelope: &MessageEnvelope) -> crate::Result<String> {
///         Ok(envelope.payload().to_string())
///     }
/// }
/// ```
pub trait FrameCodec: Send + Sync + 'static {
    /// Decode an inbound text frame.
    fn decode(&self, frame: &str) -> MessageEnvelope;

    /// Encode an outbound envelope into a text frame.
    fn encode(&self, envelope: &MessageEnvelope) -> crate::Result<String>;
}
