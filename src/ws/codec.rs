//! Conversion between WebSocket text frames and [`MessageEnvelope`]s.

use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

#[cfg(feature = "tracing")]
use super::error::WsError;
use super::traits::FrameCodec;
use crate::Result;

/// Envelope type used when an inbound frame carries no `type` discriminator.
pub const DEFAULT_MESSAGE_TYPE: &str = "message";

fn default_message_type() -> String {
    DEFAULT_MESSAGE_TYPE.to_owned()
}

/// Typed wrapper around every inbound and outbound message.
///
/// The payload keeps whatever shape the remote end sent. Envelopes are immutable once
/// built; use the accessors to read them.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
pub struct MessageEnvelope {
    #[serde(rename = "type", default = "default_message_type")]
    #[builder(into, default = default_message_type())]
    msg_type: String,
    #[serde(default)]
    #[builder(default)]
    payload: Value,
}

impl MessageEnvelope {
    #[must_use]
    pub fn new<T: Into<String>>(msg_type: T, payload: Value) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload,
        }
    }

    /// The message discriminator, `"message"` when the frame did not carry one.
    #[must_use]
    pub fn msg_type(&self) -> &str {
        &self.msg_type
    }

    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    #[must_use]
    pub fn into_payload(self) -> Value {
        self.payload
    }

    /// Text of a frame that could not be parsed as JSON.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.payload.get("text").and_then(Value::as_str)
    }
}

/// How outbound envelopes are put on the wire.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutboundFormat {
    /// `{"type": ..., "payload": ...}`
    #[default]
    Envelope,
    /// Only the payload, for endpoints that expect their own message shape
    PayloadOnly,
}

/// JSON codec used by default.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec {
    pub outbound: OutboundFormat,
}

impl JsonCodec {
    #[must_use]
    pub const fn new(outbound: OutboundFormat) -> Self {
        Self { outbound }
    }

    #[must_use]
    pub const fn payload_only() -> Self {
        Self::new(OutboundFormat::PayloadOnly)
    }
}

impl FrameCodec for JsonCodec {
    fn decode(&self, frame: &str) -> MessageEnvelope {
        decode_text(frame)
    }

    fn encode(&self, envelope: &MessageEnvelope) -> Result<String> {
        let text = match self.outbound {
            OutboundFormat::Envelope => serde_json::to_string(envelope)?,
            OutboundFormat::PayloadOnly => serde_json::to_string(&envelope.payload)?,
        };
        Ok(text)
    }
}

/// Decode a raw text frame.
///
/// Valid JSON becomes the payload as-is, typed by its `type` field when that is a
/// non-empty string. Anything else is wrapped as `{"text": <frame>}`.
#[must_use]
pub fn decode_text(frame: &str) -> MessageEnvelope {
    match serde_json::from_str::<Value>(frame) {
        Ok(value) => decode_value(value),
        Err(e) => {
            #[cfg(feature = "tracing")]
            tracing::trace!(error = %WsError::MalformedFrame(e), "Wrapping non-JSON frame as text");
            #[cfg(not(feature = "tracing"))]
            let _: serde_json::Error = e;

            MessageEnvelope::new(DEFAULT_MESSAGE_TYPE, json!({ "text": frame }))
        }
    }
}

/// Wrap an already structured value, normalizing a missing `type` to `"message"`.
#[must_use]
pub fn decode_value(value: Value) -> MessageEnvelope {
    let msg_type = value
        .get("type")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_MESSAGE_TYPE)
        .to_owned();

    MessageEnvelope {
        msg_type,
        payload: value,
    }
}
