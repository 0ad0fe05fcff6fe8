//! Codec traits and implementations.
//!
//! There are two layers of codec here:
//!
//! - [`Codec`] is the generic serde strategy: any `Serialize` type in,
//!   bytes out. [`JsonCodec`] is the implementation, and the connector
//!   uses it as the "raw" fallback when nothing more specific is plugged in.
//! - [`MessageEncoder`] / [`MessageDecoder`] are object-safe hooks that
//!   work on the connector's own envelope. A deployment can install a
//!   custom pair on the connector, and a transport can offer a default
//!   pair (the WebSocket transport offers [`EnvelopeCodec`]).
//!
//! The connector picks, in order: custom hook, transport default, raw.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{Message, ProtocolError};

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `encode` and `decode` are generic, which keeps the trait out of
/// `dyn` land; use [`MessageEncoder`] / [`MessageDecoder`] when a codec
/// has to be swapped at runtime.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// ## Example
///
/// ```rust
/// use gatehouse_protocol::{Codec, JsonCodec, Message};
///
/// let codec = JsonCodec;
/// let msg: Message = codec
///     .decode(br#"{"id":1,"route":"chat.send","body":{"text":"hi"}}"#)
///     .unwrap();
/// assert_eq!(msg.route, "chat.send");
/// assert_eq!(msg.id, Some(1));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

// ---------------------------------------------------------------------------
// Runtime-swappable hooks
// ---------------------------------------------------------------------------

/// Turns an outbound message into the bytes handed to the push dispatcher.
///
/// Returning `None` (or an empty buffer) means "nothing to send"; the
/// connector reports that as an encode error and never forwards it.
pub trait MessageEncoder: Send + Sync + 'static {
    /// Encodes `body` for delivery on `route`, correlated by `request_id`.
    fn encode(&self, request_id: Option<u64>, route: &str, body: &Value) -> Option<Vec<u8>>;
}

/// Turns an inbound payload into a [`Message`].
///
/// Returning `None` means the payload carries nothing usable; the
/// connector discards it without closing the connection.
pub trait MessageDecoder: Send + Sync + 'static {
    /// Decodes one inbound payload.
    fn decode(&self, data: &[u8]) -> Option<Message>;
}

// ---------------------------------------------------------------------------
// EnvelopeCodec
// ---------------------------------------------------------------------------

/// JSON envelope codec: outbound frames carry `{id?, route, body}`.
///
/// Inbound payloads are parsed as [`Message`]. Outbound responses keep
/// their correlation id and route so a client can match them to the
/// request that caused them, regardless of arrival order.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeCodec;

#[derive(Serialize)]
struct OutboundFrame<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    route: &'a str,
    body: &'a Value,
}

impl MessageEncoder for EnvelopeCodec {
    fn encode(&self, request_id: Option<u64>, route: &str, body: &Value) -> Option<Vec<u8>> {
        let frame = OutboundFrame {
            id: request_id,
            route,
            body,
        };
        JsonCodec.encode(&frame).ok()
    }
}

impl MessageDecoder for EnvelopeCodec {
    fn decode(&self, data: &[u8]) -> Option<Message> {
        JsonCodec.decode(data).ok()
    }
}
