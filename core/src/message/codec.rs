// Message codec — JSON text framing with size limits

use super::types::{ClientMessage, ServerMessage};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Maximum encoded message size: 256 KB.
/// SDP blobs are the largest payloads and stay far below this.
pub const MAX_MESSAGE_SIZE: usize = 256 * 1024;

/// Name of the discriminator field
pub const KIND_FIELD: &str = "id";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Malformed message: {0}")]
    Malformed(String),
    #[error("Unrecognized message kind: {0}")]
    Unrecognized(String),
}

/// A tagged record that can cross the signaling socket
pub trait Envelope: Serialize + DeserializeOwned {
    /// Every discriminator value this envelope type understands
    const KINDS: &'static [&'static str];
}

impl Envelope for ServerMessage {
    const KINDS: &'static [&'static str] = ServerMessage::KINDS;
}

impl Envelope for ClientMessage {
    const KINDS: &'static [&'static str] = ClientMessage::KINDS;
}

/// Serialize an envelope to a text frame
pub fn encode<T: Envelope>(envelope: &T) -> Result<String, CodecError> {
    let text = serde_json::to_string(envelope).map_err(|e| CodecError::Malformed(e.to_string()))?;

    if text.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::Malformed(format!(
            "Encoded message too large: {} bytes (max {})",
            text.len(),
            MAX_MESSAGE_SIZE
        )));
    }

    Ok(text)
}

/// Parse a text frame.
///
/// Unknown `id` values are reported as `Unrecognized` so callers can tell a
/// newer coordinator apart from garbage on the wire.
pub fn decode<T: Envelope>(text: &str) -> Result<T, CodecError> {
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::Malformed(format!(
            "Message too large: {} bytes (max {})",
            text.len(),
            MAX_MESSAGE_SIZE
        )));
    }

    let value: Value = serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))?;

    let kind = value
        .get(KIND_FIELD)
        .and_then(Value::as_str)
        .ok_or_else(|| CodecError::Malformed(format!("missing string field `{}`", KIND_FIELD)))?;

    if !T::KINDS.contains(&kind) {
        return Err(CodecError::Unrecognized(kind.to_string()));
    }

    serde_json::from_value(value).map_err(|e| CodecError::Malformed(e.to_string()))
}

/// Decode an inbound frame from the coordinator
pub fn decode_server(text: &str) -> Result<ServerMessage, CodecError> {
    decode(text)
}

/// Encode an outbound frame for the coordinator
pub fn encode_client(msg: &ClientMessage) -> Result<String, CodecError> {
    encode(msg)
}
