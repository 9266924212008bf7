//! Live channel frames.
//!
//! Every frame is one JSON text message shaped as
//! `{"type": "<discriminator>", "payload": {...}}`. The payload is absent for
//! `ping`/`pong`.
//!
//! Decoding mirrors an opcode dispatch: the discriminator is read first, then
//! the payload is decoded into the type that discriminator names. Unknown
//! discriminators decode to [`ServerEvent::Unknown`] so newer servers can add
//! event types without breaking older clients.
//!
//! # Invariants
//!
//! - Size is checked before any JSON parsing.
//! - Decoding never panics, whatever the input.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    MessageRecord, ServerMessageId, UserId,
    errors::{ProtocolError, Result},
};

/// Maximum accepted size of a single frame (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Envelope shared by both directions.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    payload: Value,
}

/// Events pushed by the server on the live channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A message was persisted. May belong to any of the user's conversations.
    NewMessage(MessageRecord),
    /// A message was read by its receiver.
    MessageRead(ReadReceipt),
    /// Heartbeat response.
    Pong,
    /// Server-side error notification.
    Error(ErrorPayload),
    /// Discriminator this client does not understand.
    Unknown(String),
}

/// Read receipt payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    /// Message that was read.
    #[serde(alias = "_id", alias = "messageId")]
    pub id: ServerMessageId,
    /// Who read it, if the server says.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reader_id: Option<UserId>,
}

/// Error payload for `error` frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// HTTP-style status code.
    pub code: u16,
    /// Human-readable error message.
    #[serde(default)]
    pub message: String,
}

impl ErrorPayload {
    /// Credential missing or expired.
    pub const UNAUTHORIZED: u16 = 401;
    /// Credential valid but not allowed on this channel.
    pub const FORBIDDEN: u16 = 403;

    /// Create an error payload.
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    /// Whether the server is rejecting our credential.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self.code, Self::UNAUTHORIZED | Self::FORBIDDEN)
    }
}

impl ServerEvent {
    /// Discriminator written in the `type` field.
    pub fn kind(&self) -> &str {
        match self {
            Self::NewMessage(_) => "new_message",
            Self::MessageRead(_) => "message_read",
            Self::Pong => "pong",
            Self::Error(_) => "error",
            Self::Unknown(kind) => kind,
        }
    }

    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooLarge` if `text` exceeds [`MAX_FRAME_SIZE`]
    /// - `ProtocolError::Malformed` if `text` is not an envelope
    /// - `ProtocolError::InvalidPayload` if the payload does not match the
    ///   discriminator
    pub fn decode(text: &str) -> Result<Self> {
        if text.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge { size: text.len(), max: MAX_FRAME_SIZE });
        }

        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        let event = match envelope.kind.as_str() {
            "new_message" | "newMessage" | "message" => {
                Self::NewMessage(payload(&envelope.kind, envelope.payload)?)
            },
            "message_read" | "messageRead" => {
                Self::MessageRead(payload(&envelope.kind, envelope.payload)?)
            },
            "pong" => Self::Pong,
            "error" => Self::Error(payload(&envelope.kind, envelope.payload)?),
            _ => Self::Unknown(envelope.kind),
        };

        Ok(event)
    }

    /// Encode as a text frame. Used by test servers and fixtures.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Encode` if a payload fails to serialize
    pub fn encode(&self) -> Result<String> {
        let payload = match self {
            Self::NewMessage(record) => to_value(record)?,
            Self::MessageRead(receipt) => to_value(receipt)?,
            Self::Error(error) => to_value(error)?,
            Self::Pong | Self::Unknown(_) => Value::Null,
        };

        let envelope = Envelope { kind: self.kind().to_owned(), payload };
        serde_json::to_string(&envelope).map_err(|e| ProtocolError::Encode(e.to_string()))
    }
}

/// Frames written by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientFrame {
    /// Heartbeat request. Servers answer with a `pong` event or, when it
    /// travels as a websocket ping, a protocol-level pong.
    Ping,
}

impl ClientFrame {
    /// Encode as a text frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Encode` if serialization fails
    pub fn encode(&self) -> Result<String> {
        let kind = match self {
            Self::Ping => "ping",
        };
        let envelope = Envelope { kind: kind.to_owned(), payload: Value::Null };
        serde_json::to_string(&envelope).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Decode a client frame. Used by test servers.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Malformed` if the frame is not a known client frame
    pub fn decode(text: &str) -> Result<Self> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        match envelope.kind.as_str() {
            "ping" => Ok(Self::Ping),
            other => Err(ProtocolError::Malformed(format!("unknown client frame: {other}"))),
        }
    }
}

fn payload<T: serde::de::DeserializeOwned>(kind: &str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidPayload {
        kind: kind.to_owned(),
        reason: e.to_string(),
    })
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| ProtocolError::Encode(e.to_string()))
}
