//! Message protocol definitions
//!
//! JSON-based message protocol using Serde's tagged enum. Every frame is an
//! object whose `type` field names the variant; decoding dispatches on that
//! field alone before parsing the variant fields.

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Room event message
///
/// The same set is used in both directions. Uses tagged enum with
/// snake_case naming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Failure reported to a peer before its connection is closed
    Error { error: String },
    /// Host asks the room to leave the waiting phase
    Start,
    /// A participant named `name` joined the room
    Join { name: String },
}

/// Wire discriminator of a [`Message`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Error,
    Start,
    Join,
}

impl MessageKind {
    /// Parse a wire discriminator
    pub fn from_wire(kind: &str) -> Option<Self> {
        match kind {
            "error" => Some(MessageKind::Error),
            "start" => Some(MessageKind::Start),
            "join" => Some(MessageKind::Join),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Error => "error",
            MessageKind::Start => "start",
            MessageKind::Join => "join",
        }
    }
}

/// Just the discriminator of an incoming frame
#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

impl Message {
    /// Build an `Error` message from anything displayable
    pub fn error(err: impl std::fmt::Display) -> Self {
        Message::Error {
            error: err.to_string(),
        }
    }

    /// Build a `Join` message
    pub fn join(name: impl Into<String>) -> Self {
        Message::Join { name: name.into() }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Error { .. } => MessageKind::Error,
            Message::Start => MessageKind::Start,
            Message::Join { .. } => MessageKind::Join,
        }
    }

    /// Encode to a JSON text frame
    pub fn encode(&self) -> Result<String, CodecError> {
        serde_json::to_string(self).map_err(CodecError::Encode)
    }

    /// Decode a JSON frame
    ///
    /// Reads the `type` discriminator first; an unrecognized value fails with
    /// [`CodecError::UnknownMessageType`] carrying the literal value. Anything
    /// else that does not parse is [`CodecError::MalformedMessage`].
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let envelope: Envelope =
            serde_json::from_slice(bytes).map_err(CodecError::MalformedMessage)?;

        if MessageKind::from_wire(&envelope.kind).is_none() {
            return Err(CodecError::UnknownMessageType(envelope.kind));
        }

        serde_json::from_slice(bytes).map_err(CodecError::MalformedMessage)
    }
}
