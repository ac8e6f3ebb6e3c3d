//! Error types for the room server
//!
//! Codec, transport, client and room errors, plus the handler-level
//! `AppError`. Uses thiserror for ergonomic error definitions.

use thiserror::Error;

use crate::types::{ClientId, RoomId};

/// Message codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    /// The discriminator names no known message variant
    #[error("unknown message type {0:?}")]
    UnknownMessageType(String),

    /// Invalid JSON, missing discriminator, or bad variant fields
    #[error("malformed message: {0}")]
    MalformedMessage(#[source] serde_json::Error),

    /// Serializer failure while encoding
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Transport-level errors reported by a connection
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection was closed gracefully (or was already closed)
    #[error("connection closed")]
    ConnectionClosed,

    /// The peer went away without a closing handshake
    #[error("connection closed unexpectedly: {0}")]
    UnexpectedClose(String),

    /// WebSocket protocol violation or other transport failure
    #[error("transport protocol error: {0}")]
    Protocol(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether this error means the peer disappeared abnormally
    pub fn is_abnormal_close(&self) -> bool {
        matches!(self, TransportError::UnexpectedClose(_))
    }

    /// Whether the connection is gone, gracefully or not
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionClosed | TransportError::UnexpectedClose(_)
        )
    }
}

/// Message send errors
///
/// Occurs when a message cannot be queued for a client.
#[derive(Debug, Error)]
pub enum SendError {
    /// The client has been closed and accepts no more messages
    #[error("Channel closed")]
    ChannelClosed,

    /// The outbound queue stayed full for the whole send timeout
    #[error("send timed out")]
    Timeout,
}

/// Client lifecycle errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client pumps already started")]
    AlreadyStarted,

    #[error("client is closed")]
    Closed,
}

/// Room invariants a caller tried to break
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// `set_host` on a room that already has a host
    HostAlreadySet,
    /// Members present while no host is set
    MembersWithoutHost,
    /// Operation requires a host but none is set
    NoHost,
    /// `run` called on a room that was already run
    AlreadyRunning,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Violation::HostAlreadySet => "host already set",
            Violation::MembersWithoutHost => "room has members but no host",
            Violation::NoHost => "room has no host",
            Violation::AlreadyRunning => "room is already running",
        };
        f.write_str(text)
    }
}

/// Room coordination errors
#[derive(Debug, Error)]
pub enum RoomError {
    /// A coordination-layer programming error; the room should be dropped
    #[error("room {room}: invariant violation: {violation}")]
    InvariantViolation { room: RoomId, violation: Violation },

    /// The room has been torn down
    #[error("room {0} is closed")]
    Closed(RoomId),

    /// The host's connection ended while waiting for `start`
    #[error("host of room {0} left before starting")]
    HostLeftBeforeStart(RoomId),

    /// Every generated identifier collided with an open room
    #[error("no free room id after {0} attempts")]
    IdsExhausted(usize),
}

impl RoomError {
    pub(crate) fn violation(room: &RoomId, violation: Violation) -> Self {
        RoomError::InvariantViolation {
            room: room.clone(),
            violation,
        }
    }
}

/// A member that could not be notified during teardown
#[derive(Debug)]
pub struct SendFailure {
    pub client: ClientId,
    pub error: SendError,
}

/// Aggregate of the partial failures collected while closing a room
#[derive(Debug, Error)]
#[error("room {room}: {} member notification(s) failed during teardown", .failures.len())]
pub struct TeardownError {
    pub room: RoomId,
    pub failures: Vec<SendFailure>,
}

/// Application-level errors
///
/// Raised by the connection handler; all of them end the connection.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Room(#[from] RoomError),

    #[error(transparent)]
    Client(#[from] ClientError),
}
