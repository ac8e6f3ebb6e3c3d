//! Connection abstraction
//!
//! The core consumes an already-established, full-duplex, message-framed
//! connection. [`Connection::split`] hands out a [`FrameReader`] and a
//! [`FrameWriter`] so a client can read and write concurrently.
//!
//! Two implementations ship with the crate: a WebSocket adapter over
//! `tokio-tungstenite` (below) and an in-process pair in [`crate::memory`].

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

use crate::error::TransportError;

/// One frame on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// Read half of a connection
#[async_trait]
pub trait FrameReader: Send + 'static {
    /// Wait for the next frame.
    ///
    /// Must be cancel-safe: the client races it against its closure signal.
    async fn read_frame(&mut self) -> Result<Frame, TransportError>;

    /// Whether the transport answers pings by itself
    fn replies_to_pings(&self) -> bool {
        false
    }
}

/// Write half of a connection
#[async_trait]
pub trait FrameWriter: Send + 'static {
    async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Send a close control frame and shut the write side down.
    ///
    /// Calling it again is a no-op.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// A full-duplex framed connection that can be split into halves
pub trait Connection: Send + 'static {
    type Reader: FrameReader;
    type Writer: FrameWriter;

    fn split(self) -> (Self::Reader, Self::Writer);
}

/// Read half of a WebSocket connection
pub struct WsReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

/// Write half of a WebSocket connection
pub struct WsWriter<S> {
    sink: SplitSink<WebSocketStream<S>, WsMessage>,
    closed: bool,
}

impl<S> Connection for WebSocketStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Reader = WsReader<S>;
    type Writer = WsWriter<S>;

    fn split(self) -> (Self::Reader, Self::Writer) {
        let (sink, stream) = StreamExt::split(self);
        (
            WsReader { stream },
            WsWriter {
                sink,
                closed: false,
            },
        )
    }
}

#[async_trait]
impl<S> FrameReader for WsReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn read_frame(&mut self) -> Result<Frame, TransportError> {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => return Err(map_ws_error(e)),
                None => return Err(TransportError::ConnectionClosed),
            };

            let frame = match msg {
                WsMessage::Text(text) => Frame::Text(text.to_string()),
                WsMessage::Binary(data) => Frame::Binary(data.into()),
                WsMessage::Ping(data) => Frame::Ping(data.into()),
                WsMessage::Pong(data) => Frame::Pong(data.into()),
                WsMessage::Close(close) => {
                    debug!("Received close frame: {:?}", close);
                    Frame::Close
                }
                // Never produced when reading
                WsMessage::Frame(_) => continue,
            };
            return Ok(frame);
        }
    }

    // tungstenite queues the pong itself and flushes it with the next write
    fn replies_to_pings(&self) -> bool {
        true
    }
}

#[async_trait]
impl<S> FrameWriter for WsWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        let msg = match frame {
            Frame::Text(text) => WsMessage::Text(text.into()),
            Frame::Binary(data) => WsMessage::Binary(data.into()),
            Frame::Ping(data) => WsMessage::Ping(data.into()),
            Frame::Pong(data) => WsMessage::Pong(data.into()),
            Frame::Close => WsMessage::Close(None),
        };
        self.sink.send(msg).await.map_err(map_ws_error)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.sink.close().await.map_err(map_ws_error)
    }
}

/// Classify a tungstenite error, separating abnormal closure from the rest
pub(crate) fn map_ws_error(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::ConnectionClosed
        }
        tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            TransportError::UnexpectedClose("reset without closing handshake".to_string())
        }
        tungstenite::Error::Io(e) => match e.kind() {
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof => TransportError::UnexpectedClose(e.to_string()),
            _ => TransportError::Io(e),
        },
        other => TransportError::Protocol(other.to_string()),
    }
}
