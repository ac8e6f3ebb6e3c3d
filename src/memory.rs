//! In-process connection
//!
//! A channel-backed [`Connection`] plus the [`MemoryPeer`] that plays the
//! remote end. Used to drive clients and rooms without sockets.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::connection::{Connection, Frame, FrameReader, FrameWriter};
use crate::error::TransportError;
use crate::message::Message;

/// Create a connected pair
pub fn pair() -> (MemoryConnection, MemoryPeer) {
    let (to_client, from_peer) = mpsc::unbounded_channel();
    let (to_peer, from_client) = mpsc::unbounded_channel();
    (
        MemoryConnection {
            inbound: from_peer,
            outbound: to_peer,
        },
        MemoryPeer {
            to_client,
            from_client,
        },
    )
}

/// Local side of an in-process connection
#[derive(Debug)]
pub struct MemoryConnection {
    inbound: mpsc::UnboundedReceiver<Result<Frame, TransportError>>,
    outbound: mpsc::UnboundedSender<Frame>,
}

/// Remote side of an in-process connection
#[derive(Debug)]
pub struct MemoryPeer {
    to_client: mpsc::UnboundedSender<Result<Frame, TransportError>>,
    from_client: mpsc::UnboundedReceiver<Frame>,
}

pub struct MemoryReader {
    inbound: mpsc::UnboundedReceiver<Result<Frame, TransportError>>,
}

pub struct MemoryWriter {
    outbound: mpsc::UnboundedSender<Frame>,
    closed: bool,
}

impl Connection for MemoryConnection {
    type Reader = MemoryReader;
    type Writer = MemoryWriter;

    fn split(self) -> (Self::Reader, Self::Writer) {
        (
            MemoryReader {
                inbound: self.inbound,
            },
            MemoryWriter {
                outbound: self.outbound,
                closed: false,
            },
        )
    }
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn read_frame(&mut self) -> Result<Frame, TransportError> {
        match self.inbound.recv().await {
            Some(result) => result,
            // Peer dropped without sending a close frame
            None => Err(TransportError::UnexpectedClose("peer dropped".to_string())),
        }
    }
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::UnexpectedClose("peer dropped".to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // The peer may already be gone; closing is still complete locally.
        let _ = self.outbound.send(Frame::Close);
        Ok(())
    }
}

impl MemoryPeer {
    /// Deliver a raw frame to the client
    pub fn send_frame(&self, frame: Frame) -> bool {
        self.to_client.send(Ok(frame)).is_ok()
    }

    /// Deliver an encoded message as a text frame
    pub fn send_message(&self, msg: &Message) -> bool {
        match msg.encode() {
            Ok(text) => self.send_frame(Frame::Text(text)),
            Err(_) => false,
        }
    }

    /// Make the client's next read fail as an abnormal closure
    pub fn abort(&self) -> bool {
        self.to_client
            .send(Err(TransportError::UnexpectedClose(
                "connection reset by peer".to_string(),
            )))
            .is_ok()
    }

    /// Deliver an arbitrary transport error
    pub fn fail(&self, err: TransportError) -> bool {
        self.to_client.send(Err(err)).is_ok()
    }

    /// Next frame written by the client; `None` once the writer is dropped
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }

    /// A frame already written by the client, without waiting
    pub fn try_next_frame(&mut self) -> Option<Frame> {
        self.from_client.try_recv().ok()
    }

    /// Next decodable message, skipping control frames
    ///
    /// Returns `None` at a close frame or when the writer is dropped.
    pub async fn next_message(&mut self) -> Option<Message> {
        loop {
            match self.from_client.recv().await? {
                Frame::Text(text) => {
                    if let Ok(msg) = Message::decode(text.as_bytes()) {
                        return Some(msg);
                    }
                }
                Frame::Close => return None,
                Frame::Binary(_) | Frame::Ping(_) | Frame::Pong(_) => {}
            }
        }
    }
}
