//! Client struct definition
//!
//! A client owns one connection and bridges it to two bounded, typed queues
//! through a pair of pumps:
//! - the read pump decodes incoming frames onto the inbound queue
//! - the write pump drains the outbound queue onto the connection
//!
//! Both pumps watch a shared closed flag, so the end of one ends the other.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::connection::{Connection, Frame, FrameReader, FrameWriter};
use crate::error::{ClientError, SendError, TransportError};
use crate::message::Message;
use crate::types::ClientId;

/// Capacity of the inbound and outbound queues
pub const QUEUE_CAPACITY: usize = 10;

/// Write half shared by both pumps (pongs go out from the read pump)
type SharedWriter = Arc<tokio::sync::Mutex<Box<dyn FrameWriter>>>;

/// Everything the pumps take ownership of on `start`
struct Pumps {
    reader: Box<dyn FrameReader>,
    writer: Box<dyn FrameWriter>,
    incoming: mpsc::Sender<Message>,
    outgoing: mpsc::Receiver<Message>,
}

/// Connected client
///
/// Holds the client's identity, its queues and the closed-notification.
/// Shared between its room and its session task behind an `Arc`.
pub struct Client {
    /// Unique identifier for this client
    id: ClientId,
    /// Display name announced to the room
    name: String,
    /// Room → connection queue; `None` once closed
    outgoing: Mutex<Option<mpsc::Sender<Message>>>,
    /// Connection → room queue
    incoming: tokio::sync::Mutex<mpsc::Receiver<Message>>,
    /// Set once the connection is finished, for whatever reason
    closed: Arc<watch::Sender<bool>>,
    /// Taken by `start`
    pumps: Mutex<Option<Pumps>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Client {
    /// Wrap a connection; the pumps are not started yet
    pub fn new<C: Connection>(connection: C, name: impl Into<String>) -> Self {
        let (reader, writer) = connection.split();
        let (incoming_tx, incoming_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (outgoing_tx, outgoing_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (closed, _) = watch::channel(false);

        Self {
            id: ClientId::next(),
            name: name.into(),
            outgoing: Mutex::new(Some(outgoing_tx)),
            incoming: tokio::sync::Mutex::new(incoming_rx),
            closed: Arc::new(closed),
            pumps: Mutex::new(Some(Pumps {
                reader: Box::new(reader),
                writer: Box::new(writer),
                incoming: incoming_tx,
                outgoing: outgoing_rx,
            })),
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the read and write pumps
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        let pumps = lock(&self.pumps).take().ok_or(ClientError::AlreadyStarted)?;
        let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(pumps.writer));

        tokio::spawn(read_pump(
            self.id,
            pumps.reader,
            Arc::clone(&writer),
            pumps.incoming,
            Arc::clone(&self.closed),
        ));
        tokio::spawn(write_pump(
            self.id,
            writer,
            pumps.outgoing,
            Arc::clone(&self.closed),
        ));

        debug!("Pumps started for client {}", self.id);
        Ok(())
    }

    /// Queue a message for this client
    ///
    /// Waits while the outbound queue is full. Returns an error once the
    /// client has been closed.
    pub async fn send(&self, msg: Message) -> Result<(), SendError> {
        let sender = lock(&self.outgoing)
            .clone()
            .ok_or(SendError::ChannelClosed)?;
        sender.send(msg).await.map_err(|_| SendError::ChannelClosed)
    }

    /// Like [`send`](Self::send), but gives up after `timeout`
    pub async fn send_timeout(&self, msg: Message, timeout: Duration) -> Result<(), SendError> {
        tokio::time::timeout(timeout, self.send(msg))
            .await
            .map_err(|_| SendError::Timeout)?
    }

    /// Next decoded message from the connection
    ///
    /// Returns `None` once the read pump has ended.
    pub async fn recv(&self) -> Option<Message> {
        self.incoming.lock().await.recv().await
    }

    /// Close the client
    ///
    /// Stops accepting sends and tells both pumps to finish. Messages queued
    /// before this call are still written, followed by a close frame.
    /// Idempotent; safe to call while the pumps run.
    pub fn close(&self) {
        let was_open = lock(&self.outgoing).take().is_some();
        // Never started: dropping the halves drops the connection
        let pending = lock(&self.pumps).take();
        self.closed.send_replace(true);

        if was_open {
            debug!(
                "Client {} closed{}",
                self.id,
                if pending.is_some() { " before start" } else { "" }
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the connection is finished
    pub async fn closed(&self) {
        closed_signal(&mut self.closed.subscribe()).await;
    }
}

/// Connection → inbound queue
async fn read_pump(
    id: ClientId,
    mut reader: Box<dyn FrameReader>,
    writer: SharedWriter,
    incoming: mpsc::Sender<Message>,
    closed: Arc<watch::Sender<bool>>,
) {
    let mut shutdown = closed.subscribe();

    loop {
        let result = tokio::select! {
            _ = closed_signal(&mut shutdown) => break,
            result = reader.read_frame() => result,
        };

        match result {
            Ok(Frame::Text(text)) => {
                let msg = match Message::decode(text.as_bytes()) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!("Dropping frame from client {}: {}", id, e);
                        continue;
                    }
                };
                debug!("Client {} sent {}", id, msg.kind().as_str());

                let delivered = tokio::select! {
                    _ = closed_signal(&mut shutdown) => false,
                    sent = incoming.send(msg) => sent.is_ok(),
                };
                if !delivered {
                    break;
                }
            }
            Ok(Frame::Binary(data)) => {
                warn!(
                    "Dropping {}-byte binary frame from client {}",
                    data.len(),
                    id
                );
            }
            Ok(Frame::Ping(data)) => {
                debug!("Ping from {}", id);
                if reader.replies_to_pings() {
                    continue;
                }
                if let Err(e) = writer.lock().await.write_frame(Frame::Pong(data)).await {
                    error!("Failed to send pong to client {}: {}", id, e);
                }
            }
            Ok(Frame::Pong(_)) => {
                debug!("Pong from {}", id);
            }
            Ok(Frame::Close) => {
                info!("Client {} closed the connection", id);
                break;
            }
            Err(TransportError::ConnectionClosed) => {
                debug!("Connection of client {} already closed", id);
                break;
            }
            Err(e) if e.is_abnormal_close() => {
                info!("Client {} connection closed while reading: {}", id, e);
                break;
            }
            Err(e) => {
                error!("Error reading from client {}: {}", id, e);
                break;
            }
        }
    }

    closed.send_replace(true);
    debug!("Read pump ended for client {}", id);
}

/// Outbound queue → connection
async fn write_pump(
    id: ClientId,
    writer: SharedWriter,
    mut outgoing: mpsc::Receiver<Message>,
    closed: Arc<watch::Sender<bool>>,
) {
    let mut shutdown = closed.subscribe();

    loop {
        let msg = tokio::select! {
            biased;
            msg = outgoing.recv() => msg,
            _ = closed_signal(&mut shutdown) => {
                // Refuse new sends, keep what was already queued
                outgoing.close();
                outgoing.recv().await
            }
        };
        let Some(msg) = msg else {
            break;
        };

        let text = match msg.encode() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize message for client {}: {}", id, e);
                continue;
            }
        };

        if let Err(e) = writer.lock().await.write_frame(Frame::Text(text)).await {
            if e.is_closed() {
                info!("Client {} connection closed while writing: {}", id, e);
            } else {
                error!("Error writing to client {}: {}", id, e);
            }
            break;
        }
    }

    closed.send_replace(true);
    if let Err(e) = writer.lock().await.close().await {
        debug!("Close frame to client {} not sent: {}", id, e);
    }
    debug!("Write pump ended for client {}", id);
}

/// Wait until the closed flag is set
async fn closed_signal(rx: &mut watch::Receiver<bool>) {
    // Err means the sender is gone, which also means closed
    let _ = rx.wait_for(|closed| *closed).await;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
