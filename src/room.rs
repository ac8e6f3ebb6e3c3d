//! Room struct definition
//!
//! A room has at most one host and an ordered list of members. Members may
//! only join once a host is attached; the host starts the room and its
//! departure tears the room down.
//!
//! All mutation happens under the room's write lock, including the
//! broadcasts a mutation triggers, so concurrent joins are announced in the
//! same order they are appended.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::error::{RoomError, SendError, SendFailure, TeardownError, Violation};
use crate::message::Message;
use crate::types::{ClientId, RoomId};

/// Text of the error members receive when the host leaves
pub const HOST_DISCONNECTED: &str = "host disconnected";

/// Teardown callback
pub type CloseCallback = Box<dyn FnOnce() + Send + 'static>;

/// Lifecycle of a room
///
/// `Empty → HostAttached → Running → Closed`; nothing leaves `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    Empty,
    HostAttached,
    Running,
    Closed,
}

#[derive(Debug)]
struct RoomState {
    host: Option<Arc<Client>>,
    /// Join order
    members: Vec<Arc<Client>>,
    phase: RoomPhase,
}

/// Host-led room
pub struct Room {
    /// Room identifier for lookup
    id: RoomId,
    state: RwLock<RoomState>,
    /// Set by the first `run`
    run_claimed: AtomicBool,
    /// Bound on each broadcast send; `None` waits as long as it takes
    send_timeout: Option<Duration>,
    on_close: Mutex<Option<CloseCallback>>,
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("id", &self.id)
            .field("send_timeout", &self.send_timeout)
            .finish_non_exhaustive()
    }
}

impl Room {
    /// Create an empty room with no host
    pub fn new(id: RoomId) -> Self {
        Self::with_send_timeout(id, None)
    }

    /// Create an empty room whose broadcasts give up on a peer after `send_timeout`
    pub fn with_send_timeout(id: RoomId, send_timeout: Option<Duration>) -> Self {
        Self {
            id,
            state: RwLock::new(RoomState {
                host: None,
                members: Vec::new(),
                phase: RoomPhase::Empty,
            }),
            run_claimed: AtomicBool::new(false),
            send_timeout,
            on_close: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    pub async fn phase(&self) -> RoomPhase {
        self.state.read().await.phase
    }

    pub async fn is_running(&self) -> bool {
        self.phase().await == RoomPhase::Running
    }

    pub async fn has_host(&self) -> bool {
        self.state.read().await.host.is_some()
    }

    pub async fn member_count(&self) -> usize {
        self.state.read().await.members.len()
    }

    /// Attach the host
    ///
    /// Fails if a host is already attached, or if members somehow exist
    /// without one. The existing host is left untouched on failure.
    pub async fn set_host(&self, client: Arc<Client>) -> Result<(), RoomError> {
        let mut state = self.state.write().await;

        if state.phase == RoomPhase::Closed {
            return Err(RoomError::Closed(self.id.clone()));
        }
        if state.host.is_some() {
            return Err(RoomError::violation(&self.id, Violation::HostAlreadySet));
        }
        if !state.members.is_empty() {
            return Err(RoomError::violation(
                &self.id,
                Violation::MembersWithoutHost,
            ));
        }

        info!(
            "Client {} ({}) is host of room {}",
            client.id(),
            client.name(),
            self.id
        );
        state.host = Some(client);
        state.phase = RoomPhase::HostAttached;
        Ok(())
    }

    /// Add a member
    ///
    /// Announces `Join(name)` to the host and then to every current member,
    /// in join order, before appending. The new member is not told who was
    /// already there. A recipient that cannot be reached is logged and
    /// skipped.
    pub async fn join(&self, client: Arc<Client>) -> Result<(), RoomError> {
        let mut state = self.state.write().await;

        if state.phase == RoomPhase::Closed {
            return Err(RoomError::Closed(self.id.clone()));
        }
        let Some(host) = state.host.as_ref() else {
            return Err(RoomError::violation(&self.id, Violation::NoHost));
        };

        let announcement = Message::join(client.name());
        for recipient in std::iter::once(host).chain(state.members.iter()) {
            if let Err(e) = self.deliver(recipient, announcement.clone()).await {
                warn!(
                    "Failed to announce {} to client {} in room {}: {}",
                    client.name(),
                    recipient.id(),
                    self.id,
                    e
                );
            }
        }

        info!(
            "Client {} ({}) joined room {}",
            client.id(),
            client.name(),
            self.id
        );
        state.members.push(client);
        debug!("Room {} has {} members", self.id, state.members.len());
        Ok(())
    }

    /// Remove a member that left on its own
    ///
    /// Returns false if the client is not a member (the host never is).
    pub async fn leave(&self, client_id: ClientId) -> bool {
        let mut state = self.state.write().await;

        let Some(index) = state.members.iter().position(|m| m.id() == client_id) else {
            return false;
        };
        let member = state.members.remove(index);
        member.close();

        info!("Client {} left room {}", client_id, self.id);
        debug!("Room {} has {} members", self.id, state.members.len());
        true
    }

    /// Register the teardown callback, replacing any previous one
    pub fn set_on_close(&self, callback: impl FnOnce() + Send + 'static) {
        *self.on_close.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(callback));
    }

    /// Wait for the host to start the room
    ///
    /// Messages other than `Start` that arrive from the host meanwhile are
    /// discarded. Only the first call may proceed; later calls fail without
    /// touching the room.
    pub async fn run(&self) -> Result<(), RoomError> {
        if self.run_claimed.swap(true, Ordering::SeqCst) {
            return Err(RoomError::violation(&self.id, Violation::AlreadyRunning));
        }

        let host = {
            let state = self.state.read().await;
            if state.phase == RoomPhase::Closed {
                return Err(RoomError::Closed(self.id.clone()));
            }
            match &state.host {
                Some(host) => Arc::clone(host),
                None => {
                    // Nothing happened; a later call may try again
                    self.run_claimed.store(false, Ordering::SeqCst);
                    return Err(RoomError::violation(&self.id, Violation::NoHost));
                }
            }
        };

        info!("Room {} waiting for host to start", self.id);
        while let Some(msg) = host.recv().await {
            match msg {
                Message::Start => {
                    let mut state = self.state.write().await;
                    if state.phase == RoomPhase::Closed {
                        return Err(RoomError::Closed(self.id.clone()));
                    }
                    state.phase = RoomPhase::Running;
                    info!("Host started room {}", self.id);
                    return Ok(());
                }
                other => {
                    debug!(
                        "Room {} ignoring {} from host before start",
                        self.id,
                        other.kind().as_str()
                    );
                }
            }
        }

        Err(RoomError::HostLeftBeforeStart(self.id.clone()))
    }

    /// Tear the room down
    ///
    /// Every member is sent `Error("host disconnected")` and closed, then the
    /// host is closed and the close callback fires. A member that cannot be
    /// notified is still closed, and the failure is reported in the returned
    /// error once everyone has been processed. Closing a closed room is a
    /// no-op.
    pub async fn close(&self) -> Result<(), TeardownError> {
        let mut state = self.state.write().await;

        if state.phase == RoomPhase::Closed {
            return Ok(());
        }
        state.phase = RoomPhase::Closed;
        info!(
            "Closing room {} with {} members",
            self.id,
            state.members.len()
        );

        let mut failures = Vec::new();
        for member in std::mem::take(&mut state.members) {
            if let Err(error) = self.deliver(&member, Message::error(HOST_DISCONNECTED)).await {
                warn!(
                    "Failed to notify client {} of room {} closing: {}",
                    member.id(),
                    self.id,
                    error
                );
                failures.push(SendFailure {
                    client: member.id(),
                    error,
                });
            }
            member.close();
        }

        if let Some(host) = &state.host {
            host.close();
        }
        drop(state);

        let callback = self
            .on_close
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(callback) = callback {
            callback();
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TeardownError {
                room: self.id.clone(),
                failures,
            })
        }
    }

    async fn deliver(&self, client: &Client, msg: Message) -> Result<(), SendError> {
        match self.send_timeout {
            Some(timeout) => client.send_timeout(msg, timeout).await,
            None => client.send(msg).await,
        }
    }
}
