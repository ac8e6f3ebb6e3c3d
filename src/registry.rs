//! Room registry
//!
//! Maps room identifiers to open rooms. The map lock is never held across an
//! await: teardown removes the entry first and closes the room afterwards,
//! and a room refuses joins once closed, so a room on its way out cannot
//! pick up new members.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{RoomError, TeardownError};
use crate::room::Room;
use crate::types::RoomId;

/// Random ids tried before `create` gives up
const MAX_ID_ATTEMPTS: usize = 64;

/// Registry of open rooms
#[derive(Debug, Default)]
pub struct Registry {
    /// All open rooms: RoomId -> Room
    rooms: RwLock<HashMap<RoomId, Arc<Room>>>,
    /// Broadcast send timeout handed to every new room
    send_timeout: Option<Duration>,
}

impl Registry {
    pub fn new(send_timeout: Option<Duration>) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            send_timeout,
        }
    }

    /// Create and register a room under a fresh identifier
    pub fn create(&self) -> Result<Arc<Room>, RoomError> {
        self.create_with(RoomId::generate)
    }

    fn create_with(&self, mut generate: impl FnMut() -> RoomId) -> Result<Arc<Room>, RoomError> {
        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);

        let id = (0..MAX_ID_ATTEMPTS)
            .map(|_| generate())
            .find(|id| !rooms.contains_key(id))
            .ok_or_else(|| {
                warn!("No free room id among {} open rooms", rooms.len());
                RoomError::IdsExhausted(MAX_ID_ATTEMPTS)
            })?;

        let room = Arc::new(Room::with_send_timeout(id.clone(), self.send_timeout));
        rooms.insert(id.clone(), Arc::clone(&room));

        info!("Room {} created", id);
        debug!("Total rooms: {}", rooms.len());
        Ok(room)
    }

    pub fn lookup(&self, id: &RoomId) -> Option<Arc<Room>> {
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn remove(&self, id: &RoomId) -> Option<Arc<Room>> {
        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        let room = rooms.remove(id);
        if room.is_some() {
            debug!("Room {} removed, total rooms: {}", id, rooms.len());
        }
        room
    }

    /// Remove a room and close it
    ///
    /// Returns `None` if no such room was registered.
    pub async fn teardown(&self, id: &RoomId) -> Option<Result<(), TeardownError>> {
        let room = self.remove(id)?;
        Some(room.close().await)
    }

    pub fn len(&self) -> usize {
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
