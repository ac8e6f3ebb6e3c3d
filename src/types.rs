//! Basic type definitions for the room server
//!
//! Provides newtype wrappers for type safety:
//! - `ClientId`: process-unique numeric connection identifier
//! - `RoomId`: 4-character uppercase room identifier

use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

/// Source of client ids; the first id handed out is 1.
static LAST_CLIENT_ID: AtomicU64 = AtomicU64::new(0);

/// Alphabet room identifiers are drawn from
const ROOM_ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Length of a generated room identifier
pub const ROOM_ID_LEN: usize = 4;

/// Unique client identifier (newtype pattern)
///
/// Drawn from a monotonic process-wide counter, so ids are never reused
/// while the process lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl ClientId {
    /// Allocate the next client id
    pub fn next() -> Self {
        Self(LAST_CLIENT_ID.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Room identifier (4-character uppercase)
///
/// Opaque to the core. Generated randomly, or parsed from a request path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomId(pub String);

impl RoomId {
    /// Generate a new random room identifier
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let id = (0..ROOM_ID_LEN)
            .map(|_| char::from(ROOM_ID_ALPHABET[rng.gen_range(0..ROOM_ID_ALPHABET.len())]))
            .collect();
        Self(id)
    }

    /// Create a RoomId from user input (converts to uppercase)
    pub fn from_string(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
