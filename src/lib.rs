//! Host-led WebSocket Room Server Library
//!
//! Small, short-lived rooms built on tokio-tungstenite: one host, any number
//! of members, and a closed set of typed JSON messages.
//!
//! # Features
//! - Room creation with 4-character ids
//! - Host attach, member join with `join` announcements
//! - Host-triggered start
//! - Teardown with `error` notification when the host leaves
//! - Member leave
//!
//! # Architecture
//! - Each connection is a [`Client`] with a read pump and a write pump
//!   bridging the socket to bounded message queues
//! - A [`Room`] guards its host and members with a read/write lock and
//!   broadcasts through the clients' queues
//! - The [`Registry`] maps room ids to rooms for the connection handler
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use roomcast::{serve, Registry};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!     serve(listener, Arc::new(Registry::new(None))).await;
//! }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod memory;
pub mod message;
pub mod registry;
pub mod room;
pub mod types;

// Re-export main types for convenience
pub use client::Client;
pub use config::Config;
pub use connection::{Connection, Frame, FrameReader, FrameWriter};
pub use error::{
    AppError, ClientError, CodecError, RoomError, SendError, TeardownError, TransportError,
    Violation,
};
pub use handler::{handle_connection, serve};
pub use message::{Message, MessageKind};
pub use registry::Registry;
pub use room::{Room, RoomPhase};
pub use types::{ClientId, RoomId};
