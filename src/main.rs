//! Host-led WebSocket Room Server - Entry Point
//!
//! Loads configuration, starts the TCP listener and serves connections.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use roomcast::{serve, Config, Registry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=roomcast=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("roomcast=info")),
        )
        .init();

    let config = Config::from_env()?;

    // Start TCP listener
    let listener = TcpListener::bind(&config.addr).await?;
    info!("Room server listening on {}", config.addr);
    if let Some(timeout) = config.send_timeout {
        info!("Broadcast send timeout: {:?}", timeout);
    }

    serve(listener, Arc::new(Registry::new(config.send_timeout))).await;
    Ok(())
}
