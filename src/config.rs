//! Runtime configuration
//!
//! Read from the command line and the environment:
//! - first positional argument or `ROOMCAST_ADDR`: bind address
//! - `ROOMCAST_SEND_TIMEOUT_MS`: optional bound on each broadcast send
//!
//! Logging is configured separately through `RUST_LOG`.

use std::time::Duration;

use thiserror::Error;

/// Default server address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

pub const ADDR_VAR: &str = "ROOMCAST_ADDR";
pub const SEND_TIMEOUT_VAR: &str = "ROOMCAST_SEND_TIMEOUT_MS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {var}: {value:?} is not a number of milliseconds")]
    InvalidTimeout { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Address the listener binds to
    pub addr: String,
    /// Bound on each broadcast send; `None` blocks until the peer catches up
    pub send_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            send_timeout: None,
        }
    }
}

impl Config {
    /// Load from the process arguments and environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_sources(std::env::args().nth(1), |var| std::env::var(var).ok())
    }

    /// Build from an optional positional address and a variable lookup
    pub fn from_sources(
        arg_addr: Option<String>,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let addr = arg_addr
            .or_else(|| var(ADDR_VAR))
            .unwrap_or_else(|| DEFAULT_ADDR.to_string());

        let send_timeout = match var(SEND_TIMEOUT_VAR) {
            None => None,
            Some(value) => {
                let millis: u64 = value.trim().parse().map_err(|_| ConfigError::InvalidTimeout {
                    var: SEND_TIMEOUT_VAR,
                    value: value.clone(),
                })?;
                // 0 turns the bound off
                (millis > 0).then(|| Duration::from_millis(millis))
            }
        };

        Ok(Self { addr, send_timeout })
    }
}
