//! Switchboard Core - Wire protocol, error types, and configuration
//!
//! This crate holds everything the signaling relay and its clients agree on:
//! the JSON message envelope, the message catalog, close codes, and the
//! relay's configuration. It has no networking code.

pub mod config;
pub mod error;
pub mod lobby_id;
pub mod protocol;

pub use config::{Config, ConfigError, LobbyConfig, ServerConfig, TimeoutConfig};
pub use error::*;
pub use lobby_id::{generate_lobby_id, is_lobby_id, LOBBY_ID_ALPHABET};
pub use protocol::*;

/// Default listening port of the relay
pub const DEFAULT_PORT: u16 = 9080;

/// Length of generated lobby identifiers
pub const LOBBY_ID_LENGTH: usize = 5;

/// How long a sealed lobby lives before it is force-closed (ms)
pub const SEALED_LOBBY_TIMEOUT_MS: u64 = 10_000;

/// How long a peer may stay connected without joining a lobby (ms)
pub const JOIN_TIMEOUT_MS: u64 = 1_000;

/// Interval between timeout sweeps (ms)
pub const SWEEP_INTERVAL_MS: u64 = 5_000;
