//! Error types for the signaling relay

use thiserror::Error;

use crate::protocol::MessageType;

/// WebSocket close codes used by the relay
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum CloseCode {
    /// Lobby closed, sealed timeout, join timeout
    Normal = 1000,
    /// Invalid message (policy violation)
    InvalidMessage = 1009,
    /// Unexpected server-side failure
    InternalError = 1011,
}

impl CloseCode {
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}

/// Protocol violations by a peer. Every variant is connection-fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("unknown message type: {0}")]
    UnknownType(u8),

    #[error("{0:?} is not allowed before joining a lobby")]
    NotJoined(MessageType),

    #[error("peer already joined a lobby")]
    AlreadyJoined,

    #[error("{0:?} can only be sent by the server")]
    ServerOnly(MessageType),

    #[error("lobby not found: {0}")]
    LobbyNotFound(String),

    #[error("lobby is sealed: {0}")]
    LobbySealed(String),

    #[error("peer's lobby no longer exists")]
    LobbyGone,

    #[error("only the host ({host}) can seal the lobby")]
    NotHost { host: u64 },

    #[error("destination peer not found: {0}")]
    PeerNotFound(i64),

    #[error("destination peer {0} is in another lobby")]
    CrossLobby(u64),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Malformed(e.to_string())
    }
}

/// Failures delivering an outbound message
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    #[error("channel is not open")]
    NotOpen,

    #[error("channel has been dropped")]
    Closed,
}

/// Why the relay rejected an inbound event
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Close code the offending connection is closed with
    pub fn close_code(&self) -> CloseCode {
        match self {
            RelayError::Protocol(_) => CloseCode::InvalidMessage,
            RelayError::Internal(_) => CloseCode::InternalError,
        }
    }
}

impl From<getrandom::Error> for RelayError {
    fn from(e: getrandom::Error) -> Self {
        RelayError::Internal(format!("entropy source unavailable: {}", e))
    }
}
