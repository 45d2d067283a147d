//! Wire protocol definitions
//!
//! Every message is a UTF-8 JSON object with exactly three required fields:
//! `type` (message kind), `id` (peer id or flag), and `data` (string payload).
//! The relay never looks inside the payload of forwarded messages.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Wire id under which a lobby's host is always presented
pub const HOST_WIRE_ID: i64 = 1;

/// Message catalog
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Client: join or create a lobby. Server: join acknowledgment.
    Join = 0,
    /// Server: the peer's own id and the lobby's topology
    Id = 1,
    /// Server: a peer connected
    PeerConnect = 2,
    /// Server: a peer left
    PeerDisconnect = 3,
    Offer = 4,
    Answer = 5,
    Candidate = 6,
    /// Host: lock the lobby. Server: lobby has been sealed.
    Seal = 7,
}

impl MessageType {
    /// Negotiation messages the relay forwards verbatim
    pub fn is_forwarded(self) -> bool {
        matches!(
            self,
            MessageType::Offer | MessageType::Answer | MessageType::Candidate
        )
    }

    /// Messages only the server may emit
    pub fn is_server_only(self) -> bool {
        matches!(
            self,
            MessageType::Id | MessageType::PeerConnect | MessageType::PeerDisconnect
        )
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => MessageType::Join,
            1 => MessageType::Id,
            2 => MessageType::PeerConnect,
            3 => MessageType::PeerDisconnect,
            4 => MessageType::Offer,
            5 => MessageType::Answer,
            6 => MessageType::Candidate,
            7 => MessageType::Seal,
            other => return Err(ProtocolError::UnknownType(other)),
        })
    }
}

impl From<MessageType> for u8 {
    fn from(kind: MessageType) -> Self {
        kind as u8
    }
}

/// The JSON envelope exchanged with clients
///
/// `kind` is kept as a raw integer so that unknown types still parse and can
/// be reported as such.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: u8,
    pub id: i64,
    pub data: String,
}

impl WireMessage {
    pub fn new(kind: MessageType, id: i64, data: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id,
            data: data.into(),
        }
    }

    /// Join acknowledgment carrying the lobby id
    pub fn join_ack(lobby_id: &str) -> Self {
        Self::new(MessageType::Join, 0, lobby_id)
    }

    /// Tell a peer its (apparent) id and whether the lobby is a mesh
    pub fn id_assign(id: i64, mesh: bool) -> Self {
        Self::new(MessageType::Id, id, if mesh { "true" } else { "" })
    }

    pub fn peer_connect(id: i64) -> Self {
        Self::new(MessageType::PeerConnect, id, "")
    }

    pub fn peer_disconnect(id: i64) -> Self {
        Self::new(MessageType::PeerDisconnect, id, "")
    }

    /// Seal notice broadcast to lobby members
    pub fn seal() -> Self {
        Self::new(MessageType::Seal, 0, "")
    }

    /// Copy of this message with the id replaced, used when forwarding
    pub fn readdressed(&self, id: i64) -> Self {
        Self {
            kind: self.kind,
            id,
            data: self.data.clone(),
        }
    }

    /// Resolve the message type, rejecting unknown values
    pub fn message_type(&self) -> Result<MessageType, ProtocolError> {
        MessageType::try_from(self.kind)
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        // serde would also accept a `[type, id, data]` array
        let value: serde_json::Value = serde_json::from_str(json)?;
        if !value.is_object() {
            return Err(ProtocolError::Malformed("expected a JSON object".into()));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Lobby topology requested on creation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Topology {
    /// Every member is told about every other member
    Mesh,
    /// Only the host and each member are told about each other
    Relay,
}

impl Topology {
    pub fn is_mesh(self) -> bool {
        self == Topology::Mesh
    }
}

/// Which lobby a JOIN is aimed at
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JoinTarget {
    /// Empty `data`: create a new lobby with the sender as host
    Create,
    /// Join the named lobby
    Existing(String),
}

/// A decoded client JOIN
///
/// On the wire `id == 0` requests a mesh lobby and any other value a relay
/// lobby; an empty `data` requests creation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinRequest {
    pub topology: Topology,
    pub target: JoinTarget,
}

impl JoinRequest {
    pub fn decode(msg: &WireMessage) -> Self {
        let topology = if msg.id == 0 {
            Topology::Mesh
        } else {
            Topology::Relay
        };
        let target = if msg.data.is_empty() {
            JoinTarget::Create
        } else {
            JoinTarget::Existing(msg.data.clone())
        };
        Self { topology, target }
    }

    /// Wire form of this request
    pub fn encode(&self) -> WireMessage {
        let id = match self.topology {
            Topology::Mesh => 0,
            Topology::Relay => 1,
        };
        let data = match &self.target {
            JoinTarget::Create => String::new(),
            JoinTarget::Existing(lobby) => lobby.clone(),
        };
        WireMessage::new(MessageType::Join, id, data)
    }
}
