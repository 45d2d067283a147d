//! Switchboard Signal Relay
//!
//! Rendezvous server for peer-to-peer sessions. Peers connect over
//! WebSocket, gather in lobbies, and exchange offer/answer/candidate
//! payloads that the relay forwards without looking inside.
//!
//! # Protocol
//!
//! 1. A peer sends JOIN with an empty lobby name and becomes host of a new lobby
//! 2. Other peers JOIN that lobby by name
//! 3. The relay announces members to each other (everyone in a mesh lobby,
//!    only host and member in a relay lobby); the host always appears as id 1
//! 4. Peers forward negotiation messages to each other through the relay
//! 5. The host seals the lobby; it is torn down shortly after

pub mod lobby;
pub mod peer;
pub mod router;
pub mod server;
pub mod sweeper;
pub mod transport;

pub use lobby::{Lobby, LobbyRegistry};
pub use peer::{Peer, PeerId, PeerRegistry, PeerState};
pub use router::Relay;
pub use server::SignalServer;
pub use sweeper::{spawn_sweeper, SweepReport};
pub use transport::{ChannelTransport, Outbound, Transport};

pub use switchboard_core::DEFAULT_PORT;
