//! Connected peers

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use switchboard_core::{CloseCode, WireMessage};

use crate::transport::Transport;

/// Process-unique peer identifier, never reused while the process runs
pub type PeerId = u64;

/// Where a peer stands with respect to lobbies
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerState {
    /// Connected, has not joined yet
    Unjoined,
    /// Member of the lobby with this id
    Joined(String),
    /// Left behind when its sealed lobby was unlisted. It can still signal
    /// the other members of that detached lobby (see [`LobbyRegistry::detach`]).
    ///
    /// [`LobbyRegistry::detach`]: crate::lobby::LobbyRegistry::detach
    Stranded(u64),
    /// Its lobby was closed underneath it and the connection is being closed
    Orphaned,
}

/// A connected peer
pub struct Peer {
    pub id: PeerId,
    pub state: PeerState,
    /// Refreshed on every inbound message
    pub last_seen: Instant,
    transport: Arc<dyn Transport>,
}

impl Peer {
    pub fn new(id: PeerId, transport: Arc<dyn Transport>, now: Instant) -> Self {
        Self {
            id,
            state: PeerState::Unjoined,
            last_seen: now,
            transport,
        }
    }

    /// Best-effort send; dropped with a warning when the channel is not open
    pub fn send(&self, msg: &WireMessage) {
        if !self.transport.is_open() {
            warn!("Channel for peer {} is not open, dropping message", self.id);
            return;
        }

        let json = match msg.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to encode message for peer {}: {}", self.id, e);
                return;
            }
        };

        if let Err(e) = self.transport.send(&json) {
            warn!("Failed to send to peer {}: {}", self.id, e);
        }
    }

    /// Whether the connection still accepts traffic
    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    pub fn close(&self, code: CloseCode, reason: &str) {
        debug!("Closing peer {} ({}: {})", self.id, code.as_u16(), reason);
        self.transport.close(code, reason);
    }
}

/// All connected peers, keyed by id
pub struct PeerRegistry {
    peers: HashMap<PeerId, Peer>,
    next_id: PeerId,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: HashMap::new(),
            next_id: 1,
        }
    }

    /// Next unused id, strictly increasing
    pub fn allocate(&mut self) -> PeerId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn register(&mut self, peer: Peer) {
        self.peers.insert(peer.id, peer);
    }

    pub fn lookup(&self, id: PeerId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    pub fn lookup_mut(&mut self, id: PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(&id)
    }

    /// Remove a peer; no-op if absent
    pub fn remove(&mut self, id: PeerId) -> Option<Peer> {
        self.peers.remove(&id)
    }

    /// Send to a peer by id; unknown ids are ignored
    pub fn send(&self, id: PeerId, msg: &WireMessage) {
        if let Some(peer) = self.peers.get(&id) {
            peer.send(msg);
        }
    }

    /// Close a peer's transport by id; unknown ids are ignored
    pub fn close(&self, id: PeerId, code: CloseCode, reason: &str) {
        if let Some(peer) = self.peers.get(&id) {
            peer.close(code, reason);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
