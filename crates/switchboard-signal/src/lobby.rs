//! Lobby management for the relay

use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use tracing::{debug, info};

use switchboard_core::{generate_lobby_id, RelayError, WireMessage, HOST_WIRE_ID, LOBBY_ID_LENGTH};

use crate::peer::{PeerId, PeerRegistry, PeerState};

/// Draws before giving up on finding a free lobby id
const MAX_ID_ATTEMPTS: usize = 1024;

/// A named room coordinating a set of peers
pub struct Lobby {
    /// Lobby id, unique among active lobbies
    pub id: String,

    /// Peer that created the lobby
    pub host: PeerId,

    /// Current members (ids into the [`PeerRegistry`])
    members: BTreeSet<PeerId>,

    /// Whether the lobby is locked against new joins
    sealed: bool,

    /// Mesh or relay topology, fixed at creation
    mesh: bool,

    /// Creation time while unsealed, seal time once sealed
    timestamp: Instant,
}

impl Lobby {
    /// Create a new, empty lobby
    pub fn new(id: String, host: PeerId, mesh: bool, now: Instant) -> Self {
        Self {
            id,
            host,
            members: BTreeSet::new(),
            sealed: false,
            mesh,
            timestamp: now,
        }
    }

    /// Id a peer is presented under: the host is always 1
    pub fn wire_id(&self, peer: PeerId) -> i64 {
        if peer == self.host {
            HOST_WIRE_ID
        } else {
            i64::try_from(peer).unwrap_or(i64::MAX)
        }
    }

    /// Resolve a destination id from a client message
    pub fn resolve_wire_id(&self, id: i64) -> Option<PeerId> {
        if id == HOST_WIRE_ID {
            Some(self.host)
        } else {
            PeerId::try_from(id).ok()
        }
    }

    pub fn add_member(&mut self, peer: PeerId) {
        self.members.insert(peer);
    }

    pub fn remove_member(&mut self, peer: PeerId) -> bool {
        self.members.remove(&peer)
    }

    pub fn is_member(&self, peer: PeerId) -> bool {
        self.members.contains(&peer)
    }

    pub fn members(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.members.iter().copied()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_host(&self, peer: PeerId) -> bool {
        peer == self.host
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn is_mesh(&self) -> bool {
        self.mesh
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// Seal the lobby and notify every member, the host included.
    ///
    /// Authorization is the caller's job. Sealing again resets the timestamp.
    pub fn seal(&mut self, peers: &PeerRegistry, now: Instant) {
        self.sealed = true;
        self.timestamp = now;
        info!("Lobby {} sealed", self.id);

        let notice = WireMessage::seal();
        for member in self.members() {
            peers.send(member, &notice);
        }
    }

    /// Whether a sealed lobby has outlived `timeout` at `now`
    pub fn is_expired(&self, timeout: std::time::Duration, now: Instant) -> bool {
        self.sealed && now.saturating_duration_since(self.timestamp) >= timeout
    }
}

/// All active lobbies, keyed by id.
///
/// A sealed lobby that loses a non-host member is unlisted but its remaining
/// members keep talking to each other. Those lobbies live on as *detached*
/// entries, reachable only through [`PeerState::Stranded`], until the last of
/// them disconnects. They never expire and cannot be joined.
pub struct LobbyRegistry {
    lobbies: HashMap<String, Lobby>,
    detached: HashMap<u64, Lobby>,
    next_detached: u64,
    id_length: usize,
}

impl LobbyRegistry {
    pub fn new(id_length: usize) -> Self {
        Self {
            lobbies: HashMap::new(),
            detached: HashMap::new(),
            next_detached: 0,
            id_length,
        }
    }

    /// Generate an id not used by any active lobby
    pub fn generate_id(&self) -> Result<String, RelayError> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = generate_lobby_id(self.id_length)?;
            if !self.lobbies.contains_key(&id) {
                return Ok(id);
            }
        }
        Err(RelayError::Internal(format!(
            "no free lobby id after {} attempts",
            MAX_ID_ATTEMPTS
        )))
    }

    /// Create and register a lobby
    pub fn create(&mut self, id: String, host: PeerId, mesh: bool, now: Instant) -> &mut Lobby {
        info!("Lobby {} created by peer {} (mesh: {})", id, host, mesh);
        self.lobbies
            .entry(id.clone())
            .or_insert_with(|| Lobby::new(id, host, mesh, now))
    }

    pub fn lookup(&self, id: &str) -> Option<&Lobby> {
        self.lobbies.get(id)
    }

    pub fn lookup_mut(&mut self, id: &str) -> Option<&mut Lobby> {
        self.lobbies.get_mut(id)
    }

    pub fn delete(&mut self, id: &str) -> Option<Lobby> {
        self.lobbies.remove(id)
    }

    /// Unlist a lobby, keeping it for the members still inside.
    ///
    /// Returns the detached key, or `None` if there was no such lobby or
    /// nobody is left in it.
    pub fn detach(&mut self, id: &str) -> Option<u64> {
        let lobby = self.lobbies.remove(id)?;
        if lobby.member_count() == 0 {
            return None;
        }

        let key = self.next_detached;
        self.next_detached += 1;
        debug!("Lobby {} detached as #{}", id, key);
        self.detached.insert(key, lobby);
        Some(key)
    }

    pub fn detached(&self, key: u64) -> Option<&Lobby> {
        self.detached.get(&key)
    }

    /// Drop a member from a detached lobby, forgetting the lobby once empty
    pub fn leave_detached(&mut self, key: u64, peer: PeerId) {
        let Some(lobby) = self.detached.get_mut(&key) else {
            return;
        };
        lobby.remove_member(peer);
        if lobby.member_count() == 0 {
            debug!("Detached lobby #{} is empty, dropping it", key);
            self.detached.remove(&key);
        }
    }

    /// The lobby a peer belongs to, listed or detached
    pub fn of(&self, state: &PeerState) -> Option<&Lobby> {
        match state {
            PeerState::Joined(id) => self.lobbies.get(id),
            PeerState::Stranded(key) => self.detached.get(key),
            _ => None,
        }
    }

    pub fn of_mut(&mut self, state: &PeerState) -> Option<&mut Lobby> {
        match state {
            PeerState::Joined(id) => self.lobbies.get_mut(id),
            PeerState::Stranded(key) => self.detached.get_mut(key),
            _ => None,
        }
    }

    /// Ids of sealed lobbies that have outlived `timeout`
    pub fn expired(&self, timeout: std::time::Duration, now: Instant) -> Vec<String> {
        self.lobbies
            .values()
            .filter(|lobby| lobby.is_expired(timeout, now))
            .map(|lobby| lobby.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lobbies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lobbies.is_empty()
    }

    pub fn detached_len(&self) -> usize {
        self.detached.len()
    }
}

impl Default for LobbyRegistry {
    fn default() -> Self {
        Self::new(LOBBY_ID_LENGTH)
    }
}
