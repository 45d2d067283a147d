//! Message routing and lobby lifecycle
//!
//! [`Relay`] is the one piece of shared state in the server. Both registries
//! sit behind a single lock, held for the whole of each inbound event and
//! each sweep, so events are applied one at a time and never interleave.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use switchboard_core::{
    CloseCode, Config, ConfigError, JoinRequest, JoinTarget, MessageType, ProtocolError, RelayError,
    TimeoutConfig, WireMessage,
};

use crate::lobby::{Lobby, LobbyRegistry};
use crate::peer::{Peer, PeerId, PeerRegistry, PeerState};
use crate::sweeper::SweepReport;
use crate::transport::Transport;

/// Peer and lobby registries, guarded together by [`Relay`]
pub(crate) struct RelayState {
    pub(crate) peers: PeerRegistry,
    pub(crate) lobbies: LobbyRegistry,
}

/// The signaling relay: registries plus the protocol state machine
pub struct Relay {
    state: Mutex<RelayState>,
    timeouts: TimeoutConfig,
}

impl Relay {
    /// Build a relay, rejecting configurations it could not run with
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_config(config))
    }

    fn from_config(config: &Config) -> Self {
        Self {
            state: Mutex::new(RelayState {
                peers: PeerRegistry::new(),
                lobbies: LobbyRegistry::new(config.lobby.id_length),
            }),
            timeouts: config.timeouts.clone(),
        }
    }

    pub fn timeouts(&self) -> &TimeoutConfig {
        &self.timeouts
    }

    /// Register a freshly accepted connection
    pub fn connect(&self, transport: Arc<dyn Transport>) -> PeerId {
        self.connect_at(transport, Instant::now())
    }

    pub fn connect_at(&self, transport: Arc<dyn Transport>, now: Instant) -> PeerId {
        let mut state = self.state.lock();
        let id = state.peers.allocate();
        state.peers.register(Peer::new(id, transport, now));
        info!("Peer {} connected", id);
        id
    }

    /// Handle an inbound text message.
    ///
    /// On error the peer's transport has already been closed with
    /// [`RelayError::close_code`].
    pub fn on_message(&self, peer_id: PeerId, text: &str) -> Result<(), RelayError> {
        self.on_message_at(peer_id, text, Instant::now())
    }

    pub fn on_message_at(&self, peer_id: PeerId, text: &str, now: Instant) -> Result<(), RelayError> {
        let mut state = self.state.lock();
        let result = state.handle(peer_id, text, now);

        if let Err(e) = &result {
            warn!("Rejected message from peer {}: {}", peer_id, e);
            let reason = match e.close_code() {
                CloseCode::InternalError => "Server error",
                _ => "Invalid message",
            };
            state.peers.close(peer_id, e.close_code(), reason);
        }
        result
    }

    /// The peer's connection closed: leave its lobby and forget it
    pub fn on_close(&self, peer_id: PeerId) {
        let mut state = self.state.lock();
        state.leave(peer_id);
        if state.peers.remove(peer_id).is_some() {
            info!("Peer {} disconnected", peer_id);
        }
    }

    /// The peer's connection failed: clean up and close it as a server error
    pub fn on_error(&self, peer_id: PeerId, error: &str) {
        let mut state = self.state.lock();
        warn!("Connection error for peer {}: {}", peer_id, error);
        state.leave(peer_id);
        if let Some(peer) = state.peers.remove(peer_id) {
            peer.close(CloseCode::InternalError, "Server error");
        }
    }

    /// Run both timeout sweeps now
    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> SweepReport {
        self.state.lock().sweep(&self.timeouts, now)
    }

    pub fn peer_count(&self) -> usize {
        self.state.lock().peers.len()
    }

    pub fn lobby_count(&self) -> usize {
        self.state.lock().lobbies.len()
    }

    pub fn peer_state(&self, peer_id: PeerId) -> Option<PeerState> {
        self.state.lock().peers.lookup(peer_id).map(|p| p.state.clone())
    }

    /// Members of a lobby, `None` if it does not exist
    pub fn lobby_members(&self, lobby_id: &str) -> Option<Vec<PeerId>> {
        self.state
            .lock()
            .lobbies
            .lookup(lobby_id)
            .map(|lobby| lobby.members().collect())
    }

    pub fn lobby_is_sealed(&self, lobby_id: &str) -> Option<bool> {
        self.state.lock().lobbies.lookup(lobby_id).map(Lobby::is_sealed)
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RelayState {
    fn handle(&mut self, peer_id: PeerId, text: &str, now: Instant) -> Result<(), RelayError> {
        let Some(peer) = self.peers.lookup_mut(peer_id) else {
            debug!("Message for unknown peer {} ignored", peer_id);
            return Ok(());
        };
        // Already being closed: whatever it sent after that is moot
        if !peer.is_open() {
            debug!("Message from closing peer {} dropped", peer_id);
            return Ok(());
        }
        peer.last_seen = now;
        let peer_state = peer.state.clone();

        let msg = WireMessage::from_json(text)?;
        let kind = msg.message_type()?;

        match peer_state {
            PeerState::Unjoined => match kind {
                MessageType::Join => self.join(peer_id, JoinRequest::decode(&msg), now),
                other => Err(ProtocolError::NotJoined(other).into()),
            },
            PeerState::Orphaned => Err(ProtocolError::LobbyGone.into()),
            PeerState::Joined(_) | PeerState::Stranded(_) => match kind {
                MessageType::Join => Err(ProtocolError::AlreadyJoined.into()),
                MessageType::Seal => self.seal(peer_id, &peer_state, now),
                kind if kind.is_forwarded() => self.forward(peer_id, &peer_state, &msg),
                other => Err(ProtocolError::ServerOnly(other).into()),
            },
        }
    }

    fn join(&mut self, peer_id: PeerId, request: JoinRequest, now: Instant) -> Result<(), RelayError> {
        let lobby_id = match request.target {
            JoinTarget::Create => {
                let id = self.lobbies.generate_id()?;
                self.lobbies
                    .create(id.clone(), peer_id, request.topology.is_mesh(), now);
                id
            }
            JoinTarget::Existing(id) => {
                let lobby = self
                    .lobbies
                    .lookup(&id)
                    .ok_or_else(|| ProtocolError::LobbyNotFound(id.clone()))?;
                if lobby.is_sealed() {
                    return Err(ProtocolError::LobbySealed(id).into());
                }
                id
            }
        };

        let Some(lobby) = self.lobbies.lookup_mut(&lobby_id) else {
            return Err(RelayError::Internal(format!("lobby {} vanished", lobby_id)));
        };
        if let Some(peer) = self.peers.lookup_mut(peer_id) {
            peer.state = PeerState::Joined(lobby_id.clone());
        }

        let own_id = lobby.wire_id(peer_id);
        self.peers
            .send(peer_id, &WireMessage::id_assign(own_id, lobby.is_mesh()));

        // Relay lobbies only introduce members to the host and vice versa
        for member in lobby.members() {
            if member == peer_id || !(lobby.is_mesh() || lobby.is_host(member)) {
                continue;
            }
            self.peers.send(member, &WireMessage::peer_connect(own_id));
            self.peers
                .send(peer_id, &WireMessage::peer_connect(lobby.wire_id(member)));
        }

        lobby.add_member(peer_id);
        info!("Peer {} joined lobby {}", peer_id, lobby_id);
        self.peers.send(peer_id, &WireMessage::join_ack(&lobby_id));
        Ok(())
    }

    fn seal(&mut self, peer_id: PeerId, place: &PeerState, now: Instant) -> Result<(), RelayError> {
        let lobby = self
            .lobbies
            .of_mut(place)
            .ok_or(ProtocolError::LobbyGone)?;
        if !lobby.is_host(peer_id) {
            return Err(ProtocolError::NotHost { host: lobby.host }.into());
        }

        lobby.seal(&self.peers, now);
        Ok(())
    }

    fn forward(&self, peer_id: PeerId, place: &PeerState, msg: &WireMessage) -> Result<(), RelayError> {
        let lobby = self.lobbies.of(place).ok_or(ProtocolError::LobbyGone)?;

        let dest_id = lobby
            .resolve_wire_id(msg.id)
            .ok_or(ProtocolError::PeerNotFound(msg.id))?;
        let dest = self
            .peers
            .lookup(dest_id)
            .ok_or(ProtocolError::PeerNotFound(msg.id))?;
        if !lobby.is_member(dest.id) {
            return Err(ProtocolError::CrossLobby(dest_id).into());
        }

        debug!("Forwarding type {} from peer {} to peer {}", msg.kind, peer_id, dest_id);
        dest.send(&msg.readdressed(lobby.wire_id(peer_id)));
        Ok(())
    }

    /// Take a peer out of its lobby, cascading to the lobby if needed
    pub(crate) fn leave(&mut self, peer_id: PeerId) {
        let Some(peer) = self.peers.lookup_mut(peer_id) else {
            return;
        };
        let lobby_id = match &peer.state {
            PeerState::Joined(id) => id.clone(),
            PeerState::Stranded(key) => {
                let key = *key;
                peer.state = PeerState::Unjoined;
                self.lobbies.leave_detached(key, peer_id);
                return;
            }
            PeerState::Unjoined | PeerState::Orphaned => return,
        };
        peer.state = PeerState::Unjoined;

        let Some(lobby) = self.lobbies.lookup_mut(&lobby_id) else {
            return;
        };
        lobby.remove_member(peer_id);
        info!("Peer {} left lobby {}", peer_id, lobby_id);

        if lobby.is_host(peer_id) {
            info!("Host {} left, closing lobby {}", peer_id, lobby_id);
            if let Some(lobby) = self.lobbies.delete(&lobby_id) {
                self.dissolve(&lobby, "Lobby closed");
            }
        } else if lobby.is_sealed() {
            // Remaining members are neither told nor disconnected, and keep
            // signaling each other through the detached lobby
            info!("Member {} left sealed lobby {}, removing it", peer_id, lobby_id);
            if let Some(key) = self.lobbies.detach(&lobby_id) {
                self.strand(key);
            }
        } else {
            let notice = WireMessage::peer_disconnect(lobby.wire_id(peer_id));
            for member in lobby.members() {
                self.peers.send(member, &notice);
            }
        }
    }

    /// Point every member of a detached lobby at it
    fn strand(&mut self, key: u64) {
        let Some(lobby) = self.lobbies.detached(key) else {
            return;
        };
        for member in lobby.members() {
            if let Some(peer) = self.peers.lookup_mut(member) {
                peer.state = PeerState::Stranded(key);
            }
        }
    }

    /// Close every member of a removed lobby
    pub(crate) fn dissolve(&mut self, lobby: &Lobby, reason: &str) {
        for member in lobby.members() {
            let Some(peer) = self.peers.lookup_mut(member) else {
                continue;
            };
            peer.state = PeerState::Orphaned;
            peer.close(CloseCode::Normal, reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use switchboard_core::is_lobby_id;

    use super::*;
    use crate::transport::testing::RecordingTransport;

    fn connect(relay: &Relay) -> (PeerId, Arc<RecordingTransport>) {
        let transport = RecordingTransport::new();
        let id = relay.connect(transport.clone());
        (id, transport)
    }

    fn msg(kind: u8, id: i64, data: &str) -> String {
        WireMessage {
            kind,
            id,
            data: data.into(),
        }
        .to_json()
        .unwrap()
    }

    fn wire(kind: MessageType, id: i64, data: &str) -> WireMessage {
        WireMessage::new(kind, id, data)
    }

    /// Create a lobby and return its id
    fn host_lobby(relay: &Relay, host: PeerId, transport: &RecordingTransport, mesh: bool) -> String {
        let flag = if mesh { 0 } else { 1 };
        relay.on_message(host, &msg(0, flag, "")).unwrap();
        let sent = transport.take();
        let ack = sent.last().unwrap();
        assert_eq!(ack.message_type(), Ok(MessageType::Join));
        ack.data.clone()
    }

    fn join(relay: &Relay, peer: PeerId, lobby: &str) {
        relay.on_message(peer, &msg(0, 0, lobby)).unwrap();
    }

    #[test]
    fn test_end_to_end_scenario() {
        let relay = Relay::default();
        let (p1, t1) = connect(&relay);
        let (p2, t2) = connect(&relay);
        assert_eq!((p1, p2), (1, 2));

        relay.on_message(p1, r#"{"type":0,"id":0,"data":""}"#).unwrap();
        let sent = t1.take();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], wire(MessageType::Id, 1, "true"));
        let lobby = sent[1].data.clone();
        assert_eq!(sent[1], wire(MessageType::Join, 0, &lobby));
        assert!(is_lobby_id(&lobby, 5));

        relay
            .on_message(p2, &format!(r#"{{"type":0,"id":0,"data":"{}"}}"#, lobby))
            .unwrap();
        assert_eq!(
            t2.take(),
            vec![
                wire(MessageType::Id, 2, "true"),
                wire(MessageType::PeerConnect, 1, ""),
                wire(MessageType::Join, 0, &lobby),
            ]
        );
        assert_eq!(t1.take(), vec![wire(MessageType::PeerConnect, 2, "")]);

        relay.on_message(p2, r#"{"type":4,"id":1,"data":"offer-sdp"}"#).unwrap();
        assert_eq!(t1.take(), vec![wire(MessageType::Offer, 2, "offer-sdp")]);
        assert!(t2.take().is_empty());
    }

    #[test]
    fn test_created_lobby_ids_unique() {
        let relay = Relay::default();
        let mut ids = std::collections::HashSet::new();
        for _ in 0..20 {
            let (peer, transport) = connect(&relay);
            let id = host_lobby(&relay, peer, &transport, true);
            assert!(is_lobby_id(&id, 5));
            assert!(ids.insert(id));
        }
        assert_eq!(relay.lobby_count(), 20);
    }

    #[test]
    fn test_first_joiner_is_host() {
        let relay = Relay::default();
        let (a, ta) = connect(&relay);
        let (b, tb) = connect(&relay);
        let lobby = host_lobby(&relay, a, &ta, true);
        join(&relay, b, &lobby);
        tb.take();

        // Host messages arrive from id 1, whatever its real id
        relay.on_message(a, &msg(5, b as i64, "answer")).unwrap();
        assert_eq!(tb.take(), vec![wire(MessageType::Answer, 1, "answer")]);
    }

    #[test]
    fn test_mesh_announcements() {
        let relay = Relay::default();
        // Burn an id so the host's real id is not 1
        connect(&relay);
        let (a, ta) = connect(&relay);
        let (b, tb) = connect(&relay);
        let (c, tc) = connect(&relay);

        let lobby = host_lobby(&relay, a, &ta, true);
        join(&relay, b, &lobby);
        ta.take();
        tb.take();
        join(&relay, c, &lobby);

        assert_eq!(
            tc.take(),
            vec![
                wire(MessageType::Id, c as i64, "true"),
                wire(MessageType::PeerConnect, 1, ""),
                wire(MessageType::PeerConnect, b as i64, ""),
                wire(MessageType::Join, 0, &lobby),
            ]
        );
        assert_eq!(ta.take(), vec![wire(MessageType::PeerConnect, c as i64, "")]);
        assert_eq!(tb.take(), vec![wire(MessageType::PeerConnect, c as i64, "")]);
        assert_eq!(relay.lobby_members(&lobby), Some(vec![a, b, c]));
    }

    #[test]
    fn test_relay_announcements() {
        let relay = Relay::default();
        let (a, ta) = connect(&relay);
        let (b, tb) = connect(&relay);
        let (c, tc) = connect(&relay);

        let lobby = host_lobby(&relay, a, &ta, false);
        join(&relay, b, &lobby);
        join(&relay, c, &lobby);

        assert_eq!(
            tb.take(),
            vec![
                wire(MessageType::Id, b as i64, ""),
                wire(MessageType::PeerConnect, 1, ""),
                wire(MessageType::Join, 0, &lobby),
            ]
        );
        assert_eq!(
            tc.take(),
            vec![
                wire(MessageType::Id, c as i64, ""),
                wire(MessageType::PeerConnect, 1, ""),
                wire(MessageType::Join, 0, &lobby),
            ]
        );
        assert_eq!(
            ta.take(),
            vec![
                wire(MessageType::PeerConnect, b as i64, ""),
                wire(MessageType::PeerConnect, c as i64, ""),
            ]
        );
    }

    #[test]
    fn test_mesh_flag_ignored_when_joining_existing() {
        let relay = Relay::default();
        let (a, ta) = connect(&relay);
        let (b, tb) = connect(&relay);
        let lobby = host_lobby(&relay, a, &ta, false);

        relay.on_message(b, &msg(0, 0, &lobby)).unwrap();
        assert_eq!(tb.take()[0], wire(MessageType::Id, b as i64, ""));
    }

    #[test]
    fn test_seal_by_host() {
        let relay = Relay::default();
        let (a, ta) = connect(&relay);
        let (b, tb) = connect(&relay);
        let (c, tc) = connect(&relay);
        let lobby = host_lobby(&relay, a, &ta, true);
        join(&relay, b, &lobby);
        ta.take();
        tb.take();

        relay.on_message(a, &msg(7, 0, "")).unwrap();
        assert_eq!(ta.take(), vec![WireMessage::seal()]);
        assert_eq!(tb.take(), vec![WireMessage::seal()]);
        assert_eq!(relay.lobby_is_sealed(&lobby), Some(true));

        let err = relay.on_message(c, &msg(0, 0, &lobby)).unwrap_err();
        assert_eq!(err, RelayError::Protocol(ProtocolError::LobbySealed(lobby.clone())));
        assert_eq!(tc.close_code(), Some(CloseCode::InvalidMessage));
        assert_eq!(relay.lobby_members(&lobby), Some(vec![a, b]));
    }

    #[test]
    fn test_seal_by_member_rejected() {
        let relay = Relay::default();
        let (a, ta) = connect(&relay);
        let (b, tb) = connect(&relay);
        let lobby = host_lobby(&relay, a, &ta, true);
        join(&relay, b, &lobby);
        ta.take();

        let err = relay.on_message(b, &msg(7, 0, "")).unwrap_err();
        assert_eq!(err, RelayError::Protocol(ProtocolError::NotHost { host: a }));
        assert_eq!(tb.closed(), Some((CloseCode::InvalidMessage, "Invalid message".into())));
        assert_eq!(relay.lobby_is_sealed(&lobby), Some(false));
        assert!(ta.take().is_empty());
        assert!(ta.closed().is_none());
    }

    #[test]
    fn test_join_unknown_lobby() {
        let relay = Relay::default();
        let (a, ta) = connect(&relay);

        let err = relay.on_message(a, &msg(0, 0, "nope1")).unwrap_err();
        assert_eq!(err, RelayError::Protocol(ProtocolError::LobbyNotFound("nope1".into())));
        assert_eq!(ta.close_code(), Some(CloseCode::InvalidMessage));
        assert!(ta.take().is_empty());
        assert_eq!(relay.peer_state(a), Some(PeerState::Unjoined));
    }

    #[test]
    fn test_unjoined_must_join_first() {
        let relay = Relay::default();
        let (a, ta) = connect(&relay);

        let err = relay.on_message(a, &msg(4, 1, "sdp")).unwrap_err();
        assert_eq!(err, RelayError::Protocol(ProtocolError::NotJoined(MessageType::Offer)));
        assert_eq!(ta.close_code(), Some(CloseCode::InvalidMessage));
    }

    #[test]
    fn test_rejected_messages_close_connection() {
        let cases = [
            ("garbage", "not json"),
            ("missing data", r#"{"type":0,"id":0}"#),
            ("missing id", r#"{"type":0,"data":""}"#),
            ("unknown type", r#"{"type":9,"id":0,"data":""}"#),
        ];
        for (name, text) in cases {
            let relay = Relay::default();
            let (a, ta) = connect(&relay);
            assert!(relay.on_message(a, text).is_err(), "{} accepted", name);
            assert_eq!(ta.close_code(), Some(CloseCode::InvalidMessage), "{}", name);
        }
    }

    #[test]
    fn test_joined_peer_restrictions() {
        for (kind, expected) in [
            (0, ProtocolError::AlreadyJoined),
            (2, ProtocolError::ServerOnly(MessageType::PeerConnect)),
            (8, ProtocolError::UnknownType(8)),
        ] {
            let relay = Relay::default();
            let (a, ta) = connect(&relay);
            host_lobby(&relay, a, &ta, true);

            let err = relay.on_message(a, &msg(kind, 1, "")).unwrap_err();
            assert_eq!(err, RelayError::Protocol(expected));
            assert_eq!(ta.close_code(), Some(CloseCode::InvalidMessage));
        }
    }

    #[test]
    fn test_forward_to_unknown_peer() {
        let relay = Relay::default();
        let (a, ta) = connect(&relay);
        host_lobby(&relay, a, &ta, true);

        let err = relay.on_message(a, &msg(6, 42, "cand")).unwrap_err();
        assert_eq!(err, RelayError::Protocol(ProtocolError::PeerNotFound(42)));
        assert_eq!(ta.close_code(), Some(CloseCode::InvalidMessage));
    }

    #[test]
    fn test_forward_across_lobbies_rejected() {
        let relay = Relay::default();
        let (a, ta) = connect(&relay);
        let (b, tb) = connect(&relay);
        let (c, tc) = connect(&relay);
        let (d, td) = connect(&relay);
        let first = host_lobby(&relay, a, &ta, true);
        let second = host_lobby(&relay, c, &tc, true);
        join(&relay, b, &first);
        join(&relay, d, &second);
        td.take();

        let err = relay.on_message(b, &msg(4, d as i64, "sdp")).unwrap_err();
        assert_eq!(err, RelayError::Protocol(ProtocolError::CrossLobby(d)));
        assert!(td.take().is_empty());
        assert_eq!(tb.close_code(), Some(CloseCode::InvalidMessage));
        assert!(td.closed().is_none());
    }

    #[test]
    fn test_forward_to_unjoined_peer_rejected() {
        let relay = Relay::default();
        let (a, ta) = connect(&relay);
        let (b, _tb) = connect(&relay);
        host_lobby(&relay, a, &ta, true);

        let err = relay.on_message(a, &msg(5, b as i64, "x")).unwrap_err();
        assert_eq!(err, RelayError::Protocol(ProtocolError::CrossLobby(b)));
    }

    #[test]
    fn test_member_leaves_open_lobby() {
        let relay = Relay::default();
        let (a, ta) = connect(&relay);
        let (b, tb) = connect(&relay);
        let (c, tc) = connect(&relay);
        let lobby = host_lobby(&relay, a, &ta, true);
        join(&relay, b, &lobby);
        join(&relay, c, &lobby);
        ta.take();
        tb.take();

        relay.on_close(c);
        assert_eq!(ta.take(), vec![wire(MessageType::PeerDisconnect, c as i64, "")]);
        assert_eq!(tb.take(), vec![wire(MessageType::PeerDisconnect, c as i64, "")]);
        assert_eq!(tc.take().len(), 4);
        assert_eq!(relay.lobby_members(&lobby), Some(vec![a, b]));
        assert_eq!(relay.peer_state(c), None);
        assert_eq!(relay.peer_count(), 2);
    }

    #[test]
    fn test_host_leaves_closes_lobby() {
        let relay = Relay::default();
        let (a, ta) = connect(&relay);
        let (b, tb) = connect(&relay);
        let (c, tc) = connect(&relay);
        let lobby = host_lobby(&relay, a, &ta, true);
        join(&relay, b, &lobby);
        join(&relay, c, &lobby);
        tb.take();
        tc.take();

        relay.on_close(a);
        assert_eq!(tb.closed(), Some((CloseCode::Normal, "Lobby closed".into())));
        assert_eq!(tc.closed(), Some((CloseCode::Normal, "Lobby closed".into())));
        assert!(tb.take().is_empty());
        assert_eq!(relay.lobby_members(&lobby), None);
        assert_eq!(relay.lobby_count(), 0);
        assert_eq!(relay.peer_state(b), Some(PeerState::Orphaned));

        // Their own close events find no lobby left to touch
        relay.on_close(b);
        relay.on_close(c);
        assert_eq!(relay.peer_count(), 0);
    }

    #[test]
    fn test_host_leaves_sealed_lobby_closes_members() {
        let relay = Relay::default();
        let (a, ta) = connect(&relay);
        let (b, tb) = connect(&relay);
        let lobby = host_lobby(&relay, a, &ta, true);
        join(&relay, b, &lobby);
        relay.on_message(a, &msg(7, 0, "")).unwrap();

        relay.on_close(a);
        assert_eq!(tb.close_code(), Some(CloseCode::Normal));
        assert_eq!(relay.lobby_count(), 0);
    }

    #[test]
    fn test_member_leaving_sealed_lobby_strands_the_rest() {
        let relay = Relay::default();
        let (a, ta) = connect(&relay);
        let (b, tb) = connect(&relay);
        let (c, _tc) = connect(&relay);
        let (d, td) = connect(&relay);
        let lobby = host_lobby(&relay, a, &ta, true);
        join(&relay, b, &lobby);
        join(&relay, c, &lobby);
        relay.on_message(a, &msg(7, 0, "")).unwrap();
        host_lobby(&relay, d, &td, true);
        ta.take();
        tb.take();

        relay.on_close(c);

        // Known quirk: the lobby vanishes but nobody is told or disconnected
        assert_eq!(relay.lobby_count(), 1);
        assert_eq!(relay.lobby_members(&lobby), None);
        assert!(ta.take().is_empty() && ta.closed().is_none());
        assert!(tb.take().is_empty() && tb.closed().is_none());
        assert!(matches!(relay.peer_state(a), Some(PeerState::Stranded(_))));
        assert_eq!(relay.peer_state(a), relay.peer_state(b));

        // Late candidates still get through, in both directions
        relay.on_message(b, &msg(6, 1, "candidate")).unwrap();
        assert_eq!(ta.take(), vec![wire(MessageType::Candidate, b as i64, "candidate")]);
        relay.on_message(a, &msg(6, b as i64, "candidate")).unwrap();
        assert_eq!(tb.take(), vec![wire(MessageType::Candidate, 1, "candidate")]);

        // The host may seal again
        relay.on_message(a, &msg(7, 0, "")).unwrap();
        assert_eq!(ta.take(), vec![WireMessage::seal()]);
        assert_eq!(tb.take(), vec![WireMessage::seal()]);

        // Neither swept as unjoined nor expired as a sealed lobby
        let report = relay.sweep_at(Instant::now() + Duration::from_secs(60));
        assert!(report.timed_out_peers.iter().all(|&p| p != a && p != b));
        assert!(report.expired_lobbies.is_empty());
        assert!(ta.closed().is_none() && tb.closed().is_none());

        // Peers outside the old lobby stay out of reach
        let err = relay.on_message(b, &msg(4, d as i64, "sdp")).unwrap_err();
        assert_eq!(err, RelayError::Protocol(ProtocolError::CrossLobby(d)));
        assert!(td.take().is_empty());

        let err = relay.on_message(a, &msg(0, 0, "")).unwrap_err();
        assert_eq!(err, RelayError::Protocol(ProtocolError::AlreadyJoined));
        assert_eq!(ta.close_code(), Some(CloseCode::InvalidMessage));
    }

    #[test]
    fn test_stranded_lobby_dropped_when_last_member_leaves() {
        let relay = Relay::default();
        let (a, ta) = connect(&relay);
        let (b, tb) = connect(&relay);
        let (c, _tc) = connect(&relay);
        let lobby = host_lobby(&relay, a, &ta, false);
        join(&relay, b, &lobby);
        join(&relay, c, &lobby);
        relay.on_message(a, &msg(7, 0, "")).unwrap();
        relay.on_close(c);
        assert_eq!(relay.state.lock().lobbies.detached_len(), 1);

        // The stranded host leaving closes nobody
        relay.on_close(a);
        assert!(tb.closed().is_none());
        assert_eq!(relay.state.lock().lobbies.detached_len(), 1);

        relay.on_close(b);
        assert_eq!(relay.state.lock().lobbies.detached_len(), 0);
        assert_eq!(relay.peer_count(), 0);
    }

    #[test]
    fn test_on_error_leaves_and_closes() {
        let relay = Relay::default();
        let (a, ta) = connect(&relay);
        let (b, tb) = connect(&relay);
        let lobby = host_lobby(&relay, a, &ta, true);
        join(&relay, b, &lobby);
        ta.take();

        relay.on_error(b, "connection reset");
        assert_eq!(tb.closed(), Some((CloseCode::InternalError, "Server error".into())));
        assert_eq!(ta.take(), vec![wire(MessageType::PeerDisconnect, b as i64, "")]);
        assert_eq!(relay.peer_count(), 1);

        // A close event afterwards is a no-op
        relay.on_close(b);
        assert_eq!(relay.peer_count(), 1);
    }

    #[test]
    fn test_messages_to_closed_peer_are_dropped() {
        let relay = Relay::default();
        let (a, ta) = connect(&relay);
        let (b, tb) = connect(&relay);
        let lobby = host_lobby(&relay, a, &ta, true);
        join(&relay, b, &lobby);
        tb.take();

        // Closed by the relay but its close event has not arrived yet
        tb.close(CloseCode::Normal, "going away");
        relay.on_message(a, &msg(4, b as i64, "sdp")).unwrap();
        assert!(tb.take().is_empty());
    }

    #[test]
    fn test_membership_is_mutual() {
        let relay = Relay::default();
        let (a, ta) = connect(&relay);
        let (b, _tb) = connect(&relay);
        let lobby = host_lobby(&relay, a, &ta, false);
        join(&relay, b, &lobby);

        for peer in relay.lobby_members(&lobby).unwrap() {
            assert_eq!(relay.peer_state(peer), Some(PeerState::Joined(lobby.clone())));
        }
        relay.on_close(b);
        assert_eq!(relay.lobby_members(&lobby), Some(vec![a]));
    }

    #[test]
    fn test_rejected_peer_sends_nothing_more() {
        let relay = Relay::default();
        let (a, ta) = connect(&relay);

        relay.on_message(a, "junk").unwrap_err();
        // Still registered until its close event, but no longer heard
        relay.on_message(a, &msg(0, 0, "")).unwrap();
        assert!(ta.take().is_empty());
        assert_eq!(relay.lobby_count(), 0);
        assert_eq!(relay.peer_state(a), Some(PeerState::Unjoined));

        relay.on_close(a);
        assert_eq!(relay.peer_count(), 0);
    }

    #[test]
    fn test_unusable_config_rejected() {
        let mut config = Config::default();
        config.lobby.id_length = 0;
        assert!(matches!(Relay::new(&config), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.timeouts.sweep_interval_ms = 0;
        assert!(matches!(Relay::new(&config), Err(ConfigError::Invalid(_))));

        assert!(Relay::new(&Config::default()).is_ok());
    }

    #[test]
    fn test_message_refreshes_activity() {
        let relay = Relay::default();
        let start = Instant::now();
        let (a, ta) = connect(&relay);
        let later = start + Duration::from_millis(700);

        relay.on_message_at(a, "junk", later).unwrap_err();
        assert_eq!(ta.close_code(), Some(CloseCode::InvalidMessage));
        assert!(relay.sweep_at(start + Duration::from_millis(1500)).timed_out_peers.is_empty());
    }
}
