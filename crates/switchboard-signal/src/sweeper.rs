//! Periodic eviction of stale peers and expired lobbies

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, info};

use switchboard_core::{CloseCode, TimeoutConfig};

use crate::peer::{PeerId, PeerState};
use crate::router::{Relay, RelayState};

/// What a sweep pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sealed lobbies that were force-closed
    pub expired_lobbies: Vec<String>,
    /// Unjoined peers whose connections were closed
    pub timed_out_peers: Vec<PeerId>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired_lobbies.is_empty() && self.timed_out_peers.is_empty()
    }
}

impl RelayState {
    /// Expire sealed lobbies, then disconnect peers that never joined.
    ///
    /// Timed-out peers are only closed here; their close event removes them.
    pub(crate) fn sweep(&mut self, timeouts: &TimeoutConfig, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();

        for lobby_id in self.lobbies.expired(timeouts.sealed_lobby(), now) {
            if let Some(lobby) = self.lobbies.delete(&lobby_id) {
                info!("Sealed lobby {} timed out, closing", lobby_id);
                self.dissolve(&lobby, "Lobby sealed timeout");
                report.expired_lobbies.push(lobby_id);
            }
        }

        let join_timeout = timeouts.join();
        for peer in self.peers.iter() {
            if peer.state != PeerState::Unjoined
                || now.saturating_duration_since(peer.last_seen) < join_timeout
            {
                continue;
            }
            info!("Peer {} did not join in time, disconnecting", peer.id);
            peer.close(CloseCode::Normal, "Lobby join timeout");
            report.timed_out_peers.push(peer.id);
        }

        report
    }
}

/// Sweep on the configured interval until the task is aborted
pub fn spawn_sweeper(relay: Arc<Relay>) -> JoinHandle<()> {
    let period = relay.timeouts().sweep_interval();

    tokio::spawn(async move {
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let tick = ticker.tick().await;
            let report = relay.sweep_at(tick.into_std());
            if !report.is_empty() {
                debug!(
                    "Sweep closed {} lobbies and {} peers",
                    report.expired_lobbies.len(),
                    report.timed_out_peers.len()
                );
            }
        }
    })
}
