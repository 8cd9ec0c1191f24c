//! Cluster membership and leadership-transfer administration gated by the
//! primacy coordinator's `transferLeaderAllowed` bit (spec.md §4.6, I7).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::engine::{ConsensusEngine, PeerId, SharedEngine};
use crate::error::EngineError;

pub type TransferId = Uuid;

/// Add/remove peer, reset priorities, and leadership transfer.
///
/// Methods that touch membership need no special gating; `transfer_leadership`
/// does, since only one transfer may be outstanding at a time and it must not
/// race a concurrent `gainPrimacy`/`losePrimacy`.
pub struct QuorumAdmin {
    engine: SharedEngine,
    transfer_leader_allowed: Arc<AtomicBool>,
    transfer_messages: Mutex<HashMap<TransferId, String>>,
    transfer_settle_delay: Duration,
    transfer_wait: Duration,
}

impl QuorumAdmin {
    pub fn new(
        engine: SharedEngine,
        transfer_leader_allowed: Arc<AtomicBool>,
        transfer_settle_delay: Duration,
        transfer_wait: Duration,
    ) -> Self {
        QuorumAdmin {
            engine,
            transfer_leader_allowed,
            transfer_messages: Mutex::new(HashMap::new()),
            transfer_settle_delay,
            transfer_wait,
        }
    }

    fn peers_with_priority(engine: &Arc<dyn ConsensusEngine>) -> Vec<(PeerId, u32)> {
        engine.group_info().peers.into_iter().map(|id| (id, 1)).collect()
    }

    pub async fn add_peer(&self, peer: PeerId) -> Result<(), EngineError> {
        let engine = self.engine.lock().await.clone();
        let mut peers = Self::peers_with_priority(&engine);
        if !peers.iter().any(|(id, _)| *id == peer) {
            peers.push((peer, 1));
        }
        engine.set_configuration(peers).await
    }

    /// Requires `peer` to already be marked unavailable by the engine
    /// (spec.md §4.6) — removing a reachable peer would shrink the quorum
    /// under a member that could still vote.
    pub async fn remove_peer(&self, peer: PeerId) -> Result<(), EngineError> {
        let engine = self.engine.lock().await.clone();
        let info = engine.group_info();
        if !info.unavailable_peers.contains(&peer) {
            return Err(EngineError::MembershipRejected(format!(
                "peer {peer} is not marked unavailable; refusing to remove a reachable member"
            )));
        }
        let remaining: Vec<_> = Self::peers_with_priority(&engine).into_iter().filter(|(id, _)| *id != peer).collect();
        engine.set_configuration(remaining).await
    }

    pub async fn reset_priorities(&self) -> Result<(), EngineError> {
        let engine = self.engine.lock().await.clone();
        let peers: Vec<_> = engine.group_info().peers.into_iter().map(|id| (id, 1)).collect();
        engine.set_configuration(peers).await
    }

    /// Atomically tests-and-clears `transferLeaderAllowed`, validates the
    /// target, raises its priority, and fires the transfer asynchronously.
    /// Returns immediately with a transfer id whose outcome is queryable
    /// via `transfer_message` (spec.md §4.6, §8 scenario 4).
    pub async fn transfer_leadership(self: &Arc<Self>, target: PeerId) -> TransferId {
        let id = Uuid::new_v4();

        if !self.transfer_leader_allowed.swap(false, Ordering::SeqCst) {
            self.transfer_messages.lock().await.insert(id, "transfer is not allowed right now".to_string());
            return id;
        }

        let engine = self.engine.lock().await.clone();
        let info = engine.group_info();
        if !info.peers.contains(&target) || Some(target) == info.leader_id {
            self.transfer_messages.lock().await.insert(id, "transfer target is not a valid cluster member".to_string());
            self.transfer_leader_allowed.store(true, Ordering::SeqCst);
            return id;
        }

        let mut peers = Self::peers_with_priority(&engine);
        for (peer_id, priority) in peers.iter_mut() {
            *priority = if *peer_id == target { 100 } else { 1 };
        }
        if let Err(e) = engine.set_configuration(peers).await {
            self.transfer_messages.lock().await.insert(id, e.to_string());
            self.transfer_leader_allowed.store(true, Ordering::SeqCst);
            return id;
        }

        let this = self.clone();
        let wait = self.transfer_wait;
        let delay = self.transfer_settle_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let engine = this.engine.lock().await.clone();
            match engine.transfer_leadership(target, wait).await {
                Ok(()) => {
                    this.transfer_messages.lock().await.insert(id, String::new());
                }
                Err(e) => {
                    warn!(error = %e, "leadership transfer failed");
                    this.transfer_messages.lock().await.insert(id, e.to_string());
                    this.transfer_leader_allowed.store(true, Ordering::SeqCst);
                }
            }
        });

        id
    }

    /// `None` while the transfer is still pending; `Some("")` on success;
    /// `Some(reason)` on failure.
    pub async fn transfer_message(&self, id: TransferId) -> Option<String> {
        self.transfer_messages.lock().await.get(&id).cloned()
    }
}
