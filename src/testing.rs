//! An in-process stand-in for a real Raft engine, used only by this crate's
//! own test suite. The real engine (spec.md §1 Non-goals: implementing
//! consensus is out of scope) is always external; this fake commits every
//! append immediately since there's no quorum to wait on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::engine::{CommitReply, CommitSink, ConsensusEngine, EngineFactory, GroupInfo, LifecycleState, PeerId, PrimacyState};
use crate::entry::JournalEntry;
use crate::error::EngineError;

struct Inner {
    lifecycle: LifecycleState,
    role: PrimacyState,
    peers: Vec<(PeerId, u32)>,
    commit_index: i64,
    unavailable: Vec<PeerId>,
}

pub struct FakeEngine {
    id: PeerId,
    inner: StdMutex<Inner>,
    sink: Arc<dyn CommitSink>,
    exit_disabled: AtomicBool,
    primacy_tx: watch::Sender<PrimacyState>,
    primacy_rx: watch::Receiver<PrimacyState>,
}

impl FakeEngine {
    pub fn new(id: PeerId, sink: Arc<dyn CommitSink>) -> Arc<Self> {
        let (tx, rx) = watch::channel(PrimacyState::Primary);
        Arc::new(FakeEngine {
            id,
            inner: StdMutex::new(Inner {
                lifecycle: LifecycleState::New,
                role: PrimacyState::Primary,
                peers: vec![(id, 1)],
                commit_index: 0,
                unavailable: Vec::new(),
            }),
            sink,
            exit_disabled: AtomicBool::new(false),
            primacy_tx: tx,
            primacy_rx: rx,
        })
    }

    pub fn exit_on_fault_disabled(&self) -> bool {
        self.exit_disabled.load(Ordering::SeqCst)
    }

    /// Test hook: simulates losing an election.
    pub fn force_standby(&self) {
        self.inner.lock().unwrap().role = PrimacyState::Standby;
        let _ = self.primacy_tx.send(PrimacyState::Standby);
    }

    /// Test hook: simulates the engine marking a peer unreachable after
    /// missed heartbeats, the precondition `removePeer` checks for
    /// (spec.md §4.6, §8 scenario 5).
    pub fn mark_unavailable(&self, peer: PeerId) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.unavailable.contains(&peer) {
            inner.unavailable.push(peer);
        }
    }
}

#[async_trait]
impl ConsensusEngine for FakeEngine {
    async fn start(&self) -> Result<(), EngineError> {
        self.inner.lock().unwrap().lifecycle = LifecycleState::Running;
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.inner.lock().unwrap().lifecycle = LifecycleState::Closed;
        Ok(())
    }

    fn lifecycle(&self) -> LifecycleState {
        self.inner.lock().unwrap().lifecycle
    }

    async fn append(&self, _call_id: u64, payload: JournalEntry) -> Result<CommitReply, EngineError> {
        let sn = {
            let mut inner = self.inner.lock().unwrap();
            if inner.role != PrimacyState::Primary {
                return Err(EngineError::NotLeader { leader_hint: None });
            }
            inner.commit_index = inner.commit_index.max(payload.sn);
            payload.sn
        };
        self.sink.apply(payload).await;
        Ok(CommitReply { sn })
    }

    fn group_info(&self) -> GroupInfo {
        let inner = self.inner.lock().unwrap();
        let commit_indices: HashMap<_, _> = inner.peers.iter().map(|(id, _)| (*id, inner.commit_index)).collect();
        GroupInfo {
            role: inner.role,
            peers: inner.peers.iter().map(|(id, _)| *id).collect(),
            commit_indices,
            leader_id: if inner.role == PrimacyState::Primary { Some(self.id) } else { None },
            unavailable_peers: inner.unavailable.clone(),
        }
    }

    async fn set_configuration(&self, peers: Vec<(PeerId, u32)>) -> Result<(), EngineError> {
        self.inner.lock().unwrap().peers = peers;
        Ok(())
    }

    async fn transfer_leadership(&self, _peer: PeerId, _wait: Duration) -> Result<(), EngineError> {
        self.force_standby();
        Ok(())
    }

    fn disable_exit_on_fault(&self) {
        self.exit_disabled.store(true, Ordering::SeqCst);
    }

    fn primacy_changes(&self) -> watch::Receiver<PrimacyState> {
        self.primacy_rx.clone()
    }
}

pub struct FakeEngineFactory {
    next_id: std::sync::atomic::AtomicU64,
}

impl FakeEngineFactory {
    pub fn new(starting_id: PeerId) -> Self {
        FakeEngineFactory { next_id: std::sync::atomic::AtomicU64::new(starting_id) }
    }
}

#[async_trait]
impl EngineFactory for FakeEngineFactory {
    async fn create(&self, sink: Arc<dyn CommitSink>) -> Arc<dyn ConsensusEngine> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        FakeEngine::new(id, sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::JournalStateMachine;
    use crate::registry::JournalRegistry;

    #[tokio::test]
    async fn single_node_commits_immediately() {
        let sm = JournalStateMachine::new(JournalRegistry::new(), 0);
        let engine = FakeEngine::new(1, sm.clone());
        engine.start().await.unwrap();
        let reply = engine.append(0, JournalEntry::new(1, "x", bytes::Bytes::new())).await.unwrap();
        assert_eq!(reply.sn, 1);
        assert_eq!(sm.last_applied_sn(), 1);
    }

    #[tokio::test]
    async fn append_fails_once_standby() {
        let sm = JournalStateMachine::new(JournalRegistry::new(), 0);
        let engine = FakeEngine::new(1, sm);
        engine.force_standby();
        let err = engine.append(0, JournalEntry::new(1, "x", bytes::Bytes::new())).await.unwrap_err();
        assert!(matches!(err, EngineError::NotLeader { .. }));
    }
}
