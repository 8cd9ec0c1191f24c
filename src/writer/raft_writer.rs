//! Append-side adapter used only on the primary (spec.md §4.3). Assigns
//! strictly serial sequence numbers and bounds in-flight bytes so a slow
//! engine applies backpressure to callers instead of buffering unbounded.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Semaphore;

use crate::engine::ConsensusEngine;
use crate::entry::{JournalEntry, SequenceNumber};
use crate::error::{JournalError, Result};

pub struct RaftJournalWriter {
    engine: Arc<dyn ConsensusEngine>,
    next_sn: AtomicI64,
    next_call_id: AtomicU64,
    closed: AtomicBool,
    inflight: Semaphore,
    inflight_bytes_bound: usize,
}

impl RaftJournalWriter {
    pub fn new(engine: Arc<dyn ConsensusEngine>, next_sn: SequenceNumber, inflight_bytes_bound: usize) -> Self {
        RaftJournalWriter {
            engine,
            next_sn: AtomicI64::new(next_sn),
            next_call_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            inflight: Semaphore::new(inflight_bytes_bound.max(1)),
            inflight_bytes_bound: inflight_bytes_bound.max(1),
        }
    }

    /// Assigns the next SN, submits the entry, and resolves once the engine
    /// reports commit.
    pub async fn append(&self, target: Option<String>, payload: Bytes) -> Result<SequenceNumber> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(JournalError::NotPrimary);
        }

        let permits = payload.len().clamp(1, self.inflight_bytes_bound) as u32;
        let permit = match self.inflight.acquire_many(permits).await {
            Ok(p) => p,
            Err(_) => return Err(JournalError::NotPrimary),
        };

        let sn = self.next_sn.fetch_add(1, Ordering::SeqCst);
        let call_id = self.next_call_id.fetch_add(1, Ordering::SeqCst);
        let entry = JournalEntry { sn, target, payload };

        let result = self.engine.append(call_id, entry).await;
        drop(permit);

        if self.closed.load(Ordering::SeqCst) {
            return Err(JournalError::NotPrimary);
        }

        result.map(|reply| reply.sn).map_err(JournalError::Engine)
    }

    /// Refuses new appends, then waits for every in-flight one to resolve
    /// by reclaiming the entire permit pool.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.inflight.acquire_many(self.inflight_bytes_bound as u32).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CommitReply, EngineError, GroupInfo, LifecycleState, PeerId, PrimacyState};
    use async_trait::async_trait;
    use tokio::sync::watch;

    struct EchoEngine {
        committed: std::sync::Mutex<Vec<JournalEntry>>,
    }

    #[async_trait]
    impl ConsensusEngine for EchoEngine {
        async fn start(&self) -> std::result::Result<(), EngineError> {
            Ok(())
        }
        async fn close(&self) -> std::result::Result<(), EngineError> {
            Ok(())
        }
        fn lifecycle(&self) -> LifecycleState {
            LifecycleState::Running
        }
        async fn append(&self, _call_id: u64, payload: JournalEntry) -> std::result::Result<CommitReply, EngineError> {
            let sn = payload.sn;
            self.committed.lock().unwrap().push(payload);
            Ok(CommitReply { sn })
        }
        fn group_info(&self) -> GroupInfo {
            GroupInfo {
                role: PrimacyState::Primary,
                peers: vec![1],
                commit_indices: Default::default(),
                leader_id: Some(1),
                unavailable_peers: Vec::new(),
            }
        }
        async fn set_configuration(&self, _peers: Vec<(PeerId, u32)>) -> std::result::Result<(), EngineError> {
            Ok(())
        }
        async fn transfer_leadership(&self, _peer: PeerId, _wait: std::time::Duration) -> std::result::Result<(), EngineError> {
            Ok(())
        }
        fn disable_exit_on_fault(&self) {}
        fn primacy_changes(&self) -> watch::Receiver<PrimacyState> {
            watch::channel(PrimacyState::Primary).1
        }
    }

    #[tokio::test]
    async fn assigns_strictly_increasing_sns() {
        let engine = Arc::new(EchoEngine { committed: std::sync::Mutex::new(Vec::new()) });
        let writer = RaftJournalWriter::new(engine.clone(), 1, 1024);

        let a = writer.append(Some("x".into()), Bytes::from_static(b"a")).await.unwrap();
        let b = writer.append(Some("x".into()), Bytes::from_static(b"b")).await.unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
    }

    #[tokio::test]
    async fn rejects_appends_after_close() {
        let engine = Arc::new(EchoEngine { committed: std::sync::Mutex::new(Vec::new()) });
        let writer = RaftJournalWriter::new(engine, 1, 1024);
        writer.close().await;
        let err = writer.append(Some("x".into()), Bytes::from_static(b"a")).await.unwrap_err();
        assert!(matches!(err, JournalError::NotPrimary));
    }
}
