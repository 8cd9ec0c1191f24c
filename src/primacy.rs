//! Orchestrates `gainPrimacy` and `losePrimacy` (spec.md §4.5): the
//! catch-up loop that proves the log has drained before serving, the
//! replay→serve upgrade, writer installation, and the full engine/state
//! machine reset that runs on loss.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::Rng;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{JournalConfig, SnapshotWindowPolicy};
use crate::engine::{ConsensusEngine, EngineFactory, PrimacyState, SharedEngine};
use crate::entry::{JournalEntry, SequenceNumber};
use crate::error::{JournalError, Result};
use crate::registry::JournalRegistry;
use crate::state_machine::{JournalStateMachine, SharedStateMachine};
use crate::writer::{AsyncJournalWriter, RaftJournalWriter};

pub struct PrimacyCoordinator {
    config: JournalConfig,
    registry: JournalRegistry,
    factory: Arc<dyn EngineFactory>,
    engine: SharedEngine,
    state_machine: SharedStateMachine,
    async_writer: Arc<AsyncJournalWriter>,
    transfer_leader_allowed: Arc<AtomicBool>,
    /// Serializes gain/lose against each other; never held across the
    /// catch-up retry loop's sleeps.
    lifecycle: Mutex<()>,
}

impl PrimacyCoordinator {
    pub fn new(
        config: JournalConfig,
        registry: JournalRegistry,
        factory: Arc<dyn EngineFactory>,
        engine: SharedEngine,
        state_machine: SharedStateMachine,
        async_writer: Arc<AsyncJournalWriter>,
        transfer_leader_allowed: Arc<AtomicBool>,
    ) -> Self {
        PrimacyCoordinator {
            config,
            registry,
            factory,
            engine,
            state_machine,
            async_writer,
            transfer_leader_allowed,
            lifecycle: Mutex::new(()),
        }
    }

    pub async fn current_engine(&self) -> Arc<dyn ConsensusEngine> {
        self.engine.lock().await.clone()
    }

    pub async fn current_state_machine(&self) -> Arc<JournalStateMachine> {
        self.state_machine.lock().await.clone()
    }

    /// Runs when the engine reports the local peer has won election.
    pub async fn gain_primacy(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        let engine = self.engine.lock().await.clone();
        let state_machine = self.state_machine.lock().await.clone();

        state_machine.snapshot_gate().set_allowed(false);

        self.run_catchup(&engine, &state_machine).await?;

        let resume_sn = state_machine.upgrade().await;
        let writer = Arc::new(RaftJournalWriter::new(
            engine.clone(),
            resume_sn + 1,
            self.config.writer_inflight_bytes_bound,
        ));
        self.async_writer.install(writer);

        // `Always` means standbys and primaries alike may snapshot whenever
        // idle; `Never` (the default) keeps the gate closed on a serving
        // primary until an operator opens a maintenance window explicitly
        // via `run_maintenance_snapshot` (spec.md §4.2).
        if self.config.snapshot_window == SnapshotWindowPolicy::Always {
            state_machine.snapshot_gate().set_allowed(true);
        }

        self.transfer_leader_allowed.store(true, Ordering::SeqCst);
        info!(resume_sn, "gained primacy");
        Ok(())
    }

    /// Opens the snapshot gate just long enough to take one local snapshot,
    /// then restores whatever the gate's standing policy was before the
    /// call — the operator-triggered maintenance window spec.md §4.2
    /// describes for a primary that otherwise keeps the gate closed.
    pub async fn run_maintenance_snapshot(
        &self,
        dest: &mut (dyn tokio::io::AsyncWrite + Send + Unpin),
    ) -> Result<SequenceNumber> {
        let state_machine = self.state_machine.lock().await.clone();
        let gate = state_machine.snapshot_gate();
        let already_allowed = gate.is_allowed();

        if !already_allowed {
            gate.set_allowed(true);
        }
        let result = state_machine.take_local_snapshot(dest).await;
        if !already_allowed {
            gate.set_allowed(false);
        }
        result
    }

    /// Proves the replicated log has fully drained into this peer's state
    /// machine before it's safe to upgrade to serve mode: append a
    /// negative-SN sentinel unique to this attempt, then wait for the
    /// state machine to have applied it. If the wait times out — another
    /// leader may have appended in the meantime — draw a fresh sentinel and
    /// retry (spec.md §4.5).
    async fn run_catchup(&self, engine: &Arc<dyn ConsensusEngine>, state_machine: &Arc<JournalStateMachine>) -> Result<()> {
        loop {
            state_machine.snapshot_gate().wait_for_quiescence().await;

            let info = engine.group_info();
            tracing::debug!(known_peers = info.commit_indices.len(), "catch-up: querying engine state");
            if info.role != PrimacyState::Primary {
                return Err(JournalError::NoLongerPrimary);
            }

            let ts = self.draw_sentinel_sn();
            let sn_before = state_machine.last_applied_sn();

            self.append_sentinel_with_retry(engine, ts).await?;

            let proven = tokio::time::timeout(
                self.config.max_election_timeout(),
                Self::wait_for_proof(state_machine, sn_before, ts),
            )
            .await
            .unwrap_or(false);

            if proven {
                return Ok(());
            }
            warn!(ts, "catch-up proof timed out; drawing a fresh sentinel and retrying");
        }
    }

    async fn append_sentinel_with_retry(&self, engine: &Arc<dyn ConsensusEngine>, ts: SequenceNumber) -> Result<()> {
        let mut call_id: u64 = 0;
        loop {
            match engine.append(call_id, JournalEntry::sentinel(ts)).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_transient() => {
                    call_id = call_id.wrapping_add(1);
                    tokio::time::sleep(self.config.catchup_retry_interval).await;
                    continue;
                }
                Err(e) => return Err(JournalError::Engine(e)),
            }
        }
    }

    async fn wait_for_proof(state_machine: &Arc<JournalStateMachine>, sn_before: SequenceNumber, ts: SequenceNumber) -> bool {
        let mut rx = state_machine.applied_watch();
        loop {
            if state_machine.last_applied_sn() >= sn_before && state_machine.last_primary_start_sn() == Some(ts) {
                return true;
            }
            if rx.changed().await.is_err() {
                return false;
            }
        }
    }

    fn draw_sentinel_sn(&self) -> SequenceNumber {
        let mut rng = rand::thread_rng();
        -(rng.gen_range(1..SequenceNumber::MAX))
    }

    /// Runs when the engine reports the local peer is no longer primary.
    /// Per spec.md §9, the state machine is replaced rather than flipped
    /// back to replay mode in place, so pre-applied state that never
    /// committed under the old primacy can't poison the new replay.
    pub async fn lose_primacy(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.transfer_leader_allowed.store(false, Ordering::SeqCst);
        self.async_writer.close().await;

        let mut engine_guard = self.engine.lock().await;
        if let Err(e) = engine_guard.close().await {
            warn!(error = %e, "error closing engine during losePrimacy; continuing with reset");
        }

        let new_state_machine = JournalStateMachine::new(self.registry.clone(), 0);
        let new_engine = self.factory.create(new_state_machine.clone()).await;
        // Engine-restart failure is the one losePrimacy error that's fatal
        // rather than logged-and-swallowed (spec.md §7): we have no engine
        // left to serve even standby reads.
        new_engine.start().await.map_err(JournalError::Engine)?;
        new_state_machine.snapshot_gate().set_allowed(true);

        *engine_guard = new_engine;
        drop(engine_guard);
        *self.state_machine.lock().await = new_state_machine;

        info!("lost primacy; engine and state machine reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeEngine, FakeEngineFactory};

    fn coordinator_with_fake(config: JournalConfig) -> (PrimacyCoordinator, Arc<JournalStateMachine>) {
        let registry = JournalRegistry::new();
        let sm = JournalStateMachine::new(registry.clone(), 0);
        let engine = FakeEngine::new(1, sm.clone());
        let shared_engine: SharedEngine = Arc::new(Mutex::new(engine));
        let shared_sm: SharedStateMachine = Arc::new(Mutex::new(sm.clone()));
        let async_writer = Arc::new(AsyncJournalWriter::new(4));
        let transfer_allowed = Arc::new(AtomicBool::new(false));
        let factory = Arc::new(FakeEngineFactory::new(2));
        let coordinator = PrimacyCoordinator::new(
            config,
            registry,
            factory,
            shared_engine,
            shared_sm,
            async_writer,
            transfer_allowed,
        );
        (coordinator, sm)
    }

    #[tokio::test]
    async fn gain_primacy_installs_a_writer_and_allows_transfer() {
        let (coordinator, _sm) = coordinator_with_fake(JournalConfig::default());
        coordinator.gain_primacy().await.expect("single-node cluster always wins catch-up");
        assert!(coordinator.transfer_leader_allowed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn lose_primacy_resets_engine_and_state_machine() {
        let (coordinator, sm) = coordinator_with_fake(JournalConfig::default());
        coordinator.gain_primacy().await.unwrap();
        coordinator.lose_primacy().await.expect("fake engine restarts cleanly");
        assert!(!coordinator.transfer_leader_allowed.load(Ordering::SeqCst));
        let new_sm = coordinator.current_state_machine().await;
        assert!(!Arc::ptr_eq(&new_sm, &sm));
    }

    #[tokio::test]
    async fn maintenance_snapshot_closes_the_gate_again_when_default_policy_is_never() {
        let (coordinator, sm) = coordinator_with_fake(JournalConfig::default());
        coordinator.gain_primacy().await.unwrap();
        assert!(!sm.snapshot_gate().is_allowed(), "Never policy keeps the gate closed on a serving primary");

        let mut sink = Vec::new();
        coordinator.run_maintenance_snapshot(&mut sink).await.expect("maintenance window permits one snapshot");

        assert!(!sm.snapshot_gate().is_allowed(), "gate must close again once the maintenance window ends");
    }

    #[tokio::test]
    async fn always_policy_leaves_the_gate_open_after_gaining_primacy() {
        let mut config = JournalConfig::default();
        config.snapshot_window = crate::config::SnapshotWindowPolicy::Always;
        let (coordinator, sm) = coordinator_with_fake(config);
        coordinator.gain_primacy().await.unwrap();
        assert!(sm.snapshot_gate().is_allowed());
    }
}
