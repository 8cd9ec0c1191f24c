//! Top-level wiring: ties the state machine, snapshot gate, writers,
//! primacy coordinator, and quorum admin together behind one handle, and
//! drives primacy transitions off the engine's push channel (spec.md §5
//! "single coarse lock for lifecycle operations").

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::JournalConfig;
use crate::engine::{ConsensusEngine, EngineFactory, GroupInfo, PrimacyState, SharedEngine};
use crate::entry::SequenceNumber;
use crate::error::Result;
use crate::primacy::PrimacyCoordinator;
use crate::quorum::{QuorumAdmin, TransferId};
use crate::registry::JournalRegistry;
use crate::state_machine::{JournalStateMachine, SharedStateMachine};
use crate::writer::AsyncJournalWriter;

/// A running replicated journal: one engine instance, one state machine,
/// and the coordination logic that moves between them on primacy changes.
pub struct JournalSystem {
    config: JournalConfig,
    engine: SharedEngine,
    state_machine: SharedStateMachine,
    async_writer: Arc<AsyncJournalWriter>,
    primacy: Arc<PrimacyCoordinator>,
    admin: Arc<QuorumAdmin>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl JournalSystem {
    pub async fn start(
        config: JournalConfig,
        registry: JournalRegistry,
        factory: Arc<dyn EngineFactory>,
    ) -> Result<Arc<Self>> {
        let state_machine = JournalStateMachine::new(registry.clone(), 0);
        let engine = factory.create(state_machine.clone()).await;
        engine.start().await.map_err(crate::error::JournalError::Engine)?;

        let engine: SharedEngine = Arc::new(Mutex::new(engine));
        let state_machine: SharedStateMachine = Arc::new(Mutex::new(state_machine));
        let async_writer = Arc::new(AsyncJournalWriter::new(config.writer_max_concurrent_flushes));
        let transfer_leader_allowed = Arc::new(AtomicBool::new(false));

        let primacy = Arc::new(PrimacyCoordinator::new(
            config.clone(),
            registry,
            factory,
            engine.clone(),
            state_machine.clone(),
            async_writer.clone(),
            transfer_leader_allowed.clone(),
        ));

        let admin = Arc::new(QuorumAdmin::new(
            engine.clone(),
            transfer_leader_allowed,
            config.transfer_settle_delay,
            config.max_election_timeout(),
        ));

        let system = Arc::new(JournalSystem {
            config,
            engine,
            state_machine,
            async_writer,
            primacy: primacy.clone(),
            admin,
            driver: Mutex::new(None),
        });

        let driver = tokio::spawn(Self::drive_primacy(primacy));
        *system.driver.lock().await = Some(driver);

        Ok(system)
    }

    /// Watches the active engine's primacy channel and runs `gainPrimacy`/
    /// `losePrimacy` on every transition. `watch::Receiver::changed` only
    /// fires on *subsequent* sends, so each time we subscribe to a (possibly
    /// new, post-`losePrimacy`) engine we react to its current value once up
    /// front before waiting on further changes. When that engine is later
    /// replaced, its sender is dropped and `changed` returns an error, which
    /// sends us back around the outer loop to pick up the new one.
    async fn drive_primacy(primacy: Arc<PrimacyCoordinator>) {
        loop {
            let engine = primacy.current_engine().await;
            let mut rx = engine.primacy_changes();

            Self::react_to_primacy(&primacy, *rx.borrow()).await;
            while rx.changed().await.is_ok() {
                let state = *rx.borrow_and_update();
                Self::react_to_primacy(&primacy, state).await;
            }
        }
    }

    async fn react_to_primacy(primacy: &Arc<PrimacyCoordinator>, state: PrimacyState) {
        let result = match state {
            PrimacyState::Primary => primacy.gain_primacy().await,
            PrimacyState::Standby => primacy.lose_primacy().await,
        };
        if let Err(e) = result {
            if e.is_fatal() {
                error!(error = %e, "fatal error driving primacy transition; aborting");
                panic!("fatal error driving primacy transition: {e}");
            }
            info!(error = %e, "primacy transition did not complete; will retry on next signal");
        }
    }

    pub async fn append(&self, target: impl Into<String>, payload: Bytes) -> Result<SequenceNumber> {
        self.async_writer.append(target, payload).await
    }

    pub async fn group_info(&self) -> GroupInfo {
        self.engine.lock().await.group_info()
    }

    pub async fn is_primary(&self) -> bool {
        self.group_info().await.role == PrimacyState::Primary
    }

    pub fn admin(&self) -> &Arc<QuorumAdmin> {
        &self.admin
    }

    pub async fn transfer_leadership(&self, target: crate::engine::PeerId) -> TransferId {
        self.admin.transfer_leadership(target).await
    }

    pub async fn last_applied_sn(&self) -> SequenceNumber {
        self.state_machine.lock().await.last_applied_sn()
    }

    /// Resolves once this peer's state machine has applied at least
    /// `target_sn` — the operator hook spec.md §4.1 describes for verifying
    /// a master has caught up to a specific point. Resolves against
    /// whichever state machine is current when called; a concurrent
    /// `losePrimacy` replaces it with a fresh one starting from the last
    /// on-disk snapshot, so a caller spanning a primacy change should
    /// re-issue the call against the new instance.
    pub async fn catchup(&self, target_sn: SequenceNumber) {
        let state_machine = self.state_machine.lock().await.clone();
        state_machine.catchup(target_sn).await;
    }

    /// Suspends delivery of further applies until `resume` — used while an
    /// external catch-up (e.g. importing a checkpoint) is in progress.
    pub async fn suspend(&self, on_interrupt: impl FnOnce() + Send + 'static) {
        let state_machine = self.state_machine.lock().await.clone();
        state_machine.suspend(on_interrupt).await;
    }

    pub async fn resume(&self) {
        let state_machine = self.state_machine.lock().await.clone();
        state_machine.resume().await;
    }

    /// Installs an externally-produced snapshot, replacing every logical
    /// journal's state. Fails if the current state machine is not in
    /// replay mode (spec.md §4.1).
    pub async fn install_snapshot(
        &self,
        src: &mut (dyn tokio::io::AsyncRead + Send + Unpin),
        sn: SequenceNumber,
    ) -> Result<()> {
        let state_machine = self.state_machine.lock().await.clone();
        state_machine.install_snapshot(src, sn).await
    }

    /// Operator hook for spec.md §8 scenario 3: take one snapshot during a
    /// maintenance window, even on a primary whose configured snapshot
    /// window policy otherwise keeps the gate closed while serving.
    pub async fn run_maintenance_snapshot(
        &self,
        dest: &mut (dyn tokio::io::AsyncWrite + Send + Unpin),
    ) -> Result<SequenceNumber> {
        self.primacy.run_maintenance_snapshot(dest).await
    }

    pub async fn close(&self) {
        if let Some(driver) = self.driver.lock().await.take() {
            driver.abort();
        }
        self.async_writer.close().await;
        let engine = self.engine.lock().await.clone();
        if let Err(e) = engine.close().await {
            tracing::warn!(error = %e, "error closing engine during shutdown");
        }
        self.state_machine.lock().await.close().await;
    }
}
