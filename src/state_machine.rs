//! Applies committed entries to the logical journals it multiplexes, and
//! tracks enough state to prove to a newly-primary writer that the log has
//! fully drained before it starts serving (spec.md §4.1).

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, info};

use crate::engine::CommitSink;
use crate::entry::{JournalEntry, SequenceNumber};
use crate::error::{JournalError, Result};
use crate::registry::JournalRegistry;
use crate::snapshot_gate::SnapshotGate;

const NO_PRIMARY_START: SequenceNumber = SequenceNumber::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
enum Mode {
    Replay = 0,
    Serve = 1,
    Closing = 2,
}

impl Mode {
    fn from_u8(v: u8) -> Mode {
        match v {
            0 => Mode::Replay,
            1 => Mode::Serve,
            _ => Mode::Closing,
        }
    }
}

struct SuspendState {
    suspended: AtomicBool,
    on_interrupt: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    resumed: Notify,
}

/// Replay-mode standby, or pre-apply-aware primary, depending on `mode`.
///
/// In replay mode every committed entry is dispatched to its logical
/// journal (I3: exactly once, in order). In serve mode the state machine's
/// own application has already happened on the primary before the entry was
/// even proposed (pre-apply), so committed entries are no-ops here beyond
/// bookkeeping — except term-start sentinels, which still update
/// `lastPrimaryStartSN` so a catch-up loop elsewhere can observe them.
pub struct JournalStateMachine {
    registry: JournalRegistry,
    gate: Arc<SnapshotGate>,
    mode: AtomicU8,
    last_applied_sn: AtomicI64,
    last_primary_start_sn: AtomicI64,
    applied_tx: watch::Sender<SequenceNumber>,
    applied_rx: watch::Receiver<SequenceNumber>,
    suspend: SuspendState,
    /// Serializes `upgrade`/`install_snapshot`/`close` against each other.
    /// Never held during `apply`.
    lifecycle: Mutex<()>,
}

impl JournalStateMachine {
    pub fn new(registry: JournalRegistry, last_applied_sn: SequenceNumber) -> Arc<Self> {
        let (tx, rx) = watch::channel(last_applied_sn);
        Arc::new(JournalStateMachine {
            registry,
            gate: Arc::new(SnapshotGate::new(true)),
            mode: AtomicU8::new(Mode::Replay as u8),
            last_applied_sn: AtomicI64::new(last_applied_sn),
            last_primary_start_sn: AtomicI64::new(NO_PRIMARY_START),
            applied_tx: tx,
            applied_rx: rx,
            suspend: SuspendState {
                suspended: AtomicBool::new(false),
                on_interrupt: Mutex::new(None),
                resumed: Notify::new(),
            },
            lifecycle: Mutex::new(()),
        })
    }

    pub fn snapshot_gate(&self) -> Arc<SnapshotGate> {
        self.gate.clone()
    }

    pub fn last_applied_sn(&self) -> SequenceNumber {
        self.last_applied_sn.load(Ordering::SeqCst)
    }

    pub fn last_primary_start_sn(&self) -> Option<SequenceNumber> {
        match self.last_primary_start_sn.load(Ordering::SeqCst) {
            NO_PRIMARY_START => None,
            v => Some(v),
        }
    }

    pub fn applied_watch(&self) -> watch::Receiver<SequenceNumber> {
        self.applied_rx.clone()
    }

    fn mode(&self) -> Mode {
        Mode::from_u8(self.mode.load(Ordering::SeqCst))
    }

    fn advance_applied(&self, sn: SequenceNumber) {
        self.last_applied_sn.fetch_max(sn, Ordering::SeqCst);
        let _ = self.applied_tx.send(self.last_applied_sn.load(Ordering::SeqCst));
    }

    /// Invoked by the engine for each committed entry in SN order.
    pub async fn apply(&self, entry: JournalEntry) {
        loop {
            // Must register for the notification before re-checking the
            // flag: `notify_waiters` stores no permit for a waiter that
            // hasn't registered yet, so checking-then-waiting without
            // `enable()` first can miss a `resume`/`interrupt_suspend` that
            // lands between the load and the first poll.
            let notified = self.suspend.resumed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.suspend.suspended.load(Ordering::SeqCst) {
                break;
            }
            notified.await;
        }

        match self.mode() {
            Mode::Closing => {
                debug!(sn = entry.sn, "dropping apply after close");
            }
            Mode::Serve => {
                let _reader = self.gate.acquire_reader().await;
                if entry.is_sentinel() {
                    self.last_primary_start_sn.store(entry.sn, Ordering::SeqCst);
                }
                self.advance_applied(entry.sn);
            }
            Mode::Replay => {
                let _reader = self.gate.acquire_reader().await;
                if entry.is_sentinel() {
                    // Sentinels are what the catch-up loop waits on: they must be
                    // recorded here too, since they apply before `upgrade` flips
                    // the mode to Serve.
                    self.last_primary_start_sn.store(entry.sn, Ordering::SeqCst);
                } else if let Some(target) = entry.target.as_deref() {
                    match self.registry.get(target) {
                        Some(journal) => journal.apply(&entry.payload).await,
                        None => {
                            // Fatal: the log names a journal we don't have, so our
                            // state can no longer be trusted to match it. Relies on
                            // `panic = "abort"` in the release profile to take the
                            // whole process down rather than just this task.
                            panic!("no logical journal registered for target {target:?} at sn {}", entry.sn);
                        }
                    }
                }
                self.advance_applied(entry.sn);
            }
        }
    }

    /// Transitions replay → serve, returning the SN a writer should resume
    /// numbering from (spec.md §4.1, §4.5).
    pub async fn upgrade(&self) -> SequenceNumber {
        let _lifecycle = self.lifecycle.lock().await;
        self.mode.store(Mode::Serve as u8, Ordering::SeqCst);
        self.last_applied_sn()
    }

    /// Suspends delivery of further `apply` calls until `resume` or
    /// `interrupt_suspend`. Used while an external snapshot is being
    /// installed out of band.
    pub async fn suspend(&self, on_interrupt: impl FnOnce() + Send + 'static) {
        *self.suspend.on_interrupt.lock().await = Some(Box::new(on_interrupt));
        self.suspend.suspended.store(true, Ordering::SeqCst);
    }

    pub async fn resume(&self) {
        self.suspend.suspended.store(false, Ordering::SeqCst);
        self.suspend.on_interrupt.lock().await.take();
        self.suspend.resumed.notify_waiters();
    }

    /// Aborts a pending suspension, invoking its interrupt callback instead
    /// of resuming normally. Used when the state machine is closing while a
    /// catch-up import is still outstanding.
    pub async fn interrupt_suspend(&self) {
        if let Some(cb) = self.suspend.on_interrupt.lock().await.take() {
            cb();
        }
        self.suspend.suspended.store(false, Ordering::SeqCst);
        self.suspend.resumed.notify_waiters();
    }

    pub async fn take_local_snapshot(
        &self,
        dest: &mut (dyn tokio::io::AsyncWrite + Send + Unpin),
    ) -> Result<SequenceNumber> {
        let _writer = self.gate.acquire_writer().await?;
        let sn = self.last_applied_sn();
        for name in self.registry.names() {
            if let Some(journal) = self.registry.get(&name) {
                journal.snapshot(dest).await.map_err(|e| JournalError::Fatal(e.to_string()))?;
            }
        }
        info!(sn, "local snapshot complete");
        Ok(sn)
    }

    /// Installs an externally-produced snapshot, replacing all logical
    /// journals' state. Only valid in replay mode.
    pub async fn install_snapshot(
        &self,
        src: &mut (dyn tokio::io::AsyncRead + Send + Unpin),
        sn: SequenceNumber,
    ) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.mode() != Mode::Replay {
            return Err(JournalError::NotInReplayMode);
        }
        for name in self.registry.names() {
            if let Some(journal) = self.registry.get(&name) {
                journal.restore(src).await.map_err(|e| JournalError::Fatal(e.to_string()))?;
            }
        }
        self.last_applied_sn.store(sn, Ordering::SeqCst);
        let _ = self.applied_tx.send(sn);
        info!(sn, "installed external snapshot");
        Ok(())
    }

    /// Resolves once `lastAppliedSN >= target_sn`. Already-satisfied targets
    /// resolve immediately (spec.md §9 Open Question (a)).
    pub async fn catchup(&self, target_sn: SequenceNumber) {
        let mut rx = self.applied_rx.clone();
        loop {
            if *rx.borrow_and_update() >= target_sn {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub async fn close(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.mode.store(Mode::Closing as u8, Ordering::SeqCst);
        self.interrupt_suspend().await;
    }
}

#[async_trait]
impl CommitSink for JournalStateMachine {
    async fn apply(&self, entry: JournalEntry) {
        JournalStateMachine::apply(self, entry).await
    }
}

/// Shared, swappable handle to the currently active state machine —
/// replaced wholesale on every `losePrimacy` (spec.md §9).
pub type SharedStateMachine = Arc<Mutex<Arc<JournalStateMachine>>>;

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn replay_mode_tracks_last_applied_sn_in_order() {
        let sm = JournalStateMachine::new(JournalRegistry::new(), 0);
        sm.apply(JournalEntry::new(1, "x", Bytes::new())).await;
        sm.apply(JournalEntry::new(2, "x", Bytes::new())).await;
        assert_eq!(sm.last_applied_sn(), 2);
    }

    #[tokio::test]
    async fn serve_mode_records_sentinel_without_dispatching() {
        let sm = JournalStateMachine::new(JournalRegistry::new(), 5);
        sm.upgrade().await;
        sm.apply(JournalEntry::sentinel(-7)).await;
        assert_eq!(sm.last_primary_start_sn(), Some(-7));
        assert_eq!(sm.last_applied_sn(), 5);
    }

    #[tokio::test]
    async fn catchup_resolves_immediately_when_already_satisfied() {
        let sm = JournalStateMachine::new(JournalRegistry::new(), 10);
        tokio::time::timeout(std::time::Duration::from_millis(50), sm.catchup(3))
            .await
            .expect("catchup on an already-satisfied target must not block");
    }

    #[tokio::test]
    async fn suspend_blocks_apply_until_resume() {
        let sm = JournalStateMachine::new(JournalRegistry::new(), 0);
        sm.suspend(|| {}).await;

        let sm2 = sm.clone();
        let applied = tokio::spawn(async move {
            sm2.apply(JournalEntry::new(1, "x", Bytes::new())).await;
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(sm.last_applied_sn(), 0);

        sm.resume().await;
        applied.await.unwrap();
        assert_eq!(sm.last_applied_sn(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn resume_racing_apply_never_stalls_forever() {
        // Regression test for a lost-wakeup race: `notify_waiters` stores no
        // permit for a waiter that hasn't registered yet, so if `resume` ran
        // between `apply`'s suspended-flag check and its first poll of
        // `notified()`, the wakeup would be lost and `apply` would hang
        // forever. A single-threaded `#[tokio::test]` runtime never actually
        // schedules the two tasks concretely enough to open that window;
        // this needs a real multi-threaded runtime to have a chance of
        // reproducing it.
        for _ in 0..200 {
            let sm = JournalStateMachine::new(JournalRegistry::new(), 0);
            sm.suspend(|| {}).await;

            let sm2 = sm.clone();
            let applied = tokio::spawn(async move {
                sm2.apply(JournalEntry::new(1, "x", Bytes::new())).await;
            });

            let sm3 = sm.clone();
            tokio::spawn(async move {
                sm3.resume().await;
            });

            tokio::time::timeout(std::time::Duration::from_secs(2), applied)
                .await
                .expect("apply must not stall forever when resume races the suspend check")
                .unwrap();
        }
    }
}
