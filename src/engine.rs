//! The boundary between this crate and a real Raft-family consensus engine
//! (spec.md §6). Log replication, leader election, and RPC transport are
//! entirely the engine's concern; this crate only drives it through
//! [`ConsensusEngine`] and reacts to the primacy transitions it publishes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::entry::{JournalEntry, SequenceNumber};
use crate::error::EngineError;

pub type PeerId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    New,
    Starting,
    Running,
    Closing,
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrimacyState {
    Standby,
    Primary,
}

#[derive(Clone, Debug)]
pub struct GroupInfo {
    pub role: PrimacyState,
    pub peers: Vec<PeerId>,
    pub commit_indices: HashMap<PeerId, SequenceNumber>,
    pub leader_id: Option<PeerId>,
    /// Peers the engine currently considers unreachable (missed heartbeats
    /// past its own liveness threshold). `removePeer` refuses to act on a
    /// peer absent from this set (spec.md §8 scenario 5).
    pub unavailable_peers: Vec<PeerId>,
}

#[derive(Clone, Copy, Debug)]
pub struct CommitReply {
    pub sn: SequenceNumber,
}

/// The contract a Raft-family consensus engine must provide.
///
/// Out of scope for this crate (spec.md §1 Non-goals): implementing the
/// consensus protocol itself, RPC transport, and vote/term bookkeeping all
/// live on the other side of this trait.
#[async_trait]
pub trait ConsensusEngine: Send + Sync {
    async fn start(&self) -> Result<(), EngineError>;

    async fn close(&self) -> Result<(), EngineError>;

    fn lifecycle(&self) -> LifecycleState;

    /// Replicates `payload` and resolves once the entry has committed, not
    /// merely been accepted. `call_id` lets the engine deduplicate retried
    /// calls from the same writer.
    async fn append(&self, call_id: u64, payload: JournalEntry) -> Result<CommitReply, EngineError>;

    fn group_info(&self) -> GroupInfo;

    async fn set_configuration(&self, peers: Vec<(PeerId, u32)>) -> Result<(), EngineError>;

    async fn transfer_leadership(&self, peer: PeerId, wait: Duration) -> Result<(), EngineError>;

    /// Disables the engine's own process-exit-on-internal-fault behavior so
    /// the coordination layer can drive an orderly abort instead of racing
    /// it (spec.md §5, §7).
    fn disable_exit_on_fault(&self);

    /// A push channel of primacy transitions. The initial value is the
    /// engine's role at subscription time; callers should treat the first
    /// read as a baseline and only react to subsequent changes. Modeled on
    /// `async-raft`'s `RaftMetrics` watch channel so the coordination layer
    /// never needs a back-reference into the engine it's observing.
    fn primacy_changes(&self) -> watch::Receiver<PrimacyState>;
}

/// Delivered by the engine for every committed entry, strictly in SN order,
/// from a single serial apply path per group (spec.md §5 I2/I3).
#[async_trait]
pub trait CommitSink: Send + Sync {
    async fn apply(&self, entry: JournalEntry);
}

/// Builds a fresh engine bound to a given commit sink. Used by
/// `PrimacyCoordinator::lose_primacy` to fully reinitialize the engine
/// rather than attempting to reset it in place (spec.md §4.5, §9).
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(&self, sink: Arc<dyn CommitSink>) -> Arc<dyn ConsensusEngine>;
}

/// Shared, swappable handle to the currently active engine instance.
pub type SharedEngine = Arc<tokio::sync::Mutex<Arc<dyn ConsensusEngine>>>;
