//! Error taxonomy for the coordination layer (spec.md §7).
//!
//! Two enums: [`EngineError`] for failures surfaced by the consensus engine
//! boundary, and [`JournalError`] for everything the coordination layer
//! itself can fail with, including engine errors lifted via `#[from]`.

use crate::engine::PeerId;

/// Errors the `ConsensusEngine` contract may surface (spec.md §6, §7).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("consensus engine has no ready leader for this request")]
    LeaderNotReady,

    #[error("request to the consensus engine timed out")]
    Timeout,

    #[error("local peer is not the current leader (hint: {leader_hint:?})")]
    NotLeader { leader_hint: Option<PeerId> },

    #[error("membership change rejected: {0}")]
    MembershipRejected(String),

    #[error("consensus engine is shutting down")]
    ShuttingDown,

    #[error("engine I/O error: {0}")]
    Io(String),
}

impl EngineError {
    /// Transient errors (leader-not-ready, timeouts, retry-cache collisions)
    /// are retried with backoff; everything else is not (spec.md §7).
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::LeaderNotReady | EngineError::Timeout)
    }
}

/// Errors produced by the coordination layer itself.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("writer is closed: not primary")]
    NotPrimary,

    #[error("snapshot gate is closed; snapshotting is not permitted right now")]
    SnapshotNotAllowed,

    #[error("state machine is not in replay mode")]
    NotInReplayMode,

    #[error("no logical journal registered under {0:?}")]
    UnknownJournal(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("local peer is no longer primary; catch-up aborted")]
    NoLongerPrimary,

    #[error("fatal consistency violation: {0}")]
    Fatal(String),
}

impl JournalError {
    /// Whether this error indicates the process must abort rather than
    /// recover locally (spec.md §7 "Fatal consistency violations").
    pub fn is_fatal(&self) -> bool {
        matches!(self, JournalError::Fatal(_))
    }
}

pub type Result<T> = std::result::Result<T, JournalError>;
