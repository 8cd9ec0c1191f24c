//! Coordination layer between a Raft-family consensus engine and a cluster
//! of replicated masters.
//!
//! The engine (an external dependency, modeled here as the
//! [`engine::ConsensusEngine`] trait) owns log replication, leader election,
//! and RPC transport. This crate owns everything downstream of "an entry
//! committed": pre-apply-aware state machine dispatch, the reader/writer
//! discipline between live applies and snapshots, the catch-up protocol
//! that proves the log has drained before a new primary starts serving, and
//! multiplexing one physical log across many named logical journals.

pub mod config;
pub mod engine;
pub mod entry;
pub mod error;
pub mod layout;
pub mod primacy;
pub mod quorum;
pub mod registry;
pub mod snapshot_gate;
pub mod state_machine;
pub mod system;
pub mod writer;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::JournalConfig;
pub use engine::{CommitReply, CommitSink, ConsensusEngine, EngineFactory, GroupInfo, LifecycleState, PeerId, PrimacyState};
pub use entry::{JournalEntry, SequenceNumber};
pub use error::{EngineError, JournalError};
pub use primacy::PrimacyCoordinator;
pub use quorum::{QuorumAdmin, TransferId};
pub use registry::{JournalRegistry, LogicalJournal};
pub use snapshot_gate::SnapshotGate;
pub use state_machine::JournalStateMachine;
pub use system::JournalSystem;
