pub mod async_writer;
pub mod raft_writer;

pub use async_writer::AsyncJournalWriter;
pub use raft_writer::RaftJournalWriter;
