//! Tunables for the coordination layer.
//!
//! The teacher hardcodes its election/heartbeat timing as module constants
//! (`ELECTION_TIMEOUT`, `HEARTBEAT_TIMEOUT`); here they're promoted to a
//! configuration value so callers can tune them per deployment while the
//! defaults stay identical.

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct JournalConfig {
    /// Randomized election timeout range an engine should use; the upper
    /// bound also doubles as the catch-up proof deadline (spec.md §4.5).
    pub election_timeout: (Duration, Duration),
    pub heartbeat_timeout: Duration,
    /// Backoff between retries of a transient append failure during
    /// catch-up (e.g. `LeaderNotReady`).
    pub catchup_retry_interval: Duration,
    pub request_timeout: Duration,
    /// Total payload bytes the writer will admit concurrently before new
    /// appends block (spec.md §5 backpressure).
    pub writer_inflight_bytes_bound: usize,
    /// Bound on concurrently flushing logical journals in the async writer.
    pub writer_max_concurrent_flushes: usize,
    pub snapshot_window: SnapshotWindowPolicy,
    /// Delay before firing the actual engine-level leadership transfer
    /// after the target's priority has been raised, giving the new
    /// configuration time to propagate (spec.md §4.6).
    pub transfer_settle_delay: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotWindowPolicy {
    /// Standbys may snapshot whenever the gate is open (the common case).
    Always,
    /// Primary default: closed except during an operator-triggered
    /// maintenance window (spec.md §4.2, I4).
    Never,
}

impl Default for JournalConfig {
    fn default() -> Self {
        JournalConfig {
            election_timeout: (Duration::from_millis(400), Duration::from_millis(800)),
            heartbeat_timeout: Duration::from_millis(150),
            catchup_retry_interval: Duration::from_millis(100),
            request_timeout: Duration::from_secs(5),
            writer_inflight_bytes_bound: 64 * 1024 * 1024,
            writer_max_concurrent_flushes: 16,
            snapshot_window: SnapshotWindowPolicy::Never,
            transfer_settle_delay: Duration::from_millis(50),
        }
    }
}

impl JournalConfig {
    pub fn max_election_timeout(&self) -> Duration {
        self.election_timeout.1
    }
}
