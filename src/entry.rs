//! The wire envelope for a single replicated log entry.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Monotonic sequence number assigned by the writer on append.
///
/// Nonnegative values identify real entries in submission order. Negative
/// values are reserved for term-start sentinels used by the catch-up
/// protocol (see `JournalEntry::sentinel`); they never carry a payload and
/// are never delivered to a logical journal.
pub type SequenceNumber = i64;

/// A single entry in the replicated log.
///
/// `target` names the logical journal the payload belongs to, fanned out by
/// the `JournalRegistry`; it is absent for term-start sentinels. Beyond
/// that the envelope is opaque — operation semantics live entirely inside
/// `payload`, whose encoding is a private contract between a logical
/// journal and itself.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JournalEntry {
    pub sn: SequenceNumber,
    pub target: Option<String>,
    pub payload: Bytes,
}

impl JournalEntry {
    pub fn new(sn: SequenceNumber, target: impl Into<String>, payload: Bytes) -> Self {
        JournalEntry { sn, target: Some(target.into()), payload }
    }

    /// Builds a term-start sentinel: no target, no payload, negative SN.
    pub fn sentinel(sn: SequenceNumber) -> Self {
        assert!(sn < 0, "sentinel entries must carry a negative sequence number");
        JournalEntry { sn, target: None, payload: Bytes::new() }
    }

    pub fn is_sentinel(&self) -> bool {
        self.sn < 0
    }

    pub fn encode(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_has_no_target_or_payload() {
        let s = JournalEntry::sentinel(-42);
        assert!(s.is_sentinel());
        assert!(s.target.is_none());
        assert!(s.payload.is_empty());
    }

    #[test]
    fn encode_decode_preserves_target_and_payload() {
        let entry = JournalEntry::new(7, "blocks", Bytes::from_static(b"hello"));
        let encoded = entry.encode().expect("encode");
        let decoded = JournalEntry::decode(&encoded).expect("decode");
        assert_eq!(decoded.sn, 7);
        assert_eq!(decoded.target.as_deref(), Some("blocks"));
        assert_eq!(decoded.payload.as_ref(), b"hello");
    }

    #[test]
    #[should_panic]
    fn sentinel_rejects_nonnegative_sn() {
        JournalEntry::sentinel(0);
    }
}
