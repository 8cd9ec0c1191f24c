//! Batching front-end that serializes append requests from concurrent RPC
//! handlers to the active `RaftJournalWriter` while preserving
//! per-logical-journal program order (spec.md §4.4).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use tokio::sync::{Mutex, Semaphore};

use crate::entry::SequenceNumber;
use crate::error::{JournalError, Result};
use crate::writer::raft_writer::RaftJournalWriter;

struct PerJournalOrder {
    order: Mutex<()>,
}

/// Each logical journal gets its own ordering mutex so appends to `blocks`
/// never wait behind appends to `inodes`; a separate semaphore caps total
/// concurrent flushes across all of them.
pub struct AsyncJournalWriter {
    writer: RwLock<Option<Arc<RaftJournalWriter>>>,
    queues: RwLock<HashMap<String, Arc<PerJournalOrder>>>,
    concurrency: Semaphore,
}

impl AsyncJournalWriter {
    pub fn new(max_concurrent_flushes: usize) -> Self {
        AsyncJournalWriter {
            writer: RwLock::new(None),
            queues: RwLock::new(HashMap::new()),
            concurrency: Semaphore::new(max_concurrent_flushes.max(1)),
        }
    }

    /// Installed by the primacy coordinator once `gainPrimacy` completes.
    pub fn install(&self, writer: Arc<RaftJournalWriter>) {
        *self.writer.write().unwrap() = Some(writer);
    }

    /// Torn down on `losePrimacy`: drains the underlying writer (which
    /// itself flushes in-flight appends) and fails any append after this
    /// point with "not primary".
    pub async fn close(&self) {
        let writer = self.writer.write().unwrap().take();
        if let Some(writer) = writer {
            writer.close().await;
        }
    }

    fn queue_for(&self, target: &str) -> Arc<PerJournalOrder> {
        if let Some(q) = self.queues.read().unwrap().get(target) {
            return q.clone();
        }
        self.queues
            .write()
            .unwrap()
            .entry(target.to_string())
            .or_insert_with(|| Arc::new(PerJournalOrder { order: Mutex::new(()) }))
            .clone()
    }

    /// Appends `payload` under `target`, preserving FIFO order against any
    /// other in-flight append addressed to the same logical journal.
    pub async fn append(&self, target: impl Into<String>, payload: Bytes) -> Result<SequenceNumber> {
        let target = target.into();
        let queue = self.queue_for(&target);
        let _order = queue.order.lock().await;

        let _permit = self.concurrency.acquire().await.map_err(|_| JournalError::NotPrimary)?;

        let writer = self.writer.read().unwrap().clone().ok_or(JournalError::NotPrimary)?;
        writer.append(Some(target), payload).await
    }
}
