//! Reader/writer discipline between appliers and snapshotters (spec.md
//! §4.2, invariant I4): appliers are readers, a snapshotter is the sole
//! writer, and `allowed` decides whether a snapshot may even be attempted.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{JournalError, Result};

pub struct SnapshotGate {
    allowed: AtomicBool,
    lock: RwLock<()>,
}

impl SnapshotGate {
    pub fn new(allowed: bool) -> Self {
        SnapshotGate { allowed: AtomicBool::new(allowed), lock: RwLock::new(()) }
    }

    pub fn set_allowed(&self, allowed: bool) {
        self.allowed.store(allowed, Ordering::SeqCst);
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed.load(Ordering::SeqCst)
    }

    /// Acquired by appliers for the duration of a single `apply` call.
    pub async fn acquire_reader(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().await
    }

    /// Acquired by the snapshotter. Fails fast if `allowed` is false rather
    /// than blocking behind a gate that may never open.
    pub async fn acquire_writer(&self) -> Result<RwLockWriteGuard<'_, ()>> {
        if !self.is_allowed() {
            return Err(JournalError::SnapshotNotAllowed);
        }
        let guard = self.lock.write().await;
        if !self.is_allowed() {
            return Err(JournalError::SnapshotNotAllowed);
        }
        Ok(guard)
    }

    /// Blocks until any writer currently holding the gate releases it,
    /// ignoring `allowed`. Used by the catch-up protocol to wait out an
    /// in-progress snapshot before proving log drainage (spec.md §4.5).
    pub async fn wait_for_quiescence(&self) {
        let _guard = self.lock.write().await;
    }
}
