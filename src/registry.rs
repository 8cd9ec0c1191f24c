//! Multiplexing of a single replicated log across named logical journals
//! (spec.md GLOSSARY "logical journal", §2.9).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

/// A named sub-stream of the replicated log, owned by one master subsystem.
///
/// `apply` is invoked once per committed entry addressed to this journal,
/// strictly in SN order, while the owning state machine is in replay mode.
#[async_trait]
pub trait LogicalJournal: Send + Sync {
    fn name(&self) -> &str;

    async fn apply(&self, payload: &[u8]);

    /// Streams a consistent snapshot of this journal's state.
    async fn snapshot(&self, writer: &mut (dyn tokio::io::AsyncWrite + Send + Unpin)) -> std::io::Result<()>;

    /// Replaces this journal's entire state from a previously-written
    /// snapshot.
    async fn restore(&self, reader: &mut (dyn tokio::io::AsyncRead + Send + Unpin)) -> std::io::Result<()>;
}

/// Maps a logical-journal name to its handle — the multiplexer key
/// referenced by `JournalEntry::target`.
#[derive(Default, Clone)]
pub struct JournalRegistry {
    journals: Arc<RwLock<HashMap<String, Arc<dyn LogicalJournal>>>>,
}

impl JournalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, journal: Arc<dyn LogicalJournal>) {
        self.journals.write().unwrap().insert(journal.name().to_string(), journal);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn LogicalJournal>> {
        self.journals.read().unwrap().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.journals.read().unwrap().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingJournal {
        name: String,
        applied: AtomicUsize,
    }

    #[async_trait]
    impl LogicalJournal for CountingJournal {
        fn name(&self) -> &str {
            &self.name
        }

        async fn apply(&self, _payload: &[u8]) {
            self.applied.fetch_add(1, Ordering::SeqCst);
        }

        async fn snapshot(&self, _writer: &mut (dyn tokio::io::AsyncWrite + Send + Unpin)) -> std::io::Result<()> {
            Ok(())
        }

        async fn restore(&self, _reader: &mut (dyn tokio::io::AsyncRead + Send + Unpin)) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatches_to_the_right_journal() {
        let registry = JournalRegistry::new();
        let blocks = Arc::new(CountingJournal { name: "blocks".into(), applied: AtomicUsize::new(0) });
        let inodes = Arc::new(CountingJournal { name: "inodes".into(), applied: AtomicUsize::new(0) });
        registry.register(blocks.clone());
        registry.register(inodes.clone());

        registry.get("blocks").unwrap().apply(b"x").await;
        registry.get("blocks").unwrap().apply(b"y").await;

        assert_eq!(blocks.applied.load(Ordering::SeqCst), 2);
        assert_eq!(inodes.applied.load(Ordering::SeqCst), 0);
        assert!(registry.get("missing").is_none());
    }
}
