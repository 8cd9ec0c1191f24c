//! On-disk directory layout for a single journal (spec.md §6 persistence
//! layout): one directory per journal, with the consensus engine owning a
//! subdirectory named by its group UUID underneath it.

use std::path::PathBuf;

use uuid::Uuid;

pub struct JournalLayout {
    root: PathBuf,
    group_id: Uuid,
}

impl JournalLayout {
    pub fn new(root: impl Into<PathBuf>, group_id: Uuid) -> Self {
        JournalLayout { root: root.into(), group_id }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    pub fn group_dir(&self) -> PathBuf {
        self.root.join(self.group_id.to_string())
    }

    /// Renames a legacy on-disk layout — the group-UUID directory sitting
    /// directly alongside the journal root instead of underneath it — into
    /// the current layout, if present and the current layout is absent.
    pub async fn migrate_legacy_layout(&self) -> std::io::Result<()> {
        let legacy = match self.root.parent() {
            Some(parent) => parent.join(self.group_id.to_string()),
            None => return Ok(()),
        };
        let current = self.group_dir();
        if tokio::fs::metadata(&legacy).await.is_ok() && tokio::fs::metadata(&current).await.is_err() {
            tokio::fs::create_dir_all(&self.root).await?;
            tokio::fs::rename(&legacy, &current).await?;
        }
        Ok(())
    }

    /// Removes all contents of the journal root, recreating it empty.
    /// Fails if the path exists but isn't accessible.
    pub async fn format(&self) -> std::io::Result<()> {
        if tokio::fs::metadata(&self.root).await.is_ok() {
            tokio::fs::remove_dir_all(&self.root).await?;
        }
        tokio::fs::create_dir_all(&self.root).await
    }
}
