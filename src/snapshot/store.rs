//! Snapshot persistence.
//!
//! The metadata for a group lives in a hidden folder inside each replica, one
//! JSON document per group.

use super::{LastKnownAction, LastKnownEntry, RelPath, Snapshot};
use crate::error::SnapshotError;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Load/save interface for replica snapshots
pub trait SnapshotStore: Send + Sync {
    fn load(&self, root: &Path, group: &str) -> Result<Option<Snapshot>, SnapshotError>;
    fn save(&self, root: &Path, group: &str, snapshot: &Snapshot) -> Result<(), SnapshotError>;
    /// Append a deletion to the last-known-state log. A replica with no
    /// snapshot for the group has no history to log against; nothing is
    /// written and `false` comes back.
    fn record_deletion(&self, root: &Path, group: &str, path: &RelPath)
        -> Result<bool, SnapshotError>;
}

/// JSON snapshot store under `<root>/<metadata_dir>/<group>.json`
#[derive(Debug, Clone)]
pub struct JsonSnapshotStore {
    metadata_dir: String,
}

impl JsonSnapshotStore {
    pub fn new(metadata_dir: impl Into<String>) -> Self {
        Self {
            metadata_dir: metadata_dir.into(),
        }
    }

    pub fn snapshot_path(&self, root: &Path, group: &str) -> PathBuf {
        root.join(&self.metadata_dir).join(format!("{}.json", group))
    }
}

impl SnapshotStore for JsonSnapshotStore {
    fn load(&self, root: &Path, group: &str) -> Result<Option<Snapshot>, SnapshotError> {
        let path = self.snapshot_path(root, group);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(SnapshotError::Io { path, source }),
        };
        let snapshot = serde_json::from_slice(&bytes)
            .map_err(|source| SnapshotError::Parse { path, source })?;
        Ok(Some(snapshot))
    }

    fn save(&self, root: &Path, group: &str, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        let path = self.snapshot_path(root, group);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| io_error(parent, source))?;
        }
        let json = serde_json::to_vec_pretty(snapshot).map_err(|source| SnapshotError::Parse {
            path: path.clone(),
            source,
        })?;

        // write-then-rename so a crash never leaves a torn snapshot
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|source| io_error(&tmp, source))?;
        std::fs::rename(&tmp, &path).map_err(|source| io_error(&path, source))?;

        debug!(
            path = %path.display(),
            files = snapshot.files.len(),
            "Saved snapshot"
        );
        Ok(())
    }

    fn record_deletion(
        &self,
        root: &Path,
        group: &str,
        path: &RelPath,
    ) -> Result<bool, SnapshotError> {
        let Some(mut snapshot) = self.load(root, group)? else {
            debug!(replica = %root.display(), path = %path, "No history, deletion not logged");
            return Ok(false);
        };
        if !snapshot.logged_deletions().any(|logged| logged == path) {
            snapshot.last_known_state.push(LastKnownEntry {
                name: path.clone(),
                action: LastKnownAction::Deleted,
                at: Utc::now(),
            });
            self.save(root, group, &snapshot)?;
        }
        Ok(true)
    }
}

fn io_error(path: &Path, source: std::io::Error) -> SnapshotError {
    SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    }
}
