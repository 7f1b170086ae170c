//! Applies folded operations from one replica to every other replica.
//!
//! Application is idempotent: an operation whose effect is already present
//! at a sibling is skipped there. This is what absorbs the echo of the
//! executor's own writes when the sibling's watcher reports them back.

use super::events::{ItemKind, LogicalOp};
use super::scheduler::OpSink;
use crate::config::SyncConfig;
use crate::error::FileOpError;
use crate::ops::{displace, FileOps};
use crate::progress::ProgressSink;
use crate::snapshot::{RelPath, SnapshotStore};
use crate::types::{hash_file, short_hash, ReplicaId};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// What happened at one sibling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveOutcome {
    Applied,
    Skipped,
    Failed,
}

pub struct LiveSyncExecutor {
    group: String,
    roots: Vec<PathBuf>,
    config: SyncConfig,
    ops: Arc<dyn FileOps>,
    store: Arc<dyn SnapshotStore>,
    progress: Arc<dyn ProgressSink>,
}

impl LiveSyncExecutor {
    pub fn new(
        group: impl Into<String>,
        roots: Vec<PathBuf>,
        config: SyncConfig,
        ops: Arc<dyn FileOps>,
        store: Arc<dyn SnapshotStore>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            group: group.into(),
            roots,
            config,
            ops,
            store,
            progress,
        }
    }

    /// Replica whose root contains `path`, with the path relative to it.
    /// The longest matching root wins so nested roots resolve correctly.
    fn locate(&self, path: &Path) -> Option<(ReplicaId, RelPath)> {
        self.roots
            .iter()
            .enumerate()
            .filter(|(_, root)| path.starts_with(root))
            .max_by_key(|(_, root)| root.components().count())
            .and_then(|(id, root)| RelPath::from_root(root, path).map(|rel| (id, rel)))
    }

    fn siblings(&self, origin: ReplicaId) -> impl Iterator<Item = (ReplicaId, &PathBuf)> {
        self.roots
            .iter()
            .enumerate()
            .filter(move |(id, _)| *id != origin)
    }

    /// Apply one operation to every sibling of the replica it came from.
    pub fn apply_op(&self, op: &LogicalOp) -> Vec<LiveOutcome> {
        let Some((origin, rel)) = self.locate(op.path()) else {
            debug!(path = %op.path().display(), "Event outside every replica");
            return Vec::new();
        };
        self.progress.report(rel.as_str(), 100.0);

        let outcomes: Vec<LiveOutcome> = match op {
            LogicalOp::Created { path, kind } | LogicalOp::Modified { path, kind } => {
                self.propagate_content(origin, &rel, path, *kind)
            }
            LogicalOp::Deleted { kind, .. } => self.propagate_delete(origin, &rel, *kind),
            LogicalOp::Renamed { to, kind, .. } => match RelPath::from_root(&self.roots[origin], to) {
                Some(to_rel) => self.propagate_rename(origin, &rel, &to_rel, to, *kind),
                None => {
                    debug!(to = %to.display(), "Renamed out of the replica, treating as delete");
                    self.propagate_delete(origin, &rel, *kind)
                }
            },
        };

        if outcomes.contains(&LiveOutcome::Failed) {
            self.progress.fail();
        } else {
            self.progress.complete();
        }
        outcomes
    }

    fn propagate_content(
        &self,
        origin: ReplicaId,
        rel: &RelPath,
        source: &Path,
        kind: ItemKind,
    ) -> Vec<LiveOutcome> {
        if kind == ItemKind::Folder || source.is_dir() {
            return self
                .siblings(origin)
                .map(|(_, root)| {
                    let dest = rel.under(root);
                    if self.ops.exists(&dest) {
                        return LiveOutcome::Skipped;
                    }
                    self.record(rel, self.ops.create_folder(&dest), "Folder created")
                })
                .collect();
        }

        let hash = match hash_file(source) {
            Ok(hash) => hash,
            Err(e) => {
                debug!(path = %source.display(), error = %e, "Source gone before propagation");
                return Vec::new();
            }
        };
        self.siblings(origin)
            .map(|(_, root)| {
                let dest = rel.under(root);
                let existed = self.ops.exists(&dest);
                if existed && hash_file(&dest).map(|h| h == hash).unwrap_or(false) {
                    trace!(path = %rel, hash = %short_hash(&hash), "Sibling already current");
                    return LiveOutcome::Skipped;
                }
                if existed {
                    displace(self.ops.as_ref(), &self.config, &dest);
                }
                self.record(rel, self.ops.copy_file(source, &dest), "Propagated")
            })
            .collect()
    }

    fn propagate_delete(&self, origin: ReplicaId, rel: &RelPath, kind: ItemKind) -> Vec<LiveOutcome> {
        let outcomes = self
            .siblings(origin)
            .map(|(_, root)| {
                let path = rel.under(root);
                if !self.ops.exists(&path) {
                    return LiveOutcome::Skipped;
                }
                let folder = kind == ItemKind::Folder || path.is_dir();
                if self.config.archive_limit > 0 {
                    let archived = if folder {
                        self.ops
                            .archive_folder(&path, &self.config.archive_name, self.config.archive_limit)
                    } else {
                        self.ops
                            .archive_file(&path, &self.config.archive_name, self.config.archive_limit)
                    };
                    if let Err(e) = archived {
                        warn!(path = %path.display(), error = %e, "Archive before delete failed, keeping item");
                        return LiveOutcome::Failed;
                    }
                }
                let removed = match (folder, self.config.recycle_on_delete) {
                    (true, true) => self.ops.delete_folder_to_recycle_bin(&path),
                    (true, false) => self.ops.delete_folder(&path),
                    (false, true) => self.ops.delete_file_to_recycle_bin(&path),
                    (false, false) => self.ops.delete_file(&path),
                };
                self.record(rel, removed, "Deleted")
            })
            .collect();

        match self.store.record_deletion(&self.roots[origin], &self.group, rel) {
            Ok(true) => {}
            Ok(false) => debug!(path = %rel, "Origin has no history yet, deletion left unlogged"),
            Err(e) => warn!(path = %rel, error = %e, "Failed to log deletion"),
        }
        outcomes
    }

    fn propagate_rename(
        &self,
        origin: ReplicaId,
        from: &RelPath,
        to: &RelPath,
        source: &Path,
        kind: ItemKind,
    ) -> Vec<LiveOutcome> {
        let folder = kind == ItemKind::Folder || source.is_dir();
        self.siblings(origin)
            .map(|(_, root)| {
                let old = from.under(root);
                let new = to.under(root);
                if self.ops.exists(&old) {
                    let moved = if folder {
                        self.ops.move_folder(&old, &new)
                    } else {
                        self.ops.move_file(&old, &new)
                    };
                    return self.record(to, moved, "Renamed");
                }
                if self.ops.exists(&new) {
                    return LiveOutcome::Skipped;
                }
                if !self.ops.exists(source) {
                    return LiveOutcome::Skipped;
                }
                let copied = if folder {
                    self.ops.copy_folder(source, &new)
                } else {
                    self.ops.copy_file(source, &new)
                };
                self.record(to, copied, "Created under new name")
            })
            .collect()
    }

    fn record(&self, rel: &RelPath, result: Result<(), FileOpError>, action: &str) -> LiveOutcome {
        match result {
            Ok(()) => {
                info!(path = %rel, action, "Live sync");
                LiveOutcome::Applied
            }
            Err(e) => {
                warn!(path = %rel, error = %e, kind = ?e.kind(), "Live sync failed");
                LiveOutcome::Failed
            }
        }
    }
}

impl OpSink for LiveSyncExecutor {
    fn apply(&mut self, ops: Vec<LogicalOp>) {
        for op in &ops {
            self.apply_op(op);
        }
    }
}
