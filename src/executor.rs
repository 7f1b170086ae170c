//! Sync executor
//!
//! Visits the sync tree in pre-order and applies each pending node's decision to
//! every replica. Per-replica failures are logged and recorded as
//! [`FinalState::Error`] on that replica's slot; they never stop other replicas
//! or other nodes.

use crate::config::SyncConfig;
use crate::ops::{displace, FileOps};
use crate::progress::ProgressSink;
use crate::tree::{ChangeType, FinalState, NodeId, NodeKind, ReplicaSlot, SyncNode, SyncTree};
use crate::types::ReplicaId;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

/// Counts of final states across every replica slot after a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionSummary {
    pub processed: usize,
    pub invalid: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub renamed: usize,
    pub errors: usize,
}

impl ExecutionSummary {
    pub fn changes(&self) -> usize {
        self.created + self.updated + self.deleted + self.renamed
    }

    fn count(&mut self, state: FinalState) {
        match state {
            FinalState::Unchanged => {}
            FinalState::Created => self.created += 1,
            FinalState::Updated => self.updated += 1,
            FinalState::Deleted => self.deleted += 1,
            FinalState::Renamed | FinalState::CreatedRenamed => self.renamed += 1,
            FinalState::Error => self.errors += 1,
        }
    }
}

pub struct SyncExecutor<'a> {
    config: &'a SyncConfig,
    ops: &'a dyn FileOps,
    progress: &'a dyn ProgressSink,
    roots: &'a [PathBuf],
    processed: usize,
}

impl<'a> SyncExecutor<'a> {
    /// `roots[i]` is the root of replica `i` in the tree.
    pub fn new(
        config: &'a SyncConfig,
        ops: &'a dyn FileOps,
        progress: &'a dyn ProgressSink,
        roots: &'a [PathBuf],
    ) -> Self {
        Self {
            config,
            ops,
            progress,
            roots,
            processed: 0,
        }
    }

    pub fn execute(&mut self, tree: &mut SyncTree) -> ExecutionSummary {
        let total = tree.len();
        for id in tree.pre_order() {
            self.visit(tree, id, total);
        }

        let mut summary = ExecutionSummary {
            processed: self.processed,
            ..Default::default()
        };
        for node in tree.iter().filter(|n| n.kind != NodeKind::Root) {
            if node.invalid {
                summary.invalid += 1;
            }
            for slot in &node.slots {
                summary.count(slot.final_state());
            }
        }
        info!(
            processed = summary.processed,
            changes = summary.changes(),
            errors = summary.errors,
            "Sync applied"
        );
        summary
    }

    fn visit(&mut self, tree: &mut SyncTree, id: NodeId, total: usize) {
        self.processed += 1;
        let percent = self.processed as f64 * 100.0 / total.max(1) as f64;
        let node = tree.node(id);
        self.progress.report(node.display_name(), percent);

        if node.invalid {
            warn!(path = %node.path, "Skipping invalid node");
            self.progress.fail();
            return;
        }

        let kind = node.kind;
        let change = node.source().change;
        if kind != NodeKind::Root && node.is_pending() {
            match change {
                ChangeType::Delete => self.propagate_delete(tree, id, kind),
                ChangeType::Rename => self.propagate_move(tree, id, kind),
                ChangeType::New | ChangeType::Update | ChangeType::NoChange => {
                    self.propagate_copy(tree, id, kind)
                }
            }
        }

        if tree.node(id).slots.iter().any(|s| s.final_state() == FinalState::Error) {
            self.progress.fail();
        } else {
            self.progress.complete();
        }
    }

    /// Where node `id` lives at `replica`, spelled the way that replica spells it.
    fn at(&self, tree: &SyncTree, id: NodeId, replica: ReplicaId) -> PathBuf {
        tree.replica_path(id, replica).under(&self.roots[replica])
    }

    fn paths(&self, tree: &SyncTree, id: NodeId) -> Vec<PathBuf> {
        (0..tree.replica_count()).map(|i| self.at(tree, id, i)).collect()
    }

    fn parent_deleted(tree: &SyncTree, id: NodeId) -> Vec<bool> {
        let replicas = tree.replica_count();
        match tree.node(id).parent {
            Some(parent) => tree
                .node(parent)
                .slots
                .iter()
                .map(|s| s.final_state() == FinalState::Deleted)
                .collect(),
            None => vec![false; replicas],
        }
    }

    fn propagate_copy(&mut self, tree: &mut SyncTree, id: NodeId, kind: NodeKind) {
        let parent_deleted = Self::parent_deleted(tree, id);
        let paths = self.paths(tree, id);
        let node = tree.node_mut(id);
        let src = node.source_position;
        let src_path = &paths[src];
        let source_slot = node.slot(src).clone();

        for i in 0..node.slots.len() {
            if i == src {
                continue;
            }
            if parent_deleted[i] {
                debug!(path = %node.path, replica = i, "Parent deleted, skipping");
                continue;
            }
            if node.is_co_owned(i) {
                let state = if node.slot(i).meta_exists {
                    FinalState::Unchanged
                } else {
                    FinalState::Created
                };
                node.slot_mut(i).settle(state);
                continue;
            }

            let dest = &paths[i];
            let existed = node.slot(i).exists;
            let outcome = match kind {
                NodeKind::Folder if existed || self.ops.exists(dest) => {
                    node.slot_mut(i).settle(FinalState::Unchanged);
                    continue;
                }
                NodeKind::Folder => self.ops.create_folder(dest),
                _ => {
                    if existed {
                        displace(self.ops, self.config, dest);
                    }
                    self.ops.copy_file(src_path, dest)
                }
            };

            match outcome {
                Ok(()) => {
                    let state = if existed {
                        FinalState::Updated
                    } else {
                        FinalState::Created
                    };
                    let slot = node.slot_mut(i);
                    slot.stamp_from(&source_slot);
                    slot.settle(state);
                    info!(path = %node.path, replica = i, state = ?state, "Propagated");
                }
                Err(e) => {
                    error!(path = %node.path, replica = i, error = %e, "Propagation failed");
                    node.slot_mut(i).settle(FinalState::Error);
                }
            }
        }

        let source = node.slot_mut(src);
        let state = if source.matches_metadata() || (kind == NodeKind::Folder && source.meta_exists) {
            FinalState::Unchanged
        } else if source.meta_exists {
            FinalState::Updated
        } else {
            FinalState::Created
        };
        source.settle(state);
    }

    fn propagate_delete(&mut self, tree: &mut SyncTree, id: NodeId, kind: NodeKind) {
        let parent_deleted = Self::parent_deleted(tree, id);
        let paths = self.paths(tree, id);
        let node = tree.node_mut(id);
        let src = node.source_position;
        let folder = kind == NodeKind::Folder;
        let mut changed = false;

        for i in 0..node.slots.len() {
            if i == src {
                continue;
            }
            if parent_deleted[i] {
                node.slot_mut(i).settle(FinalState::Deleted);
                changed = true;
                continue;
            }
            if node.is_co_owned(i) {
                let state = if node.slot(i).meta_exists {
                    FinalState::Deleted
                } else {
                    FinalState::Unchanged
                };
                node.slot_mut(i).settle(state);
                continue;
            }

            let path = &paths[i];
            if self.config.archive_limit > 0 {
                let archived = if folder {
                    self.ops
                        .archive_folder(path, &self.config.archive_name, self.config.archive_limit)
                } else {
                    self.ops
                        .archive_file(path, &self.config.archive_name, self.config.archive_limit)
                };
                if let Err(e) = archived {
                    error!(path = %path.display(), error = %e, "Archive before delete failed, keeping item");
                    node.slot_mut(i).settle(FinalState::Error);
                    continue;
                }
            }

            let removed = match (folder, self.config.recycle_on_delete) {
                (true, true) => self.ops.delete_folder_to_recycle_bin(path),
                (true, false) => self.ops.delete_folder(path),
                (false, true) => self.ops.delete_file_to_recycle_bin(path),
                (false, false) => self.ops.delete_file(path),
            };
            match removed {
                Ok(()) => {
                    let slot = node.slot_mut(i);
                    slot.exists = false;
                    slot.settle(FinalState::Deleted);
                    changed = true;
                    info!(path = %node.path, replica = i, "Deleted");
                }
                Err(e) => {
                    error!(path = %node.path, replica = i, error = %e, "Delete failed");
                    node.slot_mut(i).settle(FinalState::Error);
                }
            }
        }

        let state = if changed {
            FinalState::Deleted
        } else {
            FinalState::Unchanged
        };
        node.slot_mut(src).settle(state);
    }

    fn propagate_move(&mut self, tree: &mut SyncTree, id: NodeId, kind: NodeKind) {
        let src = tree.node(id).source_position;
        let Some(to) = tree.node(id).renamed_to.clone() else {
            warn!(path = %tree.node(id).path, "Rename without a target name");
            self.fail_all(tree.node_mut(id));
            return;
        };
        // the node carrying the new name holds the authoritative content facts
        let target = tree.find(&to, kind);
        let carrier: Option<ReplicaSlot> = target.map(|sibling| tree.node(sibling).slot(src).clone());
        let olds = self.paths(tree, id);
        let news: Vec<PathBuf> = match target {
            Some(sibling) => self.paths(tree, sibling),
            None => self.roots.iter().map(|root| to.under(root)).collect(),
        };

        let node = tree.node_mut(id);
        let backfill = carrier.unwrap_or_else(|| node.slot(src).clone());
        let folder = kind == NodeKind::Folder;
        let mut changed = false;

        for i in 0..node.slots.len() {
            if i == src {
                continue;
            }
            if node.is_co_owned(i) {
                node.slot_mut(i).settle(FinalState::Renamed);
                changed = true;
                continue;
            }

            let (old, new) = (&olds[i], &news[i]);
            let (result, state) = if self.ops.exists(old) {
                let moved = if folder {
                    self.ops.move_folder(old, new)
                } else {
                    self.ops.move_file(old, new)
                };
                (moved, FinalState::Renamed)
            } else {
                let src_new = &news[src];
                let copied = if folder {
                    self.ops.copy_folder(src_new, new)
                } else {
                    self.ops.copy_file(src_new, new)
                };
                (copied, FinalState::CreatedRenamed)
            };

            match result {
                Ok(()) => {
                    let slot = node.slot_mut(i);
                    if state == FinalState::CreatedRenamed {
                        slot.stamp_from(&backfill);
                    }
                    slot.settle(state);
                    changed = true;
                    info!(from = %node.path, to = %to, replica = i, state = ?state, "Renamed");
                }
                Err(e) => {
                    error!(from = %node.path, to = %to, replica = i, error = %e, "Rename failed");
                    node.slot_mut(i).settle(FinalState::Error);
                }
            }
        }

        let state = if changed {
            FinalState::Renamed
        } else {
            FinalState::Unchanged
        };
        node.slot_mut(src).settle(state);
    }

    fn fail_all(&self, node: &mut SyncNode) {
        let src = node.source_position;
        for (i, slot) in node.slots.iter_mut().enumerate() {
            if i != src && !slot.is_settled() {
                slot.settle(FinalState::Error);
            }
        }
    }
}
