//! Manual sync session: Diff, build the tree, execute it, then record fresh
//! snapshots so the next run can tell edits, deletions and renames apart.

use crate::config::SyncConfig;
use crate::diff::{DiffEngine, DiffOutcome, ExcludedReplica, MergeMode};
use crate::error::SyncError;
use crate::executor::{ExecutionSummary, SyncExecutor};
use crate::ops::FileOps;
use crate::progress::ProgressSink;
use crate::snapshot::{Snapshot, SnapshotStore, Walker};
use crate::tree::{ChangeType, FinalState, NodeKind, SyncTree, TreeBuilder};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Outcome of one manual sync.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub group: String,
    pub raw_mode: bool,
    pub replicas: Vec<PathBuf>,
    pub excluded: Vec<PathBuf>,
    /// Replica operations the decision table asked for.
    pub planned: usize,
    pub summary: ExecutionSummary,
    /// Replicas whose snapshot could not be written.
    pub unsaved: Vec<PathBuf>,
    /// Deletions that failed somewhere and will be retried next run.
    pub retried_deletions: usize,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.summary.errors == 0 && self.unsaved.is_empty()
    }
}

pub struct SyncSession<'a> {
    config: &'a SyncConfig,
    ops: &'a dyn FileOps,
    store: &'a dyn SnapshotStore,
    progress: &'a dyn ProgressSink,
    walker: Walker,
}

impl<'a> SyncSession<'a> {
    pub fn new(
        config: &'a SyncConfig,
        ops: &'a dyn FileOps,
        store: &'a dyn SnapshotStore,
        progress: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            config,
            ops,
            store,
            progress,
            walker: Walker::new(config.skip_names()),
        }
    }

    /// Diff only. Nothing on disk changes.
    pub fn preview(&self, group: &str, roots: &[PathBuf]) -> Result<DiffOutcome, SyncError> {
        DiffEngine::new(self.store, self.walker.clone()).compare(group, roots)
    }

    pub fn run(&self, group: &str, roots: &[PathBuf]) -> Result<SyncReport, SyncError> {
        self.run_with_tree(group, roots).map(|(report, _)| report)
    }

    /// [`run`](Self::run), also handing back the executed tree with every
    /// slot's final state.
    pub fn run_with_tree(
        &self,
        group: &str,
        roots: &[PathBuf],
    ) -> Result<(SyncReport, SyncTree), SyncError> {
        let outcome = self.preview(group, roots)?;
        let mut tree = TreeBuilder::new().build(&outcome);
        let participating = outcome.roots();

        let summary =
            SyncExecutor::new(self.config, self.ops, self.progress, &participating).execute(&mut tree);

        let unsaved = self.save_snapshots(group, &participating);
        let retried_deletions = self.relog_failed_deletions(group, &participating, &tree);

        let report = SyncReport {
            group: group.to_string(),
            raw_mode: outcome.mode == MergeMode::Raw,
            replicas: participating,
            excluded: outcome
                .excluded
                .iter()
                .map(|ExcludedReplica { root, .. }| root.clone())
                .collect(),
            planned: outcome.table.operation_count(),
            summary,
            unsaved,
            retried_deletions,
        };
        info!(
            group,
            planned = report.planned,
            changes = report.summary.changes(),
            errors = report.summary.errors,
            "Sync session finished"
        );
        Ok((report, tree))
    }

    fn save_snapshots(&self, group: &str, roots: &[PathBuf]) -> Vec<PathBuf> {
        let mut unsaved = Vec::new();
        for root in roots {
            let saved = self
                .walker
                .walk(root)
                .and_then(|walk| self.store.save(root, group, &Snapshot::from_walk(&walk)));
            if let Err(e) = saved {
                warn!(replica = %root.display(), error = %e, "Failed to save snapshot");
                unsaved.push(root.clone());
            }
        }
        unsaved
    }

    /// A deletion that did not reach every replica is logged again at its
    /// source, so the next run still sees it as a deletion and not as a file
    /// missing from one replica.
    fn relog_failed_deletions(&self, group: &str, roots: &[PathBuf], tree: &SyncTree) -> usize {
        let mut count = 0;
        for node in tree.iter() {
            if node.kind != NodeKind::File || node.source().change != ChangeType::Delete {
                continue;
            }
            let failed = node
                .slots
                .iter()
                .any(|slot| slot.final_state() == FinalState::Error);
            if !failed {
                continue;
            }
            let root = &roots[node.source_position];
            match self.store.record_deletion(root, group, &node.path) {
                Ok(true) => count += 1,
                Ok(false) => debug!(path = %node.path, "Source has no snapshot, deletion not relogged"),
                Err(e) => warn!(path = %node.path, error = %e, "Failed to log deletion for retry"),
            }
        }
        count
    }
}
