//! Diff engine
//!
//! Walks every replica of a sync group, classifies each replica against its own
//! snapshot when enough history exists, and folds the replicas together into a
//! [`DecisionTable`].
//!
//! Two modes:
//! - raw N-way merge when fewer than two replicas have a snapshot
//! - metadata-aware merge otherwise, with first-class deletions and renames
//!
//! Both modes share the forward+backward pairwise fold in [`merge`], which is
//! what makes the outcome independent of the order replicas are listed in.

mod compare;
mod merge;
mod reconcile;
mod table;

pub use compare::{compare_content, compare_with_standing, ContentOrder, Standing};
pub use reconcile::{reconcile, ChangeClassification, Classified, Reconciliation};
pub use table::{DecisionEntry, DecisionKind, DecisionTable, Target};

use crate::error::SyncError;
use crate::snapshot::{FileRecord, RelKey, RelPath, ReplicaWalk, Snapshot, SnapshotStore, Walker};
use crate::types::{ContentHash, ReplicaId};
use merge::{Merger, PendingOp, ReplicaView};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Everything the engine learned about one participating replica.
#[derive(Debug, Clone)]
pub struct ReplicaState {
    pub id: ReplicaId,
    pub root: PathBuf,
    pub walk: ReplicaWalk,
    pub snapshot: Option<Snapshot>,
    /// Present only in metadata-aware mode, for replicas with a snapshot.
    pub reconciliation: Option<Reconciliation>,
}

impl ReplicaState {
    pub fn has_metadata(&self) -> bool {
        self.snapshot.is_some()
    }

    pub fn class(&self, key: &RelKey) -> Option<&ChangeClassification> {
        self.reconciliation.as_ref().and_then(|rec| rec.class(key))
    }

    fn holds(&self, key: &RelKey) -> Option<ContentHash> {
        self.live(key).map(|record| record.hash)
    }

    fn live(&self, key: &RelKey) -> Option<&FileRecord> {
        self.walk.files.iter().find(|record| &record.key() == key)
    }
}

/// A replica left out of the run because it could not be read.
#[derive(Debug, Clone)]
pub struct ExcludedReplica {
    pub root: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    Raw,
    MetadataAware,
}

#[derive(Debug, Clone)]
pub struct DiffOutcome {
    pub group: String,
    pub mode: MergeMode,
    /// Participating replicas; `ReplicaId` indexes this list.
    pub replicas: Vec<ReplicaState>,
    pub excluded: Vec<ExcludedReplica>,
    pub table: DecisionTable,
}

impl DiffOutcome {
    pub fn roots(&self) -> Vec<PathBuf> {
        self.replicas.iter().map(|r| r.root.clone()).collect()
    }

    pub fn is_in_sync(&self) -> bool {
        self.table.is_empty()
    }
}

/// A rename that survived conflict checks.
#[derive(Debug, Clone)]
struct RenamePlan {
    from: RelPath,
    to: RelPath,
    source: ReplicaId,
    hash: ContentHash,
}

pub struct DiffEngine<'a> {
    store: &'a dyn SnapshotStore,
    walker: Walker,
}

impl<'a> DiffEngine<'a> {
    pub fn new(store: &'a dyn SnapshotStore, walker: Walker) -> Self {
        Self { store, walker }
    }

    /// Diff the replicas at `roots` for sync group `group`.
    ///
    /// Unreadable replicas are excluded and listed in the outcome. Fewer than two
    /// readable replicas is an error since there is nothing to agree with.
    pub fn compare(&self, group: &str, roots: &[PathBuf]) -> Result<DiffOutcome, SyncError> {
        let mut replicas = Vec::new();
        let mut excluded = Vec::new();

        for root in roots {
            match self.load_replica(replicas.len(), group, root) {
                Ok(state) => replicas.push(state),
                Err(e) => {
                    warn!(replica = %root.display(), error = %e, "Excluding replica from this run");
                    excluded.push(ExcludedReplica {
                        root: root.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if replicas.len() < 2 {
            return Err(SyncError::NotEnoughReplicas {
                available: replicas.len(),
                requested: roots.len(),
            });
        }

        let with_metadata = replicas.iter().filter(|r| r.has_metadata()).count();
        let (mode, table) = if with_metadata >= 2 {
            for replica in replicas.iter_mut() {
                replica.reconciliation = replica
                    .snapshot
                    .as_ref()
                    .map(|snapshot| reconcile(&replica.walk, snapshot));
            }
            (MergeMode::MetadataAware, metadata_merge(&replicas))
        } else {
            (MergeMode::Raw, raw_merge(&replicas))
        };

        info!(
            group,
            mode = ?mode,
            replicas = replicas.len(),
            excluded = excluded.len(),
            operations = table.operation_count(),
            "Diff complete"
        );

        Ok(DiffOutcome {
            group: group.to_string(),
            mode,
            replicas,
            excluded,
            table,
        })
    }

    fn load_replica(
        &self,
        id: ReplicaId,
        group: &str,
        root: &Path,
    ) -> Result<ReplicaState, SyncError> {
        let root = dunce::canonicalize(root).map_err(|source| SyncError::ReplicaUnavailable {
            path: root.to_path_buf(),
            source,
        })?;
        let walk = self.walker.walk(&root)?;
        let snapshot = self.store.load(&root, group)?;
        debug!(
            replica = %root.display(),
            files = walk.files.len(),
            has_metadata = snapshot.is_some(),
            "Loaded replica"
        );
        Ok(ReplicaState {
            id,
            root,
            walk,
            snapshot,
            reconciliation: None,
        })
    }
}

fn view_of(state: &ReplicaState, skip: &BTreeSet<RelKey>) -> ReplicaView {
    let files = state
        .walk
        .files
        .iter()
        .map(|record| (record.key(), record.clone()))
        .filter(|(key, _)| !skip.contains(key))
        .collect();
    let unchanged = state
        .reconciliation
        .iter()
        .flat_map(|rec| rec.iter())
        .filter(|(_, c)| c.class == ChangeClassification::NoChange)
        .map(|(key, _)| key.clone())
        .collect();
    ReplicaView {
        id: state.id,
        root: state.root.clone(),
        files,
        unchanged,
    }
}

fn raw_merge(replicas: &[ReplicaState]) -> DecisionTable {
    let views: Vec<ReplicaView> = replicas
        .iter()
        .map(|r| view_of(r, &BTreeSet::new()))
        .collect();
    let refs: Vec<&ReplicaView> = views.iter().collect();

    let mut merger = Merger::seeded(refs[0]);
    merger.fold(&refs);

    let mut table = DecisionTable::new();
    write_pending(&mut table, merger.into_pending(), &BTreeSet::new());
    table
}

fn metadata_merge(replicas: &[ReplicaState]) -> DecisionTable {
    let mut table = DecisionTable::new();

    let deletions = standing_deletions(replicas);
    let renames = standing_renames(replicas, &deletions);

    let mut skip: BTreeSet<RelKey> = deletions.keys().cloned().collect();
    let mut covered: BTreeSet<(RelKey, ReplicaId)> = BTreeSet::new();

    for (key, (path, source)) in &deletions {
        let source_path = path.under(&replicas[*source].root);
        for replica in replicas.iter().filter(|r| r.id != *source) {
            if let Some(record) = replica.live(key) {
                table.push(
                    path,
                    *source,
                    source_path.clone(),
                    replica.id,
                    Target {
                        kind: DecisionKind::Delete,
                        destination: record.absolute.clone(),
                    },
                );
            }
        }
    }

    for plan in &renames {
        let from_key = plan.from.key();
        skip.insert(from_key.clone());
        let mut entry = DecisionEntry::new(
            plan.from.clone(),
            plan.source,
            plan.from.under(&replicas[plan.source].root),
        );
        entry.renamed_to = Some(plan.to.clone());
        for replica in replicas.iter().filter(|r| r.id != plan.source) {
            if replica.holds(&from_key).is_some() {
                entry.targets.insert(
                    replica.id,
                    Target {
                        kind: DecisionKind::Rename,
                        destination: plan.to.under(&replica.root),
                    },
                );
                covered.insert((plan.to.key(), replica.id));
            }
        }
        if !entry.targets.is_empty() {
            table.insert(entry);
        }
    }

    let views: Vec<ReplicaView> = replicas.iter().map(|r| view_of(r, &skip)).collect();
    let (with_meta, without_meta): (Vec<&ReplicaView>, Vec<&ReplicaView>) = views
        .iter()
        .partition(|view| replicas[view.id].has_metadata());

    // history first, then the replicas without any, so the latter can still win
    let mut merger = Merger::seeded(with_meta[0]);
    merger.fold(&with_meta);
    merger.fold_forward(&without_meta);
    let sequence: Vec<&ReplicaView> = with_meta.iter().chain(without_meta.iter()).copied().collect();
    merger.fold_backward(&sequence);

    write_pending(&mut table, merger.into_pending(), &covered);
    table
}

/// Deletions that no other replica contradicts, keyed by path identity.
fn standing_deletions(replicas: &[ReplicaState]) -> BTreeMap<RelKey, (RelPath, ReplicaId)> {
    let mut out = BTreeMap::new();
    for replica in replicas {
        let Some(rec) = &replica.reconciliation else {
            continue;
        };
        for deleted in rec.deletions() {
            let key = deleted.path.key();
            if out.contains_key(&key) {
                continue;
            }
            let contradicted = replicas.iter().filter(|r| r.id != replica.id).any(|other| {
                if other.has_metadata() {
                    other.class(&key).is_some_and(|c| c.is_content_change())
                } else {
                    other.holds(&key).is_some()
                }
            });
            if contradicted {
                debug!(path = %deleted.path, replica = replica.id, "Deletion overruled");
                continue;
            }
            out.insert(key, (deleted.path.clone(), replica.id));
        }
    }
    out
}

/// Renames that survive collision and conflict checks.
///
/// Candidates are taken in (old key, new key, replica) order and each old and
/// new name is used at most once, so collisions resolve the same way whatever
/// order the replicas were listed in.
fn standing_renames(
    replicas: &[ReplicaState],
    deletions: &BTreeMap<RelKey, (RelPath, ReplicaId)>,
) -> Vec<RenamePlan> {
    let mut candidates: Vec<RenamePlan> = replicas
        .iter()
        .filter_map(|r| r.reconciliation.as_ref().map(|rec| (r.id, rec)))
        .flat_map(|(id, rec)| {
            rec.renames().map(move |(from, to, hash)| RenamePlan {
                from: from.clone(),
                to: to.clone(),
                source: id,
                hash,
            })
        })
        .collect();
    candidates.sort_by(|a, b| {
        (a.from.key(), a.to.key(), a.source).cmp(&(b.from.key(), b.to.key(), b.source))
    });

    let mut used_from = BTreeSet::new();
    let mut used_to = BTreeSet::new();
    let mut plans = Vec::new();

    for plan in candidates {
        let from_key = plan.from.key();
        let to_key = plan.to.key();
        if used_from.contains(&from_key) || used_to.contains(&to_key) {
            debug!(from = %plan.from, to = %plan.to, replica = plan.source, "Rename lost collision");
            continue;
        }
        if deletions.contains_key(&from_key) {
            continue;
        }
        let conflicted = replicas.iter().filter(|r| r.id != plan.source).any(|other| {
            let changed_old = matches!(
                other.class(&from_key),
                Some(ChangeClassification::New | ChangeClassification::Updated)
            );
            let diverged_old = other.holds(&from_key).is_some_and(|h| h != plan.hash);
            let diverged_new = other.holds(&to_key).is_some_and(|h| h != plan.hash);
            changed_old || diverged_old || diverged_new
        });
        if conflicted {
            debug!(from = %plan.from, to = %plan.to, "Rename conflicts, falling back to merge");
            continue;
        }
        used_from.insert(from_key);
        used_to.insert(to_key);
        plans.push(plan);
    }
    plans
}

fn write_pending(
    table: &mut DecisionTable,
    pending: BTreeMap<(RelKey, ReplicaId), PendingOp>,
    covered: &BTreeSet<(RelKey, ReplicaId)>,
) {
    for ((key, replica), op) in pending {
        if op.kind == DecisionKind::Create && covered.contains(&(key, replica)) {
            continue;
        }
        table.push(
            &op.source.relative,
            op.source_replica,
            op.source.absolute.clone(),
            replica,
            Target {
                kind: op.kind,
                destination: op.destination,
            },
        );
    }
}
