//! Pairwise one-way merge and the forward/backward fold built on it.

use super::compare::{compare_with_standing, ContentOrder, Standing};
use super::table::DecisionKind;
use crate::snapshot::{FileRecord, RelKey};
use crate::types::ReplicaId;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::trace;

/// The files of one replica as seen by the fold.
#[derive(Debug, Clone)]
pub(crate) struct ReplicaView {
    pub id: ReplicaId,
    pub root: PathBuf,
    pub files: BTreeMap<RelKey, FileRecord>,
    /// Keys known unchanged since the replica's snapshot. Anything absent is pending.
    pub unchanged: std::collections::BTreeSet<RelKey>,
}

impl ReplicaView {
    pub fn standing(&self, key: &RelKey) -> Standing {
        if self.unchanged.contains(key) {
            Standing::Unchanged
        } else {
            Standing::Pending
        }
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    record: FileRecord,
    replica: ReplicaId,
    standing: Standing,
}

/// An operation issued by the fold but not yet written to the decision table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingOp {
    pub kind: DecisionKind,
    pub source: FileRecord,
    pub source_replica: ReplicaId,
    pub destination: PathBuf,
}

/// Running superset plus the operations issued so far.
#[derive(Debug, Default)]
pub(crate) struct Merger {
    superset: BTreeMap<RelKey, Candidate>,
    pending: BTreeMap<(RelKey, ReplicaId), PendingOp>,
}

impl Merger {
    pub fn seeded(view: &ReplicaView) -> Self {
        let mut merger = Merger::default();
        merger.absorb(view);
        merger
    }

    /// Add every file of `view` the superset has not seen yet.
    pub fn absorb(&mut self, view: &ReplicaView) {
        for (key, record) in &view.files {
            self.superset.entry(key.clone()).or_insert_with(|| Candidate {
                record: record.clone(),
                replica: view.id,
                standing: view.standing(key),
            });
        }
    }

    /// Merge the superset into `target`.
    ///
    /// Superset-only files become creates at the target. For files both sides
    /// have, a newer superset copy becomes an update (replacing a pending create)
    /// and a newer target copy takes over the superset and cancels everything
    /// pending for that path. Target-only files join the superset.
    pub fn one_way(&mut self, target: &ReplicaView) {
        let keys: Vec<RelKey> = self.superset.keys().cloned().collect();
        for key in keys {
            let Some(candidate) = self.superset.get(&key) else {
                continue;
            };
            if candidate.replica == target.id {
                continue;
            }
            let Some(theirs) = target.files.get(&key) else {
                let op = PendingOp {
                    kind: DecisionKind::Create,
                    source: candidate.record.clone(),
                    source_replica: candidate.replica,
                    destination: candidate.record.relative.under(&target.root),
                };
                self.pending.insert((key, target.id), op);
                continue;
            };

            let order = compare_with_standing(
                &candidate.record,
                candidate.standing,
                theirs,
                target.standing(&key),
            );
            match order {
                ContentOrder::SourceNewer => {
                    let op = PendingOp {
                        kind: DecisionKind::Update,
                        source: candidate.record.clone(),
                        source_replica: candidate.replica,
                        destination: theirs.absolute.clone(),
                    };
                    self.pending.insert((key, target.id), op);
                }
                ContentOrder::TargetNewer => {
                    trace!(path = %key, replica = target.id, "Newer copy found, cancelling pending ops");
                    self.pending.retain(|(k, _), _| k != &key);
                    self.superset.insert(
                        key.clone(),
                        Candidate {
                            record: theirs.clone(),
                            replica: target.id,
                            standing: target.standing(&key),
                        },
                    );
                }
                ContentOrder::Identical => {
                    // same bytes: keep the strongest copy so later comparisons
                    // do not depend on which holder was seen first
                    let theirs_rank = (target.standing(&key), theirs.modified);
                    if theirs_rank > (candidate.standing, candidate.record.modified) {
                        self.adopt(&key, theirs, target);
                    }
                    self.pending.remove(&(key, target.id));
                }
            }
        }
        self.absorb(target);
    }

    fn adopt(&mut self, key: &RelKey, record: &FileRecord, view: &ReplicaView) {
        self.superset.insert(
            key.clone(),
            Candidate {
                record: record.clone(),
                replica: view.id,
                standing: view.standing(key),
            },
        );
        for ((k, _), op) in self.pending.iter_mut() {
            if k == key {
                op.source = record.clone();
                op.source_replica = view.id;
            }
        }
    }

    /// Forward over `views[1..]`, then backward over `views[..n-1]`.
    pub fn fold(&mut self, views: &[&ReplicaView]) {
        self.fold_forward(views.get(1..).unwrap_or_default());
        self.fold_backward(views);
    }

    pub fn fold_forward(&mut self, views: &[&ReplicaView]) {
        for view in views {
            self.one_way(view);
        }
    }

    /// Reverse pass over every view except the last one.
    pub fn fold_backward(&mut self, views: &[&ReplicaView]) {
        let Some((_, rest)) = views.split_last() else {
            return;
        };
        for view in rest.iter().rev() {
            self.one_way(view);
        }
    }

    pub fn into_pending(self) -> BTreeMap<(RelKey, ReplicaId), PendingOp> {
        self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::RelPath;
    use crate::types::hash_bytes;
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::BTreeSet;

    fn view(id: ReplicaId, files: &[(&str, &[u8], i64)]) -> ReplicaView {
        let root = PathBuf::from(format!("/r{}", id));
        let files = files
            .iter()
            .map(|(name, content, minute)| {
                let relative = RelPath::new(name);
                let record = FileRecord {
                    root: root.clone(),
                    absolute: relative.under(&root),
                    name: relative.name().to_string(),
                    relative: relative.clone(),
                    created: None,
                    modified: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                        + Duration::minutes(*minute),
                    length: content.len() as u64,
                    hash: hash_bytes(content),
                };
                (relative.key(), record)
            })
            .collect();
        ReplicaView {
            id,
            root,
            files,
            unchanged: BTreeSet::new(),
        }
    }

    fn run(views: &[ReplicaView]) -> BTreeMap<(RelKey, ReplicaId), PendingOp> {
        let refs: Vec<&ReplicaView> = views.iter().collect();
        let mut merger = Merger::seeded(refs[0]);
        merger.fold(&refs);
        merger.into_pending()
    }

    #[test]
    fn missing_file_is_created_from_holder_in_either_order() {
        let a = view(0, &[("f", b"x", 0)]);
        let b = view(1, &[]);
        let forward = run(&[a.clone(), b.clone()]);
        let key = RelPath::new("f").key();
        assert_eq!(forward[&(key.clone(), 1)].kind, DecisionKind::Create);

        let a = view(1, &[("f", b"x", 0)]);
        let b = view(0, &[]);
        let backward = run(&[b, a]);
        let op = &backward[&(key, 0)];
        assert_eq!(op.kind, DecisionKind::Create);
        assert_eq!(op.source_replica, 1);
    }

    #[test]
    fn newest_copy_reaches_every_replica() {
        let views = [
            view(0, &[("f", b"old", 0)]),
            view(1, &[("f", b"newest", 10)]),
            view(2, &[("f", b"older", 5)]),
        ];
        let pending = run(&views);
        let key = RelPath::new("f").key();
        assert_eq!(pending.len(), 2);
        for replica in [0, 2] {
            let op = &pending[&(key.clone(), replica)];
            assert_eq!(op.kind, DecisionKind::Update);
            assert_eq!(op.source_replica, 1);
        }
    }

    #[test]
    fn identical_copies_issue_nothing() {
        let views = [view(0, &[("f", b"same", 0)]), view(1, &[("f", b"same", 7)])];
        assert!(run(&views).is_empty());
    }

    #[test]
    fn unchanged_record_loses_to_pending_change() {
        let mut stale = view(0, &[("f", b"stale", 30)]);
        stale.unchanged.insert(RelPath::new("f").key());
        let edited = view(1, &[("f", b"edited", 0)]);
        let pending = run(&[stale, edited]);
        let op = &pending[&(RelPath::new("f").key(), 0)];
        assert_eq!(op.source_replica, 1);
    }
}
