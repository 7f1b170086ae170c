//! Decision table: the merged outcome of a diff.

use crate::snapshot::{RelKey, RelPath};
use crate::types::ReplicaId;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum DecisionKind {
    Create,
    Update,
    Rename,
    Delete,
}

impl std::fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DecisionKind::Create => "create",
            DecisionKind::Update => "update",
            DecisionKind::Rename => "rename",
            DecisionKind::Delete => "delete",
        };
        f.write_str(label)
    }
}

/// One operation at one replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    pub kind: DecisionKind,
    pub destination: PathBuf,
}

/// Everything decided about one logical path: the winning replica and what each
/// other replica has to do to agree with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionEntry {
    pub path: RelPath,
    pub source_replica: ReplicaId,
    /// Absolute path at the source replica. For deletions this path no longer exists.
    pub source: PathBuf,
    /// New name when the entry is a rename.
    pub renamed_to: Option<RelPath>,
    pub targets: BTreeMap<ReplicaId, Target>,
}

impl DecisionEntry {
    pub fn new(path: RelPath, source_replica: ReplicaId, source: PathBuf) -> Self {
        Self {
            path,
            source_replica,
            source,
            renamed_to: None,
            targets: BTreeMap::new(),
        }
    }

    pub fn target(&self, replica: ReplicaId) -> Option<&Target> {
        self.targets.get(&replica)
    }

    pub fn destinations(&self, kind: DecisionKind) -> BTreeSet<PathBuf> {
        self.targets
            .values()
            .filter(|t| t.kind == kind)
            .map(|t| t.destination.clone())
            .collect()
    }

    /// Dominant kind of the entry, used for display and node change typing.
    pub fn kind(&self) -> Option<DecisionKind> {
        if self.renamed_to.is_some() {
            return Some(DecisionKind::Rename);
        }
        self.targets.values().map(|t| t.kind).max()
    }
}

/// Decision entries keyed by case-insensitive path identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecisionTable {
    entries: BTreeMap<RelKey, DecisionEntry>,
}

impl DecisionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a target to the entry for `path`, creating the entry if needed.
    ///
    /// An existing target at the same replica is replaced, so a later update
    /// supersedes an earlier create for the same destination.
    pub fn push(
        &mut self,
        path: &RelPath,
        source_replica: ReplicaId,
        source: PathBuf,
        replica: ReplicaId,
        target: Target,
    ) {
        let entry = self
            .entries
            .entry(path.key())
            .or_insert_with(|| DecisionEntry::new(path.clone(), source_replica, source));
        entry.targets.insert(replica, target);
    }

    pub fn insert(&mut self, entry: DecisionEntry) {
        self.entries.insert(entry.path.key(), entry);
    }

    pub fn get(&self, path: &RelPath) -> Option<&DecisionEntry> {
        self.entries.get(&path.key())
    }

    pub fn get_key(&self, key: &RelKey) -> Option<&DecisionEntry> {
        self.entries.get(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = &DecisionEntry> {
        self.entries.values()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(|e| e.targets.is_empty())
    }

    /// Total number of per-replica operations.
    pub fn operation_count(&self) -> usize {
        self.entries.values().map(|e| e.targets.len()).sum()
    }

    /// Source path → destination paths for one kind of operation.
    pub fn grouped(&self, kind: DecisionKind) -> BTreeMap<PathBuf, BTreeSet<PathBuf>> {
        let mut out: BTreeMap<PathBuf, BTreeSet<PathBuf>> = BTreeMap::new();
        for entry in self.entries.values() {
            let destinations = entry.destinations(kind);
            if destinations.is_empty() {
                continue;
            }
            out.entry(entry.source.clone()).or_default().extend(destinations);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_target_replaces_earlier_for_same_replica() {
        let mut table = DecisionTable::new();
        let path = RelPath::new("a.txt");
        table.push(
            &path,
            0,
            PathBuf::from("/r0/a.txt"),
            1,
            Target {
                kind: DecisionKind::Create,
                destination: PathBuf::from("/r1/a.txt"),
            },
        );
        table.push(
            &path,
            0,
            PathBuf::from("/r0/a.txt"),
            1,
            Target {
                kind: DecisionKind::Update,
                destination: PathBuf::from("/r1/a.txt"),
            },
        );
        assert_eq!(table.operation_count(), 1);
        assert!(table.grouped(DecisionKind::Create).is_empty());
        let updates = table.grouped(DecisionKind::Update);
        assert_eq!(updates[&PathBuf::from("/r0/a.txt")].len(), 1);
    }

    #[test]
    fn grouping_suppresses_duplicate_destinations() {
        let mut table = DecisionTable::new();
        for replica in [1, 2] {
            table.push(
                &RelPath::new("Doc.md"),
                0,
                PathBuf::from("/r0/Doc.md"),
                replica,
                Target {
                    kind: DecisionKind::Create,
                    destination: PathBuf::from(format!("/r{}/Doc.md", replica)),
                },
            );
        }
        let creates = table.grouped(DecisionKind::Create);
        assert_eq!(creates.len(), 1);
        assert_eq!(creates[&PathBuf::from("/r0/Doc.md")].len(), 2);
        assert_eq!(table.get(&RelPath::new("doc.md")).unwrap().kind(), Some(DecisionKind::Create));
    }
}
