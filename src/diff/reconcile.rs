//! Live walk versus stored snapshot, for one replica.

use crate::snapshot::{FileRecord, RelKey, RelPath, ReplicaWalk, Snapshot, SnapshotEntry};
use crate::types::ContentHash;
use std::collections::{BTreeMap, BTreeSet};

/// How a file changed at one replica since that replica's snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeClassification {
    New,
    Updated,
    Deleted,
    Renamed { from: RelPath },
    NoChange,
}

impl ChangeClassification {
    /// New or updated content that must not be overruled by stale copies.
    pub fn is_content_change(&self) -> bool {
        matches!(
            self,
            ChangeClassification::New
                | ChangeClassification::Updated
                | ChangeClassification::Renamed { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub path: RelPath,
    pub class: ChangeClassification,
    /// Hash of the live file, or of the stored entry for deletions.
    pub hash: ContentHash,
}

/// Classification of every file a replica has now or had at its last sync.
///
/// Renamed files appear under their new key; the old key has no entry.
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    entries: BTreeMap<RelKey, Classified>,
}

impl Reconciliation {
    pub fn get(&self, key: &RelKey) -> Option<&Classified> {
        self.entries.get(key)
    }

    pub fn class(&self, key: &RelKey) -> Option<&ChangeClassification> {
        self.entries.get(key).map(|c| &c.class)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RelKey, &Classified)> {
        self.entries.iter()
    }

    pub fn deletions(&self) -> impl Iterator<Item = &Classified> {
        self.entries
            .values()
            .filter(|c| c.class == ChangeClassification::Deleted)
    }

    /// `(from, to, hash)` for every detected rename.
    pub fn renames(&self) -> impl Iterator<Item = (&RelPath, &RelPath, ContentHash)> {
        self.entries.values().filter_map(|c| match &c.class {
            ChangeClassification::Renamed { from } => Some((from, &c.path, c.hash)),
            _ => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Classify `live` against `snapshot`.
///
/// A live file missing from the snapshot whose hash matches a snapshot entry that
/// is gone from the live walk is a rename of that entry. Candidates pair up in key
/// order, each stored entry claimed at most once.
pub fn reconcile(live: &ReplicaWalk, snapshot: &Snapshot) -> Reconciliation {
    let live_files: BTreeMap<RelKey, &FileRecord> =
        live.files.iter().map(|record| (record.key(), record)).collect();
    let stored: BTreeMap<RelKey, &SnapshotEntry> =
        snapshot.files.iter().map(|entry| (entry.name.key(), entry)).collect();

    let mut entries = BTreeMap::new();
    let mut unmatched_live = Vec::new();

    for (key, record) in &live_files {
        match stored.get(key) {
            Some(entry) => {
                let class = if entry.size == record.length && entry.hash == record.hash {
                    ChangeClassification::NoChange
                } else {
                    ChangeClassification::Updated
                };
                entries.insert(
                    key.clone(),
                    Classified {
                        path: record.relative.clone(),
                        class,
                        hash: record.hash,
                    },
                );
            }
            None => unmatched_live.push((key.clone(), *record)),
        }
    }

    let mut missing: Vec<&SnapshotEntry> = stored
        .iter()
        .filter(|(key, _)| !live_files.contains_key(*key))
        .map(|(_, entry)| *entry)
        .collect();
    let mut claimed = BTreeSet::new();

    for (key, record) in unmatched_live {
        let matched = missing
            .iter()
            .position(|entry| entry.hash == record.hash && entry.size == record.length)
            .map(|idx| missing.remove(idx));
        let class = match matched {
            Some(entry) => {
                claimed.insert(entry.name.key());
                ChangeClassification::Renamed {
                    from: entry.name.clone(),
                }
            }
            None => ChangeClassification::New,
        };
        entries.insert(
            key,
            Classified {
                path: record.relative.clone(),
                class,
                hash: record.hash,
            },
        );
    }

    for entry in missing {
        entries.insert(
            entry.name.key(),
            Classified {
                path: entry.name.clone(),
                class: ChangeClassification::Deleted,
                hash: entry.hash,
            },
        );
    }

    // the log also covers files deleted before they ever reached the snapshot
    for logged in snapshot.logged_deletions() {
        let key = logged.key();
        if live_files.contains_key(&key) || claimed.contains(&key) || entries.contains_key(&key) {
            continue;
        }
        entries.insert(
            key,
            Classified {
                path: logged.clone(),
                class: ChangeClassification::Deleted,
                hash: ContentHash::default(),
            },
        );
    }

    Reconciliation { entries }
}
