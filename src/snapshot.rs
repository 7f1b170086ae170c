//! Snapshots
//!
//! The data model shared by the diff engine and the tree builder: relative-path
//! identity, live file records produced by the walker, and the stored metadata
//! snapshot each replica keeps for a sync group.

mod store;
mod walker;

pub use store::{JsonSnapshotStore, SnapshotStore};
pub use walker::{ReplicaWalk, Walker};

use crate::types::ContentHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};
use unicode_normalization::UnicodeNormalization;

/// Case-insensitive identity of a relative path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelKey(String);

impl RelKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Relative path from a replica root, `/`-separated.
///
/// Equality, ordering and hashing go through [`RelKey`], so `Docs/A.txt` and
/// `docs/a.txt` are the same item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelPath(String);

impl RelPath {
    pub fn new(path: impl AsRef<str>) -> Self {
        let joined = path
            .as_ref()
            .split(['/', '\\'])
            .filter(|part| !part.is_empty() && *part != ".")
            .collect::<Vec<_>>()
            .join("/");
        RelPath(joined)
    }

    /// Relative path of `path` below `root`, or `None` if it lies elsewhere.
    pub fn from_root(root: &Path, path: &Path) -> Option<Self> {
        let stripped = path.strip_prefix(root).ok()?;
        let mut parts = Vec::new();
        for component in stripped.components() {
            match component {
                Component::Normal(name) => parts.push(name.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => return None,
            }
        }
        if parts.is_empty() {
            return None;
        }
        Some(RelPath(parts.join("/")))
    }

    pub fn key(&self) -> RelKey {
        RelKey(self.0.nfc().collect::<String>().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Final component
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn parent(&self) -> Option<RelPath> {
        self.0.rfind('/').map(|idx| RelPath(self.0[..idx].to_string()))
    }

    /// All proper ancestors, outermost first.
    pub fn ancestors(&self) -> Vec<RelPath> {
        let mut out = Vec::new();
        let mut current = self.parent();
        while let Some(parent) = current {
            current = parent.parent();
            out.push(parent);
        }
        out.reverse();
        out
    }

    pub fn join(&self, name: &str) -> RelPath {
        if self.0.is_empty() {
            RelPath::new(name)
        } else {
            RelPath::new(format!("{}/{}", self.0, name))
        }
    }

    pub fn under(&self, root: &Path) -> PathBuf {
        self.0.split('/').fold(root.to_path_buf(), |acc, part| acc.join(part))
    }
}

impl PartialEq for RelPath {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for RelPath {}

impl Hash for RelPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for RelPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RelPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl std::fmt::Display for RelPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One file at one replica at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub root: PathBuf,
    pub relative: RelPath,
    pub absolute: PathBuf,
    pub name: String,
    pub created: Option<DateTime<Utc>>,
    pub modified: DateTime<Utc>,
    pub length: u64,
    pub hash: ContentHash,
}

impl FileRecord {
    pub fn key(&self) -> RelKey {
        self.relative.key()
    }
}

/// Stored record of one file: `{name, size, hash, created, lastModified, lastUpdated}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub name: RelPath,
    pub size: u64,
    #[serde(with = "hex_hash")]
    pub hash: ContentHash,
    pub created: Option<DateTime<Utc>>,
    pub last_modified: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LastKnownAction {
    Deleted,
}

/// Entry of the last-known-state log kept between syncs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastKnownEntry {
    pub name: RelPath,
    pub action: LastKnownAction,
    pub at: DateTime<Utc>,
}

/// Stored state of one replica for one sync group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub files: Vec<SnapshotEntry>,
    #[serde(default)]
    pub folders: Vec<RelPath>,
    #[serde(default)]
    pub last_known_state: Vec<LastKnownEntry>,
}

impl Snapshot {
    /// Capture a walk as the new known state. The last-known-state log starts empty.
    pub fn from_walk(walk: &ReplicaWalk) -> Self {
        let now = Utc::now();
        let mut files: Vec<SnapshotEntry> = walk
            .files
            .iter()
            .map(|record| SnapshotEntry {
                name: record.relative.clone(),
                size: record.length,
                hash: record.hash,
                created: record.created,
                last_modified: record.modified,
                last_updated: now,
            })
            .collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        let mut folders = walk.folders.clone();
        folders.sort();
        Snapshot {
            files,
            folders,
            last_known_state: Vec::new(),
        }
    }

    pub fn logged_deletions(&self) -> impl Iterator<Item = &RelPath> {
        self.last_known_state
            .iter()
            .filter(|entry| entry.action == LastKnownAction::Deleted)
            .map(|entry| &entry.name)
    }
}

mod hex_hash {
    use crate::types::ContentHash;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hash: &ContentHash, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(hash))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ContentHash, D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("content hash must be 32 bytes"))
    }
}
