//! Directory walker: enumerates a replica root into live file records.

use super::{FileRecord, RelPath};
use crate::error::SnapshotError;
use crate::ops::PARTIAL_SUFFIX;
use crate::types::hash_file;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Live state of one replica root.
#[derive(Debug, Clone)]
pub struct ReplicaWalk {
    pub root: PathBuf,
    pub files: Vec<FileRecord>,
    pub folders: Vec<RelPath>,
}

impl ReplicaWalk {
    pub fn file(&self, path: &RelPath) -> Option<&FileRecord> {
        self.files.iter().find(|record| &record.relative == path)
    }

    /// The folder matching `path`, spelled as this replica spells it.
    pub fn folder(&self, path: &RelPath) -> Option<&RelPath> {
        self.folders.iter().find(|folder| *folder == path)
    }
}

/// Recursive walker that skips the metadata and archive folders.
#[derive(Debug, Clone)]
pub struct Walker {
    skip_names: Vec<String>,
}

impl Walker {
    pub fn new<I, S>(skip_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            skip_names: skip_names
                .into_iter()
                .map(|s| s.as_ref().to_lowercase())
                .collect(),
        }
    }

    /// Skipped folder names, plus the temporaries of in-flight copies.
    pub fn is_skipped(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        lower.ends_with(PARTIAL_SUFFIX) || self.skip_names.iter().any(|skip| *skip == lower)
    }

    /// Whether any component of `path` below `root` is skipped.
    pub fn is_skipped_path(&self, root: &Path, path: &Path) -> bool {
        match RelPath::from_root(root, path) {
            Some(rel) => rel.as_str().split('/').any(|part| self.is_skipped(part)),
            None => true,
        }
    }

    /// Walk `root`. Failing to read the root itself is an error; anything below
    /// the root that cannot be read is logged and left out.
    pub fn walk(&self, root: &Path) -> Result<ReplicaWalk, SnapshotError> {
        std::fs::read_dir(root).map_err(|source| SnapshotError::Io {
            path: root.to_path_buf(),
            source,
        })?;

        let mut files = Vec::new();
        let mut folders = Vec::new();

        let walker = WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !self.is_skipped(&entry.file_name().to_string_lossy()));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    if e.depth() == 0 {
                        return Err(SnapshotError::Walk {
                            root: root.to_path_buf(),
                            source: e,
                        });
                    }
                    warn!(root = %root.display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };

            let Some(relative) = RelPath::from_root(root, entry.path()) else {
                continue;
            };

            if entry.file_type().is_dir() {
                folders.push(relative);
                continue;
            }
            if !entry.file_type().is_file() {
                continue;
            }

            match read_record(root, entry.path(), relative) {
                Ok(record) => files.push(record),
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "Skipping file that could not be read");
                }
            }
        }

        debug!(
            root = %root.display(),
            files = files.len(),
            folders = folders.len(),
            "Walked replica"
        );

        Ok(ReplicaWalk {
            root: root.to_path_buf(),
            files,
            folders,
        })
    }
}

fn read_record(root: &Path, path: &Path, relative: RelPath) -> std::io::Result<FileRecord> {
    let metadata = std::fs::metadata(path)?;
    let modified: DateTime<Utc> = metadata.modified()?.into();
    let created = metadata.created().ok().map(DateTime::<Utc>::from);
    let hash = hash_file(path)?;
    Ok(FileRecord {
        root: root.to_path_buf(),
        name: relative.name().to_string(),
        relative,
        absolute: path.to_path_buf(),
        created,
        modified,
        length: metadata.len(),
        hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::hash_bytes;
    use std::fs;

    #[test]
    fn walks_files_and_folders_skipping_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("docs/deep")).unwrap();
        fs::create_dir_all(root.join(".syncfold")).unwrap();
        fs::create_dir_all(root.join("docs/_archive")).unwrap();
        fs::write(root.join("docs/deep/a.txt"), b"alpha").unwrap();
        fs::write(root.join("top.txt"), b"top").unwrap();
        fs::write(root.join(".syncfold/group.json"), b"{}").unwrap();
        fs::write(root.join("docs/_archive/old.txt"), b"old").unwrap();

        let walk = Walker::new([".syncfold", "_archive"]).walk(root).unwrap();

        let mut names: Vec<_> = walk.files.iter().map(|f| f.relative.as_str().to_string()).collect();
        names.sort();
        assert_eq!(names, vec!["docs/deep/a.txt", "top.txt"]);
        assert!(walk.folder(&RelPath::new("docs")).is_some());
        assert_eq!(walk.folder(&RelPath::new("DOCS/Deep")).map(|f| f.as_str()), Some("docs/deep"));
        assert!(walk.folder(&RelPath::new(".syncfold")).is_none());

        let a = walk.file(&RelPath::new("DOCS/deep/A.txt")).unwrap();
        assert_eq!(a.length, 5);
        assert_eq!(a.hash, hash_bytes(b"alpha"));
        assert_eq!(a.name, "a.txt");
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Walker::new([".syncfold"]).walk(&dir.path().join("absent"));
        assert!(matches!(result, Err(SnapshotError::Io { .. })));
    }
}
