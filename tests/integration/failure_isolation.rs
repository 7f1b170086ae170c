use crate::common::Replicas;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use syncfold::error::FileOpError;
use syncfold::ops::{FileOps, LocalFileOps};
use syncfold::snapshot::RelPath;
use syncfold::tree::{FinalState, NodeKind};

/// Local file ops that refuse every write below one replica root.
struct FaultyOps {
    inner: LocalFileOps,
    broken: PathBuf,
}

impl FaultyOps {
    fn guard(&self, path: &Path) -> Result<(), io::Error> {
        if path.starts_with(&self.broken) {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "replica is read-only"))
        } else {
            Ok(())
        }
    }
}

impl FileOps for FaultyOps {
    fn copy_file(&self, from: &Path, to: &Path) -> Result<(), FileOpError> {
        self.guard(to).map_err(|source| FileOpError::CopyFileFailed {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            source,
        })?;
        self.inner.copy_file(from, to)
    }

    fn move_file(&self, from: &Path, to: &Path) -> Result<(), FileOpError> {
        self.guard(to).map_err(|source| FileOpError::MoveFileFailed {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            source,
        })?;
        self.inner.move_file(from, to)
    }

    fn delete_file(&self, path: &Path) -> Result<(), FileOpError> {
        self.guard(path).map_err(|source| FileOpError::DeleteFileFailed {
            path: path.to_path_buf(),
            source,
        })?;
        self.inner.delete_file(path)
    }

    fn delete_file_to_recycle_bin(&self, path: &Path) -> Result<(), FileOpError> {
        self.delete_file(path)
    }

    fn archive_file(&self, path: &Path, archive_name: &str, limit: usize) -> Result<(), FileOpError> {
        self.inner.archive_file(path, archive_name, limit)
    }

    fn create_folder(&self, path: &Path) -> Result<(), FileOpError> {
        self.guard(path).map_err(|source| FileOpError::CreateFolderFailed {
            path: path.to_path_buf(),
            source,
        })?;
        self.inner.create_folder(path)
    }

    fn copy_folder(&self, from: &Path, to: &Path) -> Result<(), FileOpError> {
        self.guard(to).map_err(|source| FileOpError::CopyFolderFailed {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            source,
        })?;
        self.inner.copy_folder(from, to)
    }

    fn move_folder(&self, from: &Path, to: &Path) -> Result<(), FileOpError> {
        self.guard(to).map_err(|source| FileOpError::MoveFolderFailed {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            source,
        })?;
        self.inner.move_folder(from, to)
    }

    fn delete_folder(&self, path: &Path) -> Result<(), FileOpError> {
        self.guard(path).map_err(|source| FileOpError::DeleteFolderFailed {
            path: path.to_path_buf(),
            source,
        })?;
        self.inner.delete_folder(path)
    }

    fn delete_folder_to_recycle_bin(&self, path: &Path) -> Result<(), FileOpError> {
        self.delete_folder(path)
    }

    fn archive_folder(&self, path: &Path, archive_name: &str, limit: usize) -> Result<(), FileOpError> {
        self.inner.archive_folder(path, archive_name, limit)
    }
}

fn faulty(r: &Replicas, broken: usize) -> FaultyOps {
    FaultyOps {
        inner: LocalFileOps::new(r.dir.path().join("recycle")),
        broken: r.roots[broken].clone(),
    }
}

#[test]
fn failing_replica_does_not_block_the_others() {
    let r = Replicas::new(3);
    r.write(0, "a.txt", "alpha", 1_000);
    r.write(0, "docs/b.txt", "bravo", 1_000);

    let report = r.sync_with(&faulty(&r, 1), &r.roots);

    assert!(report.summary.errors > 0);
    assert!(!report.is_clean());
    assert_eq!(r.read(2, "a.txt").as_deref(), Some("alpha"));
    assert_eq!(r.read(2, "docs/b.txt").as_deref(), Some("bravo"));
    assert!(!r.exists(1, "a.txt"));

    // once the replica is writable again the next run catches it up
    let report = r.sync();
    assert_eq!(report.summary.errors, 0);
    assert_eq!(r.read(1, "a.txt").as_deref(), Some("alpha"));
    assert_eq!(r.read(1, "docs/b.txt").as_deref(), Some("bravo"));
}

#[test]
fn failed_update_leaves_other_replicas_updated() {
    let r = Replicas::new(3);
    r.write(0, "a.txt", "v1", 1_000);
    r.sync();

    r.write(0, "a.txt", "v2", 2_000);
    let (report, tree) = r.sync_tree_with(&faulty(&r, 1), &r.roots);

    let node = tree
        .node(tree.find(&RelPath::new("a.txt"), NodeKind::File).unwrap());
    assert_eq!(node.slot(1).final_state(), FinalState::Error);
    assert_eq!(node.slot(2).final_state(), FinalState::Updated);
    assert_eq!(report.summary.errors, 1);
    assert_eq!(r.read(1, "a.txt").as_deref(), Some("v1"));
    assert_eq!(r.read(2, "a.txt").as_deref(), Some("v2"));

    r.sync();
    assert_eq!(r.read(1, "a.txt").as_deref(), Some("v2"));
}

#[test]
fn failed_deletion_is_retried_next_run() {
    let r = Replicas::new(2);
    r.write(0, "a.txt", "alpha", 1_000);
    r.sync();

    fs::remove_file(r.path(0, "a.txt")).unwrap();
    let report = r.sync_with(&faulty(&r, 1), &r.roots);
    assert_eq!(report.summary.errors, 1);
    assert_eq!(report.retried_deletions, 1);
    assert!(r.exists(1, "a.txt"));

    let report = r.sync();
    assert_eq!(report.summary.errors, 0);
    assert!(!r.exists(1, "a.txt"));
    assert!(!r.exists(0, "a.txt"));
}

#[test]
fn unreadable_replica_is_excluded() {
    let r = Replicas::new(3);
    r.write(0, "a.txt", "alpha", 1_000);
    let mut roots = r.roots.clone();
    roots.push(r.dir.path().join("missing"));

    let report = r.sync_with(&r.ops, &roots);
    assert_eq!(report.excluded.len(), 1);
    assert_eq!(report.replicas.len(), 3);
    assert_eq!(r.read(2, "a.txt").as_deref(), Some("alpha"));
}
