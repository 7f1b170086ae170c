//! Shared scratch-replica harness.

use filetime::FileTime;
use std::fs;
use std::path::{Path, PathBuf};
use syncfold::config::SyncConfig;
use syncfold::ops::{FileOps, LocalFileOps};
use syncfold::progress::RecordingProgress;
use syncfold::session::{SyncReport, SyncSession};
use syncfold::snapshot::JsonSnapshotStore;
use syncfold::tree::SyncTree;
use tempfile::TempDir;

pub const GROUP: &str = "docs";

pub struct Replicas {
    pub dir: TempDir,
    pub roots: Vec<PathBuf>,
    pub config: SyncConfig,
    pub store: JsonSnapshotStore,
    pub ops: LocalFileOps,
}

impl Replicas {
    pub fn new(count: usize) -> Self {
        let dir = TempDir::new().unwrap();
        let roots = (0..count)
            .map(|i| {
                let root = dir.path().join(format!("replica{}", i));
                fs::create_dir_all(&root).unwrap();
                dunce::canonicalize(&root).unwrap()
            })
            .collect();
        let config = SyncConfig::default();
        let store = JsonSnapshotStore::new(config.metadata_dir.clone());
        let ops = LocalFileOps::new(dir.path().join("recycle"));
        Self {
            dir,
            roots,
            config,
            store,
            ops,
        }
    }

    pub fn path(&self, replica: usize, rel: &str) -> PathBuf {
        self.roots[replica].join(rel)
    }

    /// Write `body` with a fixed modification time in seconds.
    pub fn write(&self, replica: usize, rel: &str, body: &str, mtime: i64) {
        let path = self.path(replica, rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, body).unwrap();
        filetime::set_file_mtime(&path, FileTime::from_unix_time(mtime, 0)).unwrap();
    }

    pub fn read(&self, replica: usize, rel: &str) -> Option<String> {
        fs::read_to_string(self.path(replica, rel)).ok()
    }

    pub fn exists(&self, replica: usize, rel: &str) -> bool {
        self.path(replica, rel).exists()
    }

    pub fn sync(&self) -> SyncReport {
        self.sync_with(&self.ops, &self.roots)
    }

    pub fn sync_with(&self, ops: &dyn FileOps, roots: &[PathBuf]) -> SyncReport {
        self.sync_tree_with(ops, roots).0
    }

    pub fn sync_tree(&self) -> (SyncReport, SyncTree) {
        self.sync_tree_with(&self.ops, &self.roots)
    }

    pub fn sync_tree_with(&self, ops: &dyn FileOps, roots: &[PathBuf]) -> (SyncReport, SyncTree) {
        let progress = RecordingProgress::new();
        SyncSession::new(&self.config, ops, &self.store, &progress)
            .run_with_tree(GROUP, roots)
            .unwrap()
    }

    /// Relative path and content of every file in a replica, metadata excluded.
    pub fn listing(&self, replica: usize) -> Vec<(String, String)> {
        let root = &self.roots[replica];
        let mut out: Vec<(String, String)> = walkdir::WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| e.file_name() != self.config.metadata_dir.as_str())
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let rel = rel_string(root, e.path());
                (rel, fs::read_to_string(e.path()).unwrap())
            })
            .collect();
        out.sort();
        out
    }
}

fn rel_string(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap()
        .to_string_lossy()
        .replace('\\', "/")
}
