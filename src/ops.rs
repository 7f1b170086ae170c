//! File operations
//!
//! The executor never touches the filesystem directly; it goes through
//! [`FileOps`] so failures come back as named [`FileOpError`]s and tests can
//! inject faults per replica.

use crate::config::SyncConfig;
use crate::error::{FileOpError, SyncError};
use chrono::{NaiveDateTime, Utc};
use filetime::FileTime;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// Suffix of the temporary sibling a copy is written to before it is renamed
/// into place. Watchers ignore these.
pub const PARTIAL_SUFFIX: &str = ".syncfold-partial";

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%3fZ";

/// Filesystem surface used by the executors.
pub trait FileOps: Send + Sync {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn copy_file(&self, from: &Path, to: &Path) -> Result<(), FileOpError>;
    fn move_file(&self, from: &Path, to: &Path) -> Result<(), FileOpError>;
    fn delete_file(&self, path: &Path) -> Result<(), FileOpError>;
    fn delete_file_to_recycle_bin(&self, path: &Path) -> Result<(), FileOpError>;
    /// Keep a timestamped copy of `path` under `<parent>/<archive_name>/`,
    /// retaining at most `limit` copies. A limit of zero disables archiving.
    fn archive_file(&self, path: &Path, archive_name: &str, limit: usize) -> Result<(), FileOpError>;

    fn create_folder(&self, path: &Path) -> Result<(), FileOpError>;
    fn copy_folder(&self, from: &Path, to: &Path) -> Result<(), FileOpError>;
    fn move_folder(&self, from: &Path, to: &Path) -> Result<(), FileOpError>;
    fn delete_folder(&self, path: &Path) -> Result<(), FileOpError>;
    fn delete_folder_to_recycle_bin(&self, path: &Path) -> Result<(), FileOpError>;
    fn archive_folder(&self, path: &Path, archive_name: &str, limit: usize)
        -> Result<(), FileOpError>;
}

/// [`FileOps`] on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalFileOps {
    recycle_dir: PathBuf,
}

impl LocalFileOps {
    pub fn new(recycle_dir: impl Into<PathBuf>) -> Self {
        Self {
            recycle_dir: recycle_dir.into(),
        }
    }

    /// Use the configured recycle dir, or `<data dir>/recycle` for the platform.
    pub fn from_config(config: &SyncConfig) -> Result<Self, SyncError> {
        if let Some(dir) = &config.recycle_dir {
            return Ok(Self::new(dir));
        }
        let dirs = directories::ProjectDirs::from("", "syncfold", "syncfold").ok_or_else(|| {
            SyncError::Config("Could not determine platform data directory for recycle bin".to_string())
        })?;
        Ok(Self::new(dirs.data_dir().join("recycle")))
    }

    pub fn recycle_dir(&self) -> &Path {
        &self.recycle_dir
    }

    fn recycle_target(&self, path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "unnamed".into());
        let stamp = timestamp();
        let mut target = self.recycle_dir.join(&stamp).join(&name);
        let mut n = 1;
        while target.exists() {
            target = self.recycle_dir.join(format!("{}-{}", stamp, n)).join(&name);
            n += 1;
        }
        target
    }
}

/// Move aside the file at `dest` before it is overwritten: archive it when
/// archiving is on, then recycle or delete it. Failures are logged and the
/// overwrite goes ahead.
pub fn displace(ops: &dyn FileOps, config: &SyncConfig, dest: &Path) {
    if config.archive_limit > 0 {
        if let Err(e) = ops.archive_file(dest, &config.archive_name, config.archive_limit) {
            warn!(path = %dest.display(), error = %e, "Archive before overwrite failed");
        }
    }
    let removed = if config.recycle_on_delete {
        ops.delete_file_to_recycle_bin(dest)
    } else {
        ops.delete_file(dest)
    };
    if let Err(e) = removed {
        warn!(path = %dest.display(), error = %e, "Removing stale copy failed");
    }
}

impl FileOps for LocalFileOps {
    fn copy_file(&self, from: &Path, to: &Path) -> Result<(), FileOpError> {
        copy_preserving_mtime(from, to).map_err(|source| FileOpError::CopyFileFailed {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            source,
        })?;
        trace!(from = %from.display(), to = %to.display(), "Copied file");
        Ok(())
    }

    fn move_file(&self, from: &Path, to: &Path) -> Result<(), FileOpError> {
        relocate(from, to).map_err(|source| FileOpError::MoveFileFailed {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            source,
        })
    }

    fn delete_file(&self, path: &Path) -> Result<(), FileOpError> {
        fs::remove_file(path).map_err(|source| FileOpError::DeleteFileFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    fn delete_file_to_recycle_bin(&self, path: &Path) -> Result<(), FileOpError> {
        let target = self.recycle_target(path);
        relocate(path, &target).map_err(|source| FileOpError::DeleteFileFailed {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), recycled = %target.display(), "Recycled file");
        Ok(())
    }

    fn archive_file(&self, path: &Path, archive_name: &str, limit: usize) -> Result<(), FileOpError> {
        if limit == 0 {
            return Ok(());
        }
        archive(path, archive_name, limit, false).map_err(|source| FileOpError::ArchiveFileFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    fn create_folder(&self, path: &Path) -> Result<(), FileOpError> {
        fs::create_dir_all(path).map_err(|source| FileOpError::CreateFolderFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    fn copy_folder(&self, from: &Path, to: &Path) -> Result<(), FileOpError> {
        copy_tree(from, to).map_err(|source| FileOpError::CopyFolderFailed {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            source,
        })
    }

    fn move_folder(&self, from: &Path, to: &Path) -> Result<(), FileOpError> {
        relocate(from, to).map_err(|source| FileOpError::MoveFolderFailed {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            source,
        })
    }

    fn delete_folder(&self, path: &Path) -> Result<(), FileOpError> {
        fs::remove_dir_all(path).map_err(|source| FileOpError::DeleteFolderFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    fn delete_folder_to_recycle_bin(&self, path: &Path) -> Result<(), FileOpError> {
        let target = self.recycle_target(path);
        relocate(path, &target).map_err(|source| FileOpError::DeleteFolderFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    fn archive_folder(
        &self,
        path: &Path,
        archive_name: &str,
        limit: usize,
    ) -> Result<(), FileOpError> {
        if limit == 0 {
            return Ok(());
        }
        archive(path, archive_name, limit, true).map_err(|source| {
            FileOpError::ArchiveFolderFailed {
                path: path.to_path_buf(),
                source,
            }
        })
    }
}

fn timestamp() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Copy through a temporary sibling so readers never see a half-written file.
fn copy_preserving_mtime(from: &Path, to: &Path) -> io::Result<()> {
    ensure_parent(to)?;
    let metadata = fs::metadata(from)?;
    let file_name = to
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let partial = to.with_file_name(format!(".{}{}", file_name, PARTIAL_SUFFIX));
    fs::copy(from, &partial)?;
    filetime::set_file_mtime(&partial, FileTime::from_last_modification_time(&metadata))?;
    if let Err(e) = fs::rename(&partial, to) {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }
    Ok(())
}

/// Rename, falling back to copy and remove across filesystems.
fn relocate(from: &Path, to: &Path) -> io::Result<()> {
    ensure_parent(to)?;
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(e),
        Err(_) if from.is_dir() => {
            copy_tree(from, to)?;
            fs::remove_dir_all(from)
        }
        Err(_) => {
            copy_preserving_mtime(from, to)?;
            fs::remove_file(from)
        }
    }
}

fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(io::Error::other)?;
        let Ok(relative) = entry.path().strip_prefix(from) else {
            continue;
        };
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            copy_preserving_mtime(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Copy `path` to `<parent>/<archive_name>/<stem>_<timestamp><ext>` and prune
/// copies beyond `limit`, oldest first.
fn archive(path: &Path, archive_name: &str, limit: usize, folder: bool) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let archive_dir = parent.join(archive_name);
    fs::create_dir_all(&archive_dir)?;

    let (stem, ext) = split_name(path, folder);
    let prefix = format!("{}_", stem);
    let mut target = archive_dir.join(format!("{}{}{}", prefix, timestamp(), ext));
    let mut n = 1;
    while target.exists() {
        target = archive_dir.join(format!("{}{}-{}{}", prefix, timestamp(), n, ext));
        n += 1;
    }

    if folder {
        copy_tree(path, &target)?;
    } else {
        copy_preserving_mtime(path, &target)?;
    }
    debug!(path = %path.display(), archived = %target.display(), "Archived");

    let mut copies: Vec<((NaiveDateTime, u32), PathBuf)> = fs::read_dir(&archive_dir)?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            archive_stamp(&name, &prefix, &ext).map(|stamp| (stamp, e.path()))
        })
        .collect();
    copies.sort();
    while copies.len() > limit {
        let (_, oldest) = copies.remove(0);
        if oldest.is_dir() {
            fs::remove_dir_all(&oldest)?;
        } else {
            fs::remove_file(&oldest)?;
        }
        trace!(pruned = %oldest.display(), "Pruned archive copy");
    }
    Ok(())
}

/// Timestamp and uniquifier of an archive copy named
/// `<prefix><timestamp>[-n]<ext>`, or `None` for any other name.
fn archive_stamp(name: &str, prefix: &str, ext: &str) -> Option<(NaiveDateTime, u32)> {
    let middle = name.strip_prefix(prefix)?.strip_suffix(ext)?;
    let (stamp, n) = match middle.split_once('-') {
        Some((stamp, n)) => (stamp, n.parse().ok()?),
        None => (middle, 0),
    };
    let at = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
    Some((at, n))
}

fn split_name(path: &Path, folder: bool) -> (String, String) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if folder {
        return (name, String::new());
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.clone());
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (stem, ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FileOpKind;

    fn ops(dir: &Path) -> LocalFileOps {
        LocalFileOps::new(dir.join("recycle"))
    }

    #[test]
    fn copy_creates_parents_and_keeps_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("a.txt");
        fs::write(&from, b"content").unwrap();
        filetime::set_file_mtime(&from, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();

        let to = dir.path().join("deep/er/a.txt");
        ops(dir.path()).copy_file(&from, &to).unwrap();

        assert_eq!(fs::read(&to).unwrap(), b"content");
        let mtime = FileTime::from_last_modification_time(&fs::metadata(&to).unwrap());
        assert_eq!(mtime.unix_seconds(), 1_600_000_000);
        assert!(!dir.path().join("deep/er/.a.txt.syncfold-partial").exists());
    }

    #[test]
    fn copy_of_missing_source_is_named_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = ops(dir.path())
            .copy_file(&dir.path().join("nope"), &dir.path().join("x"))
            .unwrap_err();
        assert_eq!(err.kind(), FileOpKind::CopyFile);
    }

    #[test]
    fn archive_keeps_at_most_limit_copies() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("report.txt");
        let ops = ops(dir.path());
        for i in 0..4 {
            fs::write(&file, format!("v{}", i)).unwrap();
            ops.archive_file(&file, "_archive", 2).unwrap();
        }
        let archived: Vec<_> = fs::read_dir(dir.path().join("_archive")).unwrap().collect();
        assert_eq!(archived.len(), 2);
    }

    #[test]
    fn archive_pruning_leaves_other_stems_alone() {
        let dir = tempfile::tempdir().unwrap();
        let ops = ops(dir.path());
        let other = dir.path().join("a_b.txt");
        let mine = dir.path().join("a.txt");
        fs::write(&other, b"other").unwrap();
        fs::write(&mine, b"mine").unwrap();

        ops.archive_file(&other, "_archive", 1).unwrap();
        ops.archive_file(&mine, "_archive", 1).unwrap();

        let mut contents: Vec<Vec<u8>> = fs::read_dir(dir.path().join("_archive"))
            .unwrap()
            .map(|e| fs::read(e.unwrap().path()).unwrap())
            .collect();
        contents.sort();
        assert_eq!(contents, vec![b"mine".to_vec(), b"other".to_vec()]);
    }

    #[test]
    fn archive_stamp_matches_only_own_copies() {
        assert!(archive_stamp("a_20240501T101010123Z.txt", "a_", ".txt").is_some());
        assert_eq!(
            archive_stamp("a_20240501T101010123Z-2.txt", "a_", ".txt").map(|(_, n)| n),
            Some(2)
        );
        assert!(archive_stamp("a_b_20240501T101010123Z.txt", "a_", ".txt").is_none());
        assert!(archive_stamp("a_notes.txt", "a_", ".txt").is_none());
        assert!(archive_stamp("a_20240501T101010123Z.md", "a_", ".txt").is_none());
    }

    #[test]
    fn archive_limit_zero_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("r.txt");
        fs::write(&file, b"x").unwrap();
        ops(dir.path()).archive_file(&file, "_archive", 0).unwrap();
        assert!(!dir.path().join("_archive").exists());
    }

    #[test]
    fn recycle_moves_file_out_of_the_replica() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("r.txt");
        fs::write(&file, b"x").unwrap();
        let ops = ops(dir.path());
        ops.delete_file_to_recycle_bin(&file).unwrap();
        assert!(!file.exists());
        let recycled = WalkDir::new(ops.recycle_dir())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count();
        assert_eq!(recycled, 1);
    }

    #[test]
    fn recycling_the_same_name_twice_keeps_both() {
        let dir = tempfile::tempdir().unwrap();
        let ops = ops(dir.path());
        for content in [b"first", b"other"] {
            let file = dir.path().join("r.txt");
            fs::write(&file, content).unwrap();
            ops.delete_file_to_recycle_bin(&file).unwrap();
        }
        let mut recycled: Vec<Vec<u8>> = WalkDir::new(ops.recycle_dir())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| fs::read(e.path()).unwrap())
            .collect();
        recycled.sort();
        assert_eq!(recycled, vec![b"first".to_vec(), b"other".to_vec()]);
    }

    #[test]
    fn displace_honours_recycle_setting() {
        let dir = tempfile::tempdir().unwrap();
        let ops = ops(dir.path());
        let file = dir.path().join("r.txt");
        fs::write(&file, b"stale").unwrap();
        let config = SyncConfig {
            archive_limit: 1,
            recycle_on_delete: true,
            ..SyncConfig::default()
        };

        displace(&ops, &config, &file);

        assert!(!file.exists());
        assert_eq!(fs::read_dir(dir.path().join("_archive")).unwrap().count(), 1);
        assert!(ops.recycle_dir().exists());
    }

    #[test]
    fn folder_copy_move_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("inner")).unwrap();
        fs::write(src.join("inner/f.txt"), b"f").unwrap();
        let ops = ops(dir.path());

        ops.copy_folder(&src, &dir.path().join("copy")).unwrap();
        assert_eq!(fs::read(dir.path().join("copy/inner/f.txt")).unwrap(), b"f");

        ops.move_folder(&dir.path().join("copy"), &dir.path().join("moved")).unwrap();
        assert!(dir.path().join("moved/inner/f.txt").exists());

        ops.delete_folder(&dir.path().join("moved")).unwrap();
        assert!(!dir.path().join("moved").exists());
        let err = ops.delete_folder(&dir.path().join("moved")).unwrap_err();
        assert_eq!(err.kind(), FileOpKind::DeleteFolder);
    }
}
