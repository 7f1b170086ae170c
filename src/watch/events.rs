//! Raw watcher events and the logical operations they fold into.

use std::path::{Path, PathBuf};

/// What kind of item an event is about. Folders and unknown kinds appear
/// atomically; only files go through an in-progress create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    File,
    Folder,
    Unknown,
}

/// One OS notification, already mapped to the sync vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    /// A file appeared but its writer has not finished yet.
    Creating { path: PathBuf, kind: ItemKind },
    Created { path: PathBuf, kind: ItemKind },
    Modified { path: PathBuf, kind: ItemKind },
    Deleted { path: PathBuf, kind: ItemKind },
    Renamed {
        from: PathBuf,
        to: PathBuf,
        kind: ItemKind,
    },
}

impl RawEvent {
    pub fn creating(path: impl Into<PathBuf>) -> Self {
        RawEvent::Creating {
            path: path.into(),
            kind: ItemKind::File,
        }
    }

    pub fn created(path: impl Into<PathBuf>) -> Self {
        RawEvent::Created {
            path: path.into(),
            kind: ItemKind::File,
        }
    }

    pub fn modified(path: impl Into<PathBuf>) -> Self {
        RawEvent::Modified {
            path: path.into(),
            kind: ItemKind::File,
        }
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        RawEvent::Deleted {
            path: path.into(),
            kind: ItemKind::File,
        }
    }

    pub fn renamed(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        RawEvent::Renamed {
            from: from.into(),
            to: to.into(),
            kind: ItemKind::File,
        }
    }

    /// Path the event is keyed by: the old path for renames.
    pub fn path(&self) -> &Path {
        match self {
            RawEvent::Creating { path, .. }
            | RawEvent::Created { path, .. }
            | RawEvent::Modified { path, .. }
            | RawEvent::Deleted { path, .. } => path,
            RawEvent::Renamed { from, .. } => from,
        }
    }
}

/// Net effect of a burst of events, handed to the live executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogicalOp {
    Created { path: PathBuf, kind: ItemKind },
    Modified { path: PathBuf, kind: ItemKind },
    Deleted { path: PathBuf, kind: ItemKind },
    Renamed {
        from: PathBuf,
        to: PathBuf,
        kind: ItemKind,
    },
}

impl LogicalOp {
    /// Path the operation is about: the old path for renames.
    pub fn path(&self) -> &Path {
        match self {
            LogicalOp::Created { path, .. }
            | LogicalOp::Modified { path, .. }
            | LogicalOp::Deleted { path, .. } => path,
            LogicalOp::Renamed { from, .. } => from,
        }
    }

    pub fn rename_target(&self) -> Option<&Path> {
        match self {
            LogicalOp::Renamed { to, .. } => Some(to),
            _ => None,
        }
    }

    pub fn kind(&self) -> ItemKind {
        match self {
            LogicalOp::Created { kind, .. }
            | LogicalOp::Modified { kind, .. }
            | LogicalOp::Deleted { kind, .. }
            | LogicalOp::Renamed { kind, .. } => *kind,
        }
    }
}

/// Case-insensitive identity used by the fold.
pub(crate) fn path_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").to_lowercase()
}
