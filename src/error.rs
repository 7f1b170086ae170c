//! Error types
//!
//! Three layers: `SyncError` for run-level failures, `SnapshotError` for metadata
//! and walking, and `FileOpError` for the per-item failures raised by the file-ops
//! collaborator. Per-item failures never escape the executor; they end up as
//! `FinalState::Error` on the affected replica slot.

use std::path::PathBuf;
use thiserror::Error;

/// Snapshot store and walker errors
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse snapshot {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to walk {root}: {source}")]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Run-level errors
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Replica {path} is unavailable: {source}")]
    ReplicaUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Not enough readable replicas: {available} of {requested}")]
    NotEnoughReplicas { available: usize, requested: usize },

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Watch error: {0}")]
    Watch(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Discriminant of a [`FileOpError`], handy for matching without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOpKind {
    CopyFile,
    MoveFile,
    DeleteFile,
    ArchiveFile,
    CreateFolder,
    CopyFolder,
    MoveFolder,
    DeleteFolder,
    ArchiveFolder,
}

/// Named failures of the file-ops collaborator
#[derive(Debug, Error)]
pub enum FileOpError {
    #[error("Copy of {from} to {to} failed: {source}")]
    CopyFileFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Move of {from} to {to} failed: {source}")]
    MoveFileFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Delete of {path} failed: {source}")]
    DeleteFileFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Archive of {path} failed: {source}")]
    ArchiveFileFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Create folder {path} failed: {source}")]
    CreateFolderFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Copy of folder {from} to {to} failed: {source}")]
    CopyFolderFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Move of folder {from} to {to} failed: {source}")]
    MoveFolderFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Delete of folder {path} failed: {source}")]
    DeleteFolderFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Archive of folder {path} failed: {source}")]
    ArchiveFolderFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FileOpError {
    pub fn kind(&self) -> FileOpKind {
        match self {
            FileOpError::CopyFileFailed { .. } => FileOpKind::CopyFile,
            FileOpError::MoveFileFailed { .. } => FileOpKind::MoveFile,
            FileOpError::DeleteFileFailed { .. } => FileOpKind::DeleteFile,
            FileOpError::ArchiveFileFailed { .. } => FileOpKind::ArchiveFile,
            FileOpError::CreateFolderFailed { .. } => FileOpKind::CreateFolder,
            FileOpError::CopyFolderFailed { .. } => FileOpKind::CopyFolder,
            FileOpError::MoveFolderFailed { .. } => FileOpKind::MoveFolder,
            FileOpError::DeleteFolderFailed { .. } => FileOpKind::DeleteFolder,
            FileOpError::ArchiveFolderFailed { .. } => FileOpKind::ArchiveFolder,
        }
    }
}
