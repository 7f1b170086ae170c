//! Configuration
//!
//! Layered with the `config` crate: built-in defaults, the global file under
//! `$XDG_CONFIG_HOME/syncfold/config.toml`, an explicit file, then `SYNCFOLD_*`
//! environment variables (`__` separates nested keys).

pub mod facade;
pub mod merge;
pub mod paths;
pub mod sources;

pub use facade::ConfigLoader;

use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncfoldConfig {
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings consumed by the executors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Archived copies kept per file before it is overwritten or deleted; 0 disables archiving
    #[serde(default)]
    pub archive_limit: usize,

    /// Folder name for archived copies, created next to the archived item
    #[serde(default = "default_archive_name")]
    pub archive_name: String,

    /// Move deleted and overwritten items to the recycle dir instead of removing them
    #[serde(default)]
    pub recycle_on_delete: bool,

    /// Hidden per-replica folder holding snapshots
    #[serde(default = "default_metadata_dir")]
    pub metadata_dir: String,

    /// Recycle location; None uses the platform data dir
    #[serde(default)]
    pub recycle_dir: Option<PathBuf>,
}

fn default_archive_name() -> String {
    "_archive".to_string()
}

fn default_metadata_dir() -> String {
    ".syncfold".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            archive_limit: 0,
            archive_name: default_archive_name(),
            recycle_on_delete: false,
            metadata_dir: default_metadata_dir(),
            recycle_dir: None,
        }
    }
}

impl SyncConfig {
    /// Folder names the walker and watcher never descend into.
    pub fn skip_names(&self) -> [&str; 2] {
        [self.metadata_dir.as_str(), self.archive_name.as_str()]
    }
}

/// Live watcher settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Treat file creation as in-progress until the writer closes it.
    /// Only Linux reports close-after-write; elsewhere creates are confirmed at once.
    #[serde(default = "default_confirm_on_close")]
    pub confirm_creates_on_close: bool,

    /// Drop events that only touch permissions or timestamps
    #[serde(default = "default_true")]
    pub ignore_metadata: bool,
}

fn default_confirm_on_close() -> bool {
    cfg!(target_os = "linux")
}

fn default_true() -> bool {
    true
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            confirm_creates_on_close: default_confirm_on_close(),
            ignore_metadata: default_true(),
        }
    }
}
