//! ConfigLoader facade delegating to merge service.

use super::merge::service::MergeService;
use super::SyncfoldConfig;
use crate::error::SyncError;
use std::path::Path;

/// Configuration loader facade.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from the global file and environment.
    pub fn load() -> Result<SyncfoldConfig, SyncError> {
        MergeService::load(None).map_err(config_error)
    }

    /// Load configuration with `path` layered over the global file.
    pub fn load_with_file(path: &Path) -> Result<SyncfoldConfig, SyncError> {
        MergeService::load(Some(path)).map_err(config_error)
    }

    /// Create default configuration.
    pub fn default() -> SyncfoldConfig {
        SyncfoldConfig::default()
    }
}

fn config_error(e: config::ConfigError) -> SyncError {
    SyncError::Config(e.to_string())
}
