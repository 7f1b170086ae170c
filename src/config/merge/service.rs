//! MergeService: orchestrates sources, applies merge policy, deserializes to SyncfoldConfig.

use crate::config::sources::{environment, global_file};
use crate::config::SyncfoldConfig;
use config::{ConfigError, File};
use std::path::Path;

use super::policy;

/// Merge service for config composition.
pub struct MergeService;

impl MergeService {
    /// Precedence: defaults (lowest) -> global file -> explicit file -> environment (highest).
    pub fn load(explicit: Option<&Path>) -> Result<SyncfoldConfig, ConfigError> {
        let builder = policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = match explicit {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder,
        };
        let builder = environment::add_to_builder(builder)?;

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("syncfold.toml");
        std::fs::write(
            &path,
            "[sync]\narchive_limit = 5\nrecycle_on_delete = true\n\n[logging]\nformat = \"json\"\n",
        )
        .unwrap();

        let config = MergeService::load(Some(&path)).unwrap();
        assert_eq!(config.sync.archive_limit, 5);
        assert!(config.sync.recycle_on_delete);
        assert_eq!(config.sync.archive_name, "_archive");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(MergeService::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
