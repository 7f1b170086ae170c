//! Built-in defaults, the lowest layer of every configuration.

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError};

/// Builder preloaded with the defaults every other source overrides.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    config::Config::builder()
        .set_default("sync.archive_limit", 0)?
        .set_default("sync.archive_name", "_archive")?
        .set_default("sync.recycle_on_delete", false)?
        .set_default("sync.metadata_dir", ".syncfold")?
        .set_default("watch.confirm_creates_on_close", cfg!(target_os = "linux"))?
        .set_default("watch.ignore_metadata", true)?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?
        .set_default("logging.output", "stderr")
}
