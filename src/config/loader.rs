//! # Configuration Loader
//!
//! Layers configuration sources with the `config` crate: built-in defaults,
//! then an optional TOML file, then `MAILROOM__SECTION__KEY` environment
//! variables. The result is validated before it is returned.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{ConfigResult, MailroomConfig};

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "MAILROOM_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/mailroom.toml";
pub const ENV_PREFIX: &str = "MAILROOM";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads from `MAILROOM_CONFIG_PATH` (or the default path) and the
    /// environment
    pub fn load() -> ConfigResult<MailroomConfig> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(&path)
    }

    /// Loads from the given file, if it exists, and the environment
    pub fn load_from(path: &Path) -> ConfigResult<MailroomConfig> {
        let defaults = config::Config::try_from(&MailroomConfig::default())?;

        let settings = config::Config::builder()
            .add_source(defaults)
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: MailroomConfig = settings.try_deserialize()?;
        config.validate()?;

        debug!(path = %path.display(), "Configuration sources merged");
        info!(
            batch_queue = %config.queue.batch_queue,
            handler_queue = %config.queue.handler_queue,
            batch_size = config.starts.batch_size,
            contacts_index = %config.elastic.contacts_index,
            "Configuration loaded"
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigurationError;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = ConfigLoader::load_from(Path::new("/nonexistent/mailroom.toml")).unwrap();
        assert_eq!(config.starts.batch_size, 100);
        assert_eq!(config.queue.batch_queue, "mailroom_batch");
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[starts]
batch_size = 50

[elastic]
contacts_index = "contacts_v2"

[smart_groups]
freshness_window_ms = 0
"#
        )
        .unwrap();

        let config = ConfigLoader::load_from(file.path()).unwrap();
        assert_eq!(config.starts.batch_size, 50);
        assert_eq!(config.starts.handler_queue_threshold, 2);
        assert_eq!(config.elastic.contacts_index, "contacts_v2");
        assert_eq!(config.smart_groups.freshness_window_ms, 0);
    }

    #[test]
    fn test_invalid_file_values_are_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[queue]\nbatch_queue = \"same\"\nhandler_queue = \"same\"").unwrap();

        assert!(matches!(
            ConfigLoader::load_from(file.path()),
            Err(ConfigurationError::ValidationError(_))
        ));
    }
}
