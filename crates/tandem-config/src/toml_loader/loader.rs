//! Reading and parsing config files. Validation is left to the caller.

use std::io::ErrorKind;
use std::path::Path;

use tandem_common::ConfigError;
use tracing::{debug, info};

use super::paths::{create_default_config, default_config_path};
use crate::schema::TandemConfig;

/// Parse the TOML file at `path`. Missing sections and fields take their
/// defaults.
pub fn load_from_path(path: &Path) -> Result<TandemConfig, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ConfigError::FileNotFound(path.to_path_buf()))
        }
        Err(e) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        }
    };

    let config = toml::from_str::<TandemConfig>(&content)
        .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))?;
    debug!(path = %path.display(), "Loaded config");
    Ok(config)
}

/// Load from [`default_config_path`]. A first run writes the commented
/// default file and starts from defaults.
pub fn load_default() -> Result<TandemConfig, ConfigError> {
    let path = default_config_path()?;
    match load_from_path(&path) {
        Err(ConfigError::FileNotFound(_)) => {
            if create_default_config(&path)? {
                info!(path = %path.display(), "No config found, starting from defaults");
            }
            Ok(TandemConfig::default())
        }
        other => other,
    }
}
