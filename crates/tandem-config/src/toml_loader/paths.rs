//! Where the config file lives, and writing the commented default.

use std::ffi::OsString;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tandem_common::ConfigError;
use tracing::info;

use super::template::default_config_toml;

/// Environment variable pointing at an explicit config file.
pub const CONFIG_ENV: &str = "TANDEM_CONFIG";

/// `$TANDEM_CONFIG` if set, otherwise `<config dir>/tandem/config.toml`.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    resolve_config_path(std::env::var_os(CONFIG_ENV), dirs::config_dir())
}

pub(crate) fn resolve_config_path(
    env_override: Option<OsString>,
    config_dir: Option<PathBuf>,
) -> Result<PathBuf, ConfigError> {
    if let Some(path) = env_override.filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    config_dir
        .map(|dir| dir.join("tandem").join("config.toml"))
        .ok_or_else(|| ConfigError::Io {
            path: PathBuf::from("tandem/config.toml"),
            message: format!("no platform config directory; set {CONFIG_ENV}"),
        })
}

/// Write the commented default config to `path`.
///
/// Never overwrites: returns `Ok(false)` when a file is already there.
pub fn create_default_config(path: &Path) -> Result<bool, ConfigError> {
    let io_err = |e: std::io::Error| ConfigError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(io_err(e)),
    };
    file.write_all(default_config_toml().as_bytes())
        .map_err(io_err)?;

    info!(path = %path.display(), "Wrote default config");
    Ok(true)
}
