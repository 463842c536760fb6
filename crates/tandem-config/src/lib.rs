//! Tandem configuration system.
//!
//! TOML-based configuration for the session core: realtime channel
//! reconnection, queue reconciliation pacing, player rate limits,
//! signaling timeouts and ICE servers. All sections use defaults so
//! partial configs work out of the box.
//!
//! ```rust,no_run
//! use tandem_config::load_config;
//!
//! let config = load_config().expect("failed to load config");
//! println!("{}", config.channel.endpoint);
//! ```

pub mod schema;
pub mod toml_loader;
pub mod validation;

pub use schema::*;
pub use toml_loader::{load_default, load_from_path};

use tandem_common::ConfigError;

/// Load config from the platform default path and validate it.
pub fn load_config() -> Result<TandemConfig, ConfigError> {
    let config = toml_loader::load_default()?;
    validation::validate(&config)?;
    Ok(config)
}

/// Load config from an explicit path and validate it.
pub fn load_config_from(path: &std::path::Path) -> Result<TandemConfig, ConfigError> {
    let config = toml_loader::load_from_path(path)?;
    validation::validate(&config)?;
    Ok(config)
}

/// Serialize a config to a pretty-printed JSON string.
pub fn config_to_json(config: &TandemConfig) -> String {
    serde_json::to_string_pretty(config)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize config: {e}\"}}"))
}
