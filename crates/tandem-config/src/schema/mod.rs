//! Configuration schema types for Tandem.
//!
//! All structs use `serde(default)` so partial configs work correctly.
//! Durations are stored as integer milliseconds (or seconds where noted).

mod channel;
mod logging;
mod player;
mod queue;
mod rate_limit;
mod signaling;

pub use channel::*;
pub use logging::*;
pub use player::*;
pub use queue::*;
pub use rate_limit::*;
pub use signaling::*;

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Root configuration for Tandem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TandemConfig {
    pub channel: ChannelConfig,
    pub queue: QueueConfig,
    pub rate_limit: RateLimitConfig,
    pub signaling: SignalingConfig,
    pub player: PlayerConfig,
    pub logging: LoggingConfig,
}
