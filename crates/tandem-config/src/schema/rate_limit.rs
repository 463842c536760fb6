use serde::{Deserialize, Serialize};

/// Minimum spacing between calls to the external player, per category.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub player_control_ms: u64,
    pub device_control_ms: u64,
    pub volume_control_ms: u64,
    pub queue_control_ms: u64,
    pub general_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            player_control_ms: 20,
            device_control_ms: 50,
            volume_control_ms: 50,
            queue_control_ms: 50,
            general_ms: 50,
        }
    }
}
