use serde::{Deserialize, Serialize};

/// Queue reconciliation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Minimum spacing between reconciliation passes per session.
    pub min_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 3000,
        }
    }
}
