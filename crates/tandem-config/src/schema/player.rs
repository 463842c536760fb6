use serde::{Deserialize, Serialize};

/// External player (music service) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Base URL of the player Web API.
    pub api_base: String,
    /// Source tag of the player this session controls: "spotify" or "youtube".
    pub source: String,
    pub request_timeout_secs: u64,
    /// Device to activate when the host starts playback.
    pub device_id: Option<String>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.spotify.com/v1".into(),
            source: "spotify".into(),
            request_timeout_secs: 10,
            device_id: None,
        }
    }
}
