//! Peer-connection signaling configuration types.

use serde::{Deserialize, Serialize};

/// A STUN or TURN server descriptor. Opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Upper bound on establishing one peer connection.
    pub connect_timeout_ms: u64,
    /// Retries after an establishment timeout.
    pub max_retries: u32,
    pub ice_servers: Vec<IceServerConfig>,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            max_retries: 1,
            ice_servers: vec![IceServerConfig {
                url: "stun:stun.l.google.com:19302".into(),
                username: None,
                credential: None,
            }],
        }
    }
}
