//! Realtime channel configuration types.

use serde::{Deserialize, Serialize};

/// Connection and reconnection settings for the realtime channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// WebSocket URL of the coordination server.
    pub endpoint: String,
    /// URL of the queue channel. Defaults to `{endpoint}/queue`.
    pub queue_endpoint: Option<String>,
    /// HTTP base URL for the long-polling fallback. Defaults to `endpoint`
    /// with the scheme swapped to http(s).
    pub poll_endpoint: Option<String>,
    pub connect_timeout_ms: u64,
    pub heartbeat_interval_secs: u64,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
    /// Failures tolerated per transport before downgrading.
    pub max_reconnect_attempts: u32,
    /// Fixed delay before reconnecting after the server closed the connection.
    pub server_close_delay_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8787/session".into(),
            queue_endpoint: None,
            poll_endpoint: None,
            connect_timeout_ms: 10_000,
            heartbeat_interval_secs: 25,
            reconnect_initial_ms: 1000,
            reconnect_max_ms: 5000,
            max_reconnect_attempts: 5,
            server_close_delay_ms: 1000,
        }
    }
}

impl ChannelConfig {
    pub fn queue_endpoint(&self) -> String {
        self.queue_endpoint
            .clone()
            .unwrap_or_else(|| format!("{}/queue", self.endpoint.trim_end_matches('/')))
    }

    pub fn poll_endpoint(&self) -> String {
        if let Some(url) = &self.poll_endpoint {
            return url.clone();
        }
        if let Some(rest) = self.endpoint.strip_prefix("wss://") {
            format!("https://{rest}")
        } else if let Some(rest) = self.endpoint.strip_prefix("ws://") {
            format!("http://{rest}")
        } else {
            self.endpoint.clone()
        }
    }
}
