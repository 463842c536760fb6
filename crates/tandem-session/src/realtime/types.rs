//! Settings, envelope, and state types for the channel client.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tandem_config::ChannelConfig;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportMode {
    WebSocket,
    LongPoll,
}

impl TransportMode {
    /// The next transport to try once this one has used up its attempts.
    pub fn downgrade(self) -> Option<Self> {
        match self {
            Self::WebSocket => Some(Self::LongPoll),
            Self::LongPoll => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebSocket => "websocket",
            Self::LongPoll => "long-poll",
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Reconnect Policy
// ---------------------------------------------------------------------------

/// Capped exponential backoff. `max_attempts == None` retries forever.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::bounded(Duration::from_millis(1000), Duration::from_millis(5000), 5)
    }
}

impl ReconnectPolicy {
    pub fn bounded(initial_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_attempts: Some(max_attempts),
        }
    }

    pub fn unbounded(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_attempts: None,
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    pub fn is_exhausted(&self, failures: u32) -> bool {
        matches!(self.max_attempts, Some(max) if failures >= max)
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Everything a channel's connection loop needs.
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    /// Short label used in log lines ("session", "queue").
    pub name: String,
    pub endpoint: String,
    pub poll_endpoint: String,
    pub connect_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub server_close_delay: Duration,
    pub policy: ReconnectPolicy,
    pub initial_transport: TransportMode,
}

impl ChannelSettings {
    /// Main session channel: bounded reconnect with transport downgrade.
    pub fn from_config(config: &ChannelConfig) -> Self {
        Self {
            name: "session".into(),
            endpoint: config.endpoint.clone(),
            poll_endpoint: config.poll_endpoint(),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
            server_close_delay: Duration::from_millis(config.server_close_delay_ms),
            policy: ReconnectPolicy::bounded(
                Duration::from_millis(config.reconnect_initial_ms),
                Duration::from_millis(config.reconnect_max_ms),
                config.max_reconnect_attempts,
            ),
            initial_transport: TransportMode::WebSocket,
        }
    }

    /// Queue channel: retries forever.
    pub fn queue_from_config(config: &ChannelConfig) -> Self {
        let queue_endpoint = config.queue_endpoint();
        let poll_endpoint = format!("{}/queue", config.poll_endpoint().trim_end_matches('/'));
        Self {
            name: "queue".into(),
            endpoint: queue_endpoint,
            poll_endpoint,
            policy: ReconnectPolicy::unbounded(
                Duration::from_millis(config.reconnect_initial_ms),
                Duration::from_millis(config.reconnect_max_ms),
            ),
            ..Self::from_config(config)
        }
    }

    pub fn endpoint_for(&self, mode: TransportMode) -> &str {
        match mode {
            TransportMode::WebSocket => &self.endpoint,
            TransportMode::LongPoll => &self.poll_endpoint,
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// One message on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Connected { transport: TransportMode },
    Reconnecting { attempt: u32, transport: TransportMode },
    Disconnected,
    /// Reconnect attempts exhausted on every transport. Terminal.
    Failed,
}

impl ChannelState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

/// Commands from the client handle to the connection loop.
#[derive(Debug)]
pub(crate) enum ChannelCommand {
    Send(Envelope),
    Disconnect,
}
