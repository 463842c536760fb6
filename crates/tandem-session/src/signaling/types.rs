use std::fmt;
use std::time::Duration;

use tandem_common::SignalingError;
use tandem_config::SignalingConfig;

use super::peer::{IceServer, MediaStream};
use crate::protocol::Role;

/// Handshake progress of one host/guest pair.
///
/// The host passes through `OfferCreated` when it applies the guest's
/// offer, so both sides see exactly one offer step and one answer step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeState {
    Idle,
    OfferCreated,
    AnswerReceived,
    AnswerSent,
    Connected,
    Closed,
}

impl ExchangeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::OfferCreated => "offer-created",
            Self::AnswerReceived => "answer-received",
            Self::AnswerSent => "answer-sent",
            Self::Connected => "connected",
            Self::Closed => "closed",
        }
    }

    /// Position in the handshake. Transitions only ever move forward.
    pub(crate) fn rank(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::OfferCreated => 1,
            Self::AnswerReceived | Self::AnswerSent => 2,
            Self::Connected => 3,
            Self::Closed => 4,
        }
    }
}

impl fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PairKey {
    pub host_id: String,
    pub guest_id: String,
}

impl PairKey {
    /// Build the key from our side of the pair.
    pub fn new(local_role: Role, local_id: &str, peer_id: &str) -> Self {
        match local_role {
            Role::Host => Self {
                host_id: local_id.to_string(),
                guest_id: peer_id.to_string(),
            },
            Role::Guest => Self {
                host_id: peer_id.to_string(),
                guest_id: local_id.to_string(),
            },
        }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<->{}", self.host_id, self.guest_id)
    }
}

/// Observable outcomes, one stream per coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    StateChanged {
        peer_id: String,
        state: ExchangeState,
        generation: u64,
    },
    /// The host received the guest's audio and handed it to the sink.
    RemoteStream { peer_id: String, stream: MediaStream },
    /// A bad message reset the pair to `Idle` under a new generation.
    PairReset {
        peer_id: String,
        error: SignalingError,
    },
    /// A message was refused and the pair left untouched.
    Rejected {
        peer_id: String,
        error: SignalingError,
    },
    /// Establishment failed and no retry remains.
    Failed {
        peer_id: String,
        error: SignalingError,
    },
}

impl SignalingEvent {
    pub fn peer_id(&self) -> &str {
        match self {
            Self::StateChanged { peer_id, .. }
            | Self::RemoteStream { peer_id, .. }
            | Self::PairReset { peer_id, .. }
            | Self::Rejected { peer_id, .. }
            | Self::Failed { peer_id, .. } => peer_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignalingSettings {
    pub session_id: String,
    pub local_id: String,
    pub role: Role,
    pub ice_servers: Vec<IceServer>,
    pub connect_timeout: Duration,
    /// Re-offers after a failed establishment. Guest side only.
    pub max_retries: u32,
}

impl SignalingSettings {
    pub fn from_config(
        config: &SignalingConfig,
        session_id: impl Into<String>,
        local_id: impl Into<String>,
        role: Role,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            local_id: local_id.into(),
            role,
            ice_servers: config.ice_servers.iter().map(IceServer::from).collect(),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            max_retries: config.max_retries,
        }
    }
}
