//! Wire types for the session protocol.
//!
//! Every message on a realtime channel is an [`Envelope`](crate::realtime::Envelope)
//! carrying one of the event names below and a JSON payload. Field names on
//! the wire are camelCase.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Event names
// ---------------------------------------------------------------------------

pub mod events {
    pub const JOIN_SESSION: &str = "join-session";
    pub const LEAVE_SESSION: &str = "leave-session";
    pub const DEVICE_CAPABILITIES: &str = "device-capabilities";
    pub const DEVICE_LIST: &str = "device-list";

    pub const ADD_TO_QUEUE: &str = "add-to-queue";
    pub const REMOVE_FROM_QUEUE: &str = "remove-from-queue";
    pub const GET_QUEUE: &str = "get-queue";
    pub const QUEUE_UPDATE: &str = "queue-update";
    pub const QUEUE_ERROR: &str = "queue-error";

    pub const WEBRTC_OFFER: &str = "webrtc-offer";
    pub const WEBRTC_ANSWER: &str = "webrtc-answer";
    pub const WEBRTC_ICE_CANDIDATE: &str = "webrtc-ice-candidate";
    pub const START_STREAM_TO: &str = "start-stream-to";

    pub const PING: &str = "ping";

    /// Lifecycle events raised locally by a channel client, never sent.
    pub const CONNECTED: &str = "connected";
    pub const DISCONNECTED: &str = "disconnected";
    pub const RECONNECTING: &str = "reconnecting";
    pub const ERROR: &str = "error";
}

// ---------------------------------------------------------------------------
// Participants
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Guest,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Guest => "guest",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which external services a device can play.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    #[serde(default)]
    pub supports_spotify: bool,
    #[serde(default)]
    pub supports_youtube: bool,
}

impl Capabilities {
    pub fn only(source: Source) -> Self {
        match source {
            Source::Spotify => Self {
                supports_spotify: true,
                supports_youtube: false,
            },
            Source::Youtube => Self {
                supports_spotify: false,
                supports_youtube: true,
            },
        }
    }

    pub fn supports(&self, source: Source) -> bool {
        match source {
            Source::Spotify => self.supports_spotify,
            Source::Youtube => self.supports_youtube,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    pub role: Role,
    #[serde(default)]
    pub flags: Capabilities,
}

impl Participant {
    pub fn host(user_id: impl Into<String>, flags: Capabilities) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Host,
            flags,
        }
    }

    pub fn guest(user_id: impl Into<String>, flags: Capabilities) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Guest,
            flags,
        }
    }

    pub fn is_host(&self) -> bool {
        self.role == Role::Host
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Spotify,
    Youtube,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spotify => "spotify",
            Self::Youtube => "youtube",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spotify" => Ok(Self::Spotify),
            "youtube" => Ok(Self::Youtube),
            other => Err(format!("unknown source '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackMetadata {
    pub title: String,
    pub artist: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl TrackMetadata {
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            ..Default::default()
        }
    }
}

/// One item of the synchronized queue. `seq` orders entries by insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub id: String,
    pub source: Source,
    pub uri: String,
    #[serde(default)]
    pub metadata: TrackMetadata,
    #[serde(default)]
    pub seq: u64,
}

/// A track a participant wants to add. Id and seq are assigned on insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub source: Source,
    pub uri: String,
    pub metadata: TrackMetadata,
}

impl NewEntry {
    pub fn new(source: Source, uri: impl Into<String>, metadata: TrackMetadata) -> Self {
        Self {
            source,
            uri: uri.into(),
            metadata,
        }
    }
}

/// Identifies an entry for removal, either by id or by its track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "camelCase")]
pub enum EntryRef {
    Id { id: String },
    Track { source: Source, uri: String },
}

impl EntryRef {
    pub fn id(id: impl Into<String>) -> Self {
        Self::Id { id: id.into() }
    }

    pub fn track(source: Source, uri: impl Into<String>) -> Self {
        Self::Track {
            source,
            uri: uri.into(),
        }
    }

    pub fn matches(&self, entry: &QueueEntry) -> bool {
        match self {
            Self::Id { id } => entry.id == *id,
            Self::Track { source, uri } => entry.source == *source && entry.uri == *uri,
        }
    }
}

// ---------------------------------------------------------------------------
// WebRTC
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCapabilitiesPayload {
    pub session_id: String,
    pub user_id: String,
    pub role: Role,
    pub flags: Capabilities,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddToQueuePayload {
    pub session_id: String,
    pub entry: QueueEntry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveFromQueuePayload {
    pub session_id: String,
    pub entry_ref: EntryRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueUpdatePayload {
    pub queue: Vec<QueueEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueErrorPayload {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferPayload {
    pub session_id: String,
    pub offer: SessionDescription,
    pub to: String,
    pub from: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerPayload {
    pub session_id: String,
    pub answer: SessionDescription,
    pub to: String,
    pub from: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidatePayload {
    pub session_id: String,
    pub candidate: IceCandidate,
    pub to: String,
    pub from: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartStreamToPayload {
    pub from_user_id: String,
    pub to_user_id: String,
}
