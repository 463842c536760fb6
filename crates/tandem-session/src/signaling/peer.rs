//! Seams to the media engine.
//!
//! The coordinator never touches audio. It drives a [`PeerConnection`]
//! produced by a [`PeerConnectionFactory`] and hands streams between the
//! connection, the guest's [`CaptureSource`] and the host's [`AudioSink`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tandem_config::IceServerConfig;
use tokio::sync::mpsc;

use crate::protocol::{IceCandidate, SessionDescription};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl From<&IceServerConfig> for IceServer {
    fn from(config: &IceServerConfig) -> Self {
        Self {
            url: config.url.clone(),
            username: config.username.clone(),
            credential: config.credential.clone(),
        }
    }
}

/// Opaque handle to an audio stream owned by the media engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStream {
    pub id: String,
    pub tracks: Vec<String>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tracks: Vec::new(),
        }
    }
}

/// Callbacks from a live connection.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    LocalCandidate(IceCandidate),
    RemoteStream(MediaStream),
    Connected,
    Disconnected,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct PeerError(pub String);

#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Must be called before `create_offer` on the offering side.
    async fn add_stream(&self, stream: MediaStream) -> Result<(), PeerError>;
    /// Create an offer and apply it as the local description.
    async fn create_offer(&self) -> Result<SessionDescription, PeerError>;
    /// Create an answer and apply it as the local description.
    async fn create_answer(&self) -> Result<SessionDescription, PeerError>;
    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), PeerError>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError>;
    async fn close(&self);
}

#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(
        &self,
        peer_id: &str,
        ice_servers: &[IceServer],
    ) -> Result<(Arc<dyn PeerConnection>, mpsc::UnboundedReceiver<PeerEvent>), PeerError>;
}

/// The guest's microphone or system-audio capture.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    async fn capture(&self) -> Result<MediaStream, PeerError>;
}

/// Where the host plays guest audio.
pub trait AudioSink: Send + Sync {
    fn attach(&self, peer_id: &str, stream: MediaStream);
    fn detach(&self, peer_id: &str);
}
