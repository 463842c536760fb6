use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::PlayerError;

/// What the external player will play next, as track URIs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalQueue {
    pub currently_playing: Option<String>,
    pub queue: Vec<String>,
}

impl ExternalQueue {
    pub fn contains(&self, uri: &str) -> bool {
        self.currently_playing.as_deref() == Some(uri) || self.queue.iter().any(|u| u == uri)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub volume_percent: Option<u8>,
    #[serde(default, rename = "type")]
    pub kind: String,
}

/// Operations the session needs from the host's music service.
#[async_trait]
pub trait PlayerApi: Send + Sync {
    async fn current_queue(&self) -> Result<ExternalQueue, PlayerError>;

    async fn enqueue(&self, uri: &str) -> Result<(), PlayerError>;

    async fn skip_next(&self) -> Result<(), PlayerError>;

    async fn transfer_playback(&self, device_id: &str, play: bool) -> Result<(), PlayerError>;

    async fn set_playing(&self, playing: bool) -> Result<(), PlayerError>;

    async fn set_volume(&self, percent: u8) -> Result<(), PlayerError>;

    async fn list_devices(&self) -> Result<Vec<Device>, PlayerError>;
}
