//! Spotify Web API implementation of [`PlayerApi`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tandem_common::AuthExpired;
use tandem_config::PlayerConfig;
use tracing::debug;

use super::api::{Device, ExternalQueue, PlayerApi};
use super::store::LocalStore;
use super::PlayerError;

/// Used when a 429 carries no usable `Retry-After` header.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

pub struct HttpPlayerClient {
    http: reqwest::Client,
    api_base: String,
    store: Arc<dyn LocalStore>,
}

#[derive(Deserialize)]
struct TrackRef {
    uri: String,
}

#[derive(Deserialize)]
struct QueueResponse {
    #[serde(default)]
    currently_playing: Option<TrackRef>,
    #[serde(default)]
    queue: Vec<TrackRef>,
}

#[derive(Deserialize)]
struct DevicesResponse {
    #[serde(default)]
    devices: Vec<Device>,
}

impl HttpPlayerClient {
    pub fn new(config: &PlayerConfig, store: Arc<dyn LocalStore>) -> Result<Self, PlayerError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| PlayerError::Network(e.to_string()))?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            store,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, PlayerError> {
        let token = self.store.access_token().ok_or(AuthExpired)?;
        Ok(request.bearer_auth(token))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, PlayerError> {
        let response = self
            .authorized(request)?
            .send()
            .await
            .map_err(|e| PlayerError::Network(e.to_string()))?;
        check_status(response).await
    }
}

/// Map the service's status codes onto [`PlayerError`].
async fn check_status(response: Response) -> Result<Response, PlayerError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(AuthExpired.into());
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(PlayerError::RetryAfter(retry_after(response.headers())));
    }
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        let message = text.chars().take(200).collect::<String>();
        return Err(PlayerError::Http {
            status: status.as_u16(),
            message,
        });
    }
    Ok(response)
}

/// `Retry-After` in whole seconds.
pub(crate) fn retry_after(headers: &HeaderMap) -> Duration {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

fn parse_queue(body: QueueResponse) -> ExternalQueue {
    ExternalQueue {
        currently_playing: body.currently_playing.map(|t| t.uri),
        queue: body.queue.into_iter().map(|t| t.uri).collect(),
    }
}

#[async_trait]
impl PlayerApi for HttpPlayerClient {
    async fn current_queue(&self) -> Result<ExternalQueue, PlayerError> {
        let response = self.send(self.http.get(self.url("/me/player/queue"))).await?;
        let body: QueueResponse = response
            .json()
            .await
            .map_err(|e| PlayerError::Parse(e.to_string()))?;
        let queue = parse_queue(body);
        debug!(queued = queue.queue.len(), "Fetched external queue");
        Ok(queue)
    }

    async fn enqueue(&self, uri: &str) -> Result<(), PlayerError> {
        let request = self
            .http
            .post(self.url("/me/player/queue"))
            .query(&[("uri", uri)]);
        self.send(request).await?;
        debug!(uri, "Enqueued on external player");
        Ok(())
    }

    async fn skip_next(&self) -> Result<(), PlayerError> {
        self.send(self.http.post(self.url("/me/player/next"))).await?;
        Ok(())
    }

    async fn transfer_playback(&self, device_id: &str, play: bool) -> Result<(), PlayerError> {
        let request = self
            .http
            .put(self.url("/me/player"))
            .json(&json!({ "device_ids": [device_id], "play": play }));
        self.send(request).await?;
        Ok(())
    }

    async fn set_playing(&self, playing: bool) -> Result<(), PlayerError> {
        let path = if playing {
            "/me/player/play"
        } else {
            "/me/player/pause"
        };
        self.send(self.http.put(self.url(path))).await?;
        Ok(())
    }

    async fn set_volume(&self, percent: u8) -> Result<(), PlayerError> {
        let request = self
            .http
            .put(self.url("/me/player/volume"))
            .query(&[("volume_percent", percent.min(100).to_string())]);
        self.send(request).await?;
        Ok(())
    }

    async fn list_devices(&self) -> Result<Vec<Device>, PlayerError> {
        let response = self
            .send(self.http.get(self.url("/me/player/devices")))
            .await?;
        let body: DevicesResponse = response
            .json()
            .await
            .map_err(|e| PlayerError::Parse(e.to_string()))?;
        Ok(body.devices)
    }
}
