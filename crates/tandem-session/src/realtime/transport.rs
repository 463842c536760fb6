//! Transports behind the channel client.
//!
//! A [`Connector`] opens one [`Connection`]: a sink of outbound text frames
//! and a stream of inbound ones. The connection loop does not care which
//! transport produced it.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tandem_common::ChannelError;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::debug;

use super::types::TransportMode;

/// Inbound frame from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    /// The server closed the connection deliberately.
    Close,
}

pub type FrameSink = Pin<Box<dyn Sink<String, Error = ChannelError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Inbound, ChannelError>> + Send>>;

pub struct Connection {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, endpoint: &str, mode: TransportMode) -> Result<Connection, ChannelError>;
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, endpoint: &str, _mode: TransportMode) -> Result<Connection, ChannelError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(endpoint)
            .await
            .map_err(|e| ChannelError::ConnectFailed(e.to_string()))?;
        let (ws_write, ws_read) = ws_stream.split();

        let sink = ws_write
            .sink_map_err(|e| ChannelError::Transport(e.to_string()))
            .with(|text: String| {
                futures_util::future::ready(Ok::<_, ChannelError>(WsMessage::Text(text.into())))
            });

        let stream = ws_read.filter_map(|msg| async move {
            match msg {
                Ok(WsMessage::Text(text)) => Some(Ok(Inbound::Text(text.to_string()))),
                Ok(WsMessage::Close(_)) => Some(Ok(Inbound::Close)),
                Ok(_) => None,
                Err(e) => Some(Err(ChannelError::Transport(e.to_string()))),
            }
        });

        Ok(Connection {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

// ---------------------------------------------------------------------------
// Long Polling
// ---------------------------------------------------------------------------

/// HTTP long-polling fallback.
///
/// `POST {base}/poll` opens a session and returns `{"sid": ...}`.
/// `GET {base}/poll?sid=` blocks until frames are available and returns
/// `{"frames": [...], "closed": bool}`. `POST {base}/poll?sid=` sends one frame.
#[derive(Debug, Clone)]
pub struct LongPollConnector {
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct PollHandshake {
    sid: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct PollBatch {
    frames: Vec<String>,
    closed: bool,
}

struct PollState {
    http: reqwest::Client,
    url: String,
    sid: String,
    buffered: VecDeque<Inbound>,
    done: bool,
}

impl LongPollConnector {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Default for LongPollConnector {
    fn default() -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(40))
            .build()
            .unwrap_or_default();
        Self::new(http)
    }
}

async fn poll_once(state: &PollState) -> Result<PollBatch, ChannelError> {
    let response = state
        .http
        .get(&state.url)
        .query(&[("sid", state.sid.as_str())])
        .send()
        .await
        .map_err(|e| ChannelError::Transport(e.to_string()))?;

    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
        return Ok(PollBatch {
            frames: Vec::new(),
            closed: true,
        });
    }
    if !status.is_success() {
        return Err(ChannelError::Transport(format!("poll returned HTTP {status}")));
    }
    response
        .json::<PollBatch>()
        .await
        .map_err(|e| ChannelError::Malformed(e.to_string()))
}

#[async_trait]
impl Connector for LongPollConnector {
    async fn open(&self, endpoint: &str, _mode: TransportMode) -> Result<Connection, ChannelError> {
        let url = format!("{}/poll", endpoint.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|e| ChannelError::ConnectFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ChannelError::ConnectFailed(format!(
                "poll handshake returned HTTP {}",
                response.status()
            )));
        }
        let PollHandshake { sid } = response
            .json()
            .await
            .map_err(|e| ChannelError::Malformed(e.to_string()))?;
        debug!(sid = %sid, "Long-poll session opened");

        let state = PollState {
            http: self.http.clone(),
            url: url.clone(),
            sid: sid.clone(),
            buffered: VecDeque::new(),
            done: false,
        };
        let stream = futures_util::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(frame) = state.buffered.pop_front() {
                    return Some((Ok(frame), state));
                }
                if state.done {
                    return None;
                }
                match poll_once(&state).await {
                    Ok(batch) => {
                        state
                            .buffered
                            .extend(batch.frames.into_iter().map(Inbound::Text));
                        if batch.closed {
                            state.buffered.push_back(Inbound::Close);
                            state.done = true;
                        }
                    }
                    Err(e) => {
                        state.done = true;
                        return Some((Err(e), state));
                    }
                }
            }
        });

        let http = self.http.clone();
        let sink = futures_util::sink::unfold(
            (http, url, sid),
            |(http, url, sid), text: String| async move {
                let response = http
                    .post(&url)
                    .query(&[("sid", sid.as_str())])
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(text)
                    .send()
                    .await
                    .map_err(|e| ChannelError::Transport(e.to_string()))?;
                if !response.status().is_success() {
                    return Err(ChannelError::Transport(format!(
                        "poll send returned HTTP {}",
                        response.status()
                    )));
                }
                Ok((http, url, sid))
            },
        );

        Ok(Connection {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

// ---------------------------------------------------------------------------
// Default
// ---------------------------------------------------------------------------

/// Picks the WebSocket or long-poll connector by transport mode.
#[derive(Debug, Clone, Default)]
pub struct DefaultConnector {
    websocket: WebSocketConnector,
    long_poll: LongPollConnector,
}

#[async_trait]
impl Connector for DefaultConnector {
    async fn open(&self, endpoint: &str, mode: TransportMode) -> Result<Connection, ChannelError> {
        match mode {
            TransportMode::WebSocket => self.websocket.open(endpoint, mode).await,
            TransportMode::LongPoll => self.long_poll.open(endpoint, mode).await,
        }
    }
}
