//! In-memory server used by tests across the crate.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tandem_common::ChannelError;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::transport::{Connection, Connector, Inbound};
use super::types::{ChannelSettings, Envelope, ReconnectPolicy, TransportMode};

type InboundTx = mpsc::UnboundedSender<Result<Inbound, ChannelError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Accept,
    Fail,
}

#[derive(Default)]
struct Shared {
    script: VecDeque<Outcome>,
    fail_by_default: bool,
    attempts: Vec<(Instant, TransportMode)>,
    current: Option<InboundTx>,
}

/// Connector whose "server" is driven by the test.
#[derive(Clone)]
pub(crate) struct MemoryConnector {
    shared: Arc<Mutex<Shared>>,
    sent_tx: mpsc::UnboundedSender<Envelope>,
}

/// Test side of a [`MemoryConnector`].
pub(crate) struct MemoryServer {
    shared: Arc<Mutex<Shared>>,
    sent_rx: mpsc::UnboundedReceiver<Envelope>,
}

pub(crate) fn memory_pair() -> (Arc<MemoryConnector>, MemoryServer) {
    let shared = Arc::new(Mutex::new(Shared::default()));
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    (
        Arc::new(MemoryConnector {
            shared: Arc::clone(&shared),
            sent_tx,
        }),
        MemoryServer { shared, sent_rx },
    )
}

/// Settings with a long heartbeat so pings don't clutter assertions.
pub(crate) fn test_settings() -> ChannelSettings {
    ChannelSettings {
        name: "test".into(),
        endpoint: "ws://memory/session".into(),
        poll_endpoint: "http://memory/session".into(),
        connect_timeout: Duration::from_secs(10),
        heartbeat_interval: Duration::from_secs(3600),
        server_close_delay: Duration::from_millis(1000),
        policy: ReconnectPolicy::default(),
        initial_transport: TransportMode::WebSocket,
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, _endpoint: &str, mode: TransportMode) -> Result<Connection, ChannelError> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        {
            let mut shared = self.shared.lock().unwrap();
            shared.attempts.push((Instant::now(), mode));
            let outcome = shared.script.pop_front().unwrap_or(if shared.fail_by_default {
                Outcome::Fail
            } else {
                Outcome::Accept
            });
            if outcome == Outcome::Fail {
                return Err(ChannelError::ConnectFailed("refused".into()));
            }
            shared.current = Some(inbound_tx);
        }

        let stream = futures_util::stream::unfold(inbound_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        let sink = futures_util::sink::unfold(self.sent_tx.clone(), |tx, text: String| async move {
            let envelope: Envelope =
                serde_json::from_str(&text).map_err(|e| ChannelError::Malformed(e.to_string()))?;
            let _ = tx.send(envelope);
            Ok::<_, ChannelError>(tx)
        });
        Ok(Connection {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

impl MemoryServer {
    pub(crate) fn script(&self, outcomes: impl IntoIterator<Item = Outcome>) {
        self.shared.lock().unwrap().script.extend(outcomes);
    }

    pub(crate) fn fail_by_default(&self, fail: bool) {
        self.shared.lock().unwrap().fail_by_default = fail;
    }

    pub(crate) fn attempts(&self) -> Vec<(Instant, TransportMode)> {
        self.shared.lock().unwrap().attempts.clone()
    }

    fn push_frame(&self, frame: Result<Inbound, ChannelError>) -> bool {
        match &self.shared.lock().unwrap().current {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    pub(crate) fn push(&self, event: &str, payload: Value) -> bool {
        let text = serde_json::to_string(&Envelope::new(event, payload)).unwrap();
        self.push_frame(Ok(Inbound::Text(text)))
    }

    pub(crate) fn close(&self) -> bool {
        self.push_frame(Ok(Inbound::Close))
    }

    pub(crate) fn drop_connection(&self) -> bool {
        let sent = self.push_frame(Err(ChannelError::Transport("reset by peer".into())));
        self.shared.lock().unwrap().current = None;
        sent
    }

    pub(crate) async fn next_sent(&mut self) -> Envelope {
        tokio::time::timeout(Duration::from_secs(30), self.sent_rx.recv())
            .await
            .expect("timed out waiting for an outbound envelope")
            .expect("connector dropped")
    }

    /// Next outbound envelope with the given event name, skipping others.
    pub(crate) async fn next_event(&mut self, event: &str) -> Envelope {
        loop {
            let envelope = self.next_sent().await;
            if envelope.event == event {
                return envelope;
            }
        }
    }

    pub(crate) fn drain_sent(&mut self) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(envelope) = self.sent_rx.try_recv() {
            out.push(envelope);
        }
        out
    }
}

/// Wait until `rx` satisfies `pred`.
pub(crate) async fn wait_for<T, F>(rx: &mut tokio::sync::watch::Receiver<T>, pred: F) -> T
where
    T: Clone,
    F: Fn(&T) -> bool,
{
    tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|v| pred(v)))
        .await
        .expect("timed out waiting for state")
        .expect("watch sender dropped")
        .clone()
}
