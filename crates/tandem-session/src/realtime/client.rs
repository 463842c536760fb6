//! Public handle for a realtime channel.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tandem_common::ChannelError;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::connection::{connection_loop, LoopContext};
use super::dispatch::{Dispatcher, Subscription};
use super::transport::Connector;
use super::types::{ChannelCommand, ChannelSettings, ChannelState, Envelope};
use crate::protocol::events;

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Handle for one realtime channel. Cheap to clone; all clones share the
/// same background connection.
///
/// Sends made while the channel is reconnecting are buffered and flushed,
/// in order, once a connection is back up.
#[derive(Clone)]
pub struct ChannelClient {
    command_tx: mpsc::Sender<ChannelCommand>,
    dispatcher: Dispatcher,
    state_rx: watch::Receiver<ChannelState>,
    cancel: CancellationToken,
}

impl ChannelClient {
    /// Start the background connection. Must be called inside a tokio runtime.
    pub fn connect(settings: ChannelSettings, connector: Arc<dyn Connector>) -> Self {
        let (command_tx, command_rx) = mpsc::channel(256);
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);
        let dispatcher = Dispatcher::new();
        let cancel = CancellationToken::new();

        tokio::spawn(connection_loop(LoopContext {
            settings,
            connector,
            dispatcher: dispatcher.clone(),
            state_tx,
            command_rx,
            cancel: cancel.clone(),
        }));

        Self {
            command_tx,
            dispatcher,
            state_rx,
            cancel,
        }
    }

    /// Send one event. Fails only once the channel has been shut down.
    pub async fn send(&self, event: &str, payload: Value) -> Result<(), ChannelError> {
        if self.cancel.is_cancelled() || *self.state_rx.borrow() == ChannelState::Failed {
            return Err(ChannelError::Closed);
        }
        self.command_tx
            .send(ChannelCommand::Send(Envelope::new(event, payload)))
            .await
            .map_err(|_| ChannelError::Closed)
    }

    pub async fn send_json<T: Serialize>(&self, event: &str, payload: &T) -> Result<(), ChannelError> {
        let value =
            serde_json::to_value(payload).map_err(|e| ChannelError::Malformed(e.to_string()))?;
        self.send(event, value).await
    }

    /// Register a handler for `event`. Lifecycle events (`connected`,
    /// `disconnected`, `reconnecting`, `error`) are delivered the same way.
    pub fn on(&self, event: &str) -> Subscription {
        self.dispatcher.subscribe(event)
    }

    pub fn state(&self) -> watch::Receiver<ChannelState> {
        self.state_rx.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state_rx.borrow().is_connected()
    }

    /// Join a session. The id is re-sent automatically after every reconnect.
    pub async fn join_session(&self, session_id: &str) -> Result<(), ChannelError> {
        self.send(events::JOIN_SESSION, json!({ "sessionId": session_id }))
            .await
    }

    pub async fn leave_session(&self, session_id: &str) -> Result<(), ChannelError> {
        self.send(events::LEAVE_SESSION, json!({ "sessionId": session_id }))
            .await
    }

    /// Close the connection and stop reconnecting.
    pub async fn disconnect(&self) {
        let _ = self.command_tx.try_send(ChannelCommand::Disconnect);
        self.cancel.cancel();
    }

    /// Inject an inbound event as if it came from the server.
    #[cfg(test)]
    pub(crate) fn inject(&self, event: &str, payload: Value) -> usize {
        self.dispatcher.dispatch(event, payload)
    }
}

impl std::fmt::Debug for ChannelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelClient")
            .field("state", &*self.state_rx.borrow())
            .finish()
    }
}
