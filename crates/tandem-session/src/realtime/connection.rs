//! Background connection loop with reconnect and transport downgrade.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tandem_common::ChannelError;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::dispatch::Dispatcher;
use super::transport::{Connection, Connector, FrameSink, Inbound};
use super::types::{ChannelCommand, ChannelSettings, ChannelState, Envelope, TransportMode};
use crate::protocol::events;

/// How a live connection ended.
enum ConnectionEnd {
    /// Local disconnect requested.
    Cancelled,
    /// The server closed the connection deliberately.
    ServerClosed,
    Failed(ChannelError),
}

pub(crate) struct LoopContext {
    pub(crate) settings: ChannelSettings,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) state_tx: watch::Sender<ChannelState>,
    pub(crate) command_rx: mpsc::Receiver<ChannelCommand>,
    pub(crate) cancel: CancellationToken,
}

impl LoopContext {
    fn set_state(&self, state: ChannelState) {
        self.state_tx.send_replace(state);
    }

    fn emit(&self, event: &str, payload: serde_json::Value) {
        self.dispatcher.dispatch(event, payload);
    }

    fn emit_error(&self, err: &ChannelError, terminal: bool) {
        self.emit(
            events::ERROR,
            json!({ "message": err.to_string(), "terminal": terminal }),
        );
    }
}

// ---------------------------------------------------------------------------
// Connection Loop
// ---------------------------------------------------------------------------

pub(crate) async fn connection_loop(mut ctx: LoopContext) {
    let name = ctx.settings.name.clone();
    let mut transport = ctx.settings.initial_transport;
    // Failed connect attempts on the current transport.
    let mut failures: u32 = 0;
    let mut last_session: Option<String> = None;
    let mut ever_connected = false;

    loop {
        if ctx.cancel.is_cancelled() {
            break;
        }
        if !ever_connected && failures == 0 {
            ctx.set_state(ChannelState::Connecting);
        }

        let endpoint = ctx.settings.endpoint_for(transport).to_string();
        info!(channel = %name, transport = %transport, endpoint = %endpoint, "Connecting");

        let attempt = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            result = tokio::time::timeout(
                ctx.settings.connect_timeout,
                ctx.connector.open(&endpoint, transport),
            ) => result,
        };

        match attempt {
            Ok(Ok(connection)) => {
                failures = 0;
                ctx.set_state(ChannelState::Connected { transport });
                info!(channel = %name, transport = %transport, "Connected");

                let rejoin = last_session.clone();
                ctx.emit(
                    events::CONNECTED,
                    json!({ "transport": transport.as_str(), "reconnected": ever_connected }),
                );
                ever_connected = true;

                let end = run_connection(&mut ctx, connection, rejoin, &mut last_session).await;
                match end {
                    ConnectionEnd::Cancelled => {
                        ctx.emit(events::DISCONNECTED, json!({ "reason": "local" }));
                        break;
                    }
                    ConnectionEnd::ServerClosed => {
                        info!(channel = %name, "Server closed connection");
                        ctx.emit(events::DISCONNECTED, json!({ "reason": "server" }));
                        let delay = ctx.settings.server_close_delay;
                        ctx.set_state(ChannelState::Reconnecting {
                            attempt: 1,
                            transport,
                        });
                        ctx.emit(
                            events::RECONNECTING,
                            json!({
                                "attempt": 1,
                                "delayMs": delay.as_millis() as u64,
                                "transport": transport.as_str(),
                            }),
                        );
                        tokio::select! {
                            _ = ctx.cancel.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                        continue;
                    }
                    ConnectionEnd::Failed(e) => {
                        warn!(channel = %name, error = %e, "Connection lost");
                        ctx.emit(
                            events::DISCONNECTED,
                            json!({ "reason": "error", "message": e.to_string() }),
                        );
                    }
                }
            }
            Ok(Err(e)) => {
                failures += 1;
                error!(channel = %name, transport = %transport, failures, error = %e, "Failed to connect");
                ctx.emit_error(&e, false);
            }
            Err(_elapsed) => {
                failures += 1;
                error!(
                    channel = %name,
                    transport = %transport,
                    failures,
                    "Connection timed out after {:?}", ctx.settings.connect_timeout
                );
                ctx.emit_error(&ChannelError::Timeout, false);
            }
        }

        if ctx.settings.policy.is_exhausted(failures) {
            match transport.downgrade() {
                Some(next) => {
                    warn!(channel = %name, from = %transport, to = %next, "Downgrading transport");
                    transport = next;
                    failures = 0;
                }
                None => {
                    let err = ChannelError::ReconnectExhausted { attempts: failures };
                    error!(channel = %name, error = %err, "Giving up");
                    ctx.set_state(ChannelState::Failed);
                    ctx.emit_error(&err, true);
                    return;
                }
            }
        }

        // Capped exponential backoff. A dropped live connection waits the
        // initial delay like a first failure.
        let attempt = failures.max(1);
        let delay = ctx.settings.policy.delay_for(attempt);
        ctx.set_state(ChannelState::Reconnecting { attempt, transport });
        ctx.emit(
            events::RECONNECTING,
            json!({
                "attempt": attempt,
                "delayMs": delay.as_millis() as u64,
                "transport": transport.as_str(),
            }),
        );
        info!(channel = %name, attempt, "Reconnecting in {:?}", delay);
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    deliver_leftovers(&mut ctx, transport).await;
    ctx.set_state(ChannelState::Disconnected);
    debug!(channel = %name, "Connection loop stopped");
}

/// Sends still queued when a disconnect lands outside a live connection,
/// such as the `leave-session` queued just before it, get one bounded
/// connect-and-flush.
async fn deliver_leftovers(ctx: &mut LoopContext, transport: TransportMode) {
    let mut pending = Vec::new();
    while let Ok(command) = ctx.command_rx.try_recv() {
        if let ChannelCommand::Send(envelope) = command {
            pending.push(envelope);
        }
    }
    if pending.is_empty() {
        return;
    }

    let name = &ctx.settings.name;
    let endpoint = ctx.settings.endpoint_for(transport).to_string();
    let opened = tokio::time::timeout(
        ctx.settings.connect_timeout,
        ctx.connector.open(&endpoint, transport),
    )
    .await;
    let Connection { mut sink, .. } = match opened {
        Ok(Ok(connection)) => connection,
        Ok(Err(e)) => {
            warn!(channel = %name, dropped = pending.len(), error = %e, "Could not deliver queued sends");
            return;
        }
        Err(_elapsed) => {
            warn!(channel = %name, dropped = pending.len(), "Timed out delivering queued sends");
            return;
        }
    };
    for envelope in &pending {
        if let Err(e) = write_envelope(&mut sink, envelope).await {
            warn!(channel = %name, error = %e, "Queued send failed");
            break;
        }
    }
    let _ = sink.close().await;
    debug!(channel = %name, count = pending.len(), "Delivered queued sends before stopping");
}

// ---------------------------------------------------------------------------
// Live Connection
// ---------------------------------------------------------------------------

async fn run_connection(
    ctx: &mut LoopContext,
    connection: Connection,
    rejoin: Option<String>,
    last_session: &mut Option<String>,
) -> ConnectionEnd {
    let Connection {
        mut sink,
        mut stream,
    } = connection;

    if let Some(session_id) = rejoin {
        info!(channel = %ctx.settings.name, session_id = %session_id, "Re-joining session");
        let envelope = Envelope::new(events::JOIN_SESSION, json!({ "sessionId": session_id }));
        if let Err(e) = write_envelope(&mut sink, &envelope).await {
            return ConnectionEnd::Failed(e);
        }
    }

    let mut heartbeat = tokio::time::interval(ctx.settings.heartbeat_interval);
    // First tick fires immediately.
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => {
                flush_pending(ctx, &mut sink, last_session).await;
                let _ = sink.close().await;
                return ConnectionEnd::Cancelled;
            }
            _ = heartbeat.tick() => {
                let ping = Envelope::new(events::PING, json!({}));
                if let Err(e) = write_envelope(&mut sink, &ping).await {
                    return ConnectionEnd::Failed(e);
                }
            }
            command = ctx.command_rx.recv() => match command {
                Some(ChannelCommand::Send(envelope)) => {
                    track_session(&envelope, last_session);
                    if let Err(e) = write_envelope(&mut sink, &envelope).await {
                        return ConnectionEnd::Failed(e);
                    }
                }
                Some(ChannelCommand::Disconnect) | None => {
                    let _ = sink.close().await;
                    return ConnectionEnd::Cancelled;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Inbound::Text(text))) => match serde_json::from_str::<Envelope>(&text) {
                    Ok(envelope) => {
                        ctx.dispatcher.dispatch(&envelope.event, envelope.payload);
                    }
                    Err(e) => debug!(channel = %ctx.settings.name, error = %e, "Unrecognized frame"),
                },
                Some(Ok(Inbound::Close)) => return ConnectionEnd::ServerClosed,
                Some(Err(e)) => return ConnectionEnd::Failed(e),
                None => return ConnectionEnd::Failed(ChannelError::Closed),
            },
        }
    }
}

async fn write_envelope(
    sink: &mut FrameSink,
    envelope: &Envelope,
) -> Result<(), ChannelError> {
    let text =
        serde_json::to_string(envelope).map_err(|e| ChannelError::Malformed(e.to_string()))?;
    sink.send(text).await
}

/// Write out sends queued before a local disconnect, such as `leave-session`.
async fn flush_pending(ctx: &mut LoopContext, sink: &mut FrameSink, last_session: &mut Option<String>) {
    while let Ok(ChannelCommand::Send(envelope)) = ctx.command_rx.try_recv() {
        track_session(&envelope, last_session);
        if write_envelope(sink, &envelope).await.is_err() {
            break;
        }
    }
}

/// Remember which session to re-join after a reconnect.
fn track_session(envelope: &Envelope, last_session: &mut Option<String>) {
    match envelope.event.as_str() {
        events::JOIN_SESSION => {
            *last_session = envelope
                .payload
                .get("sessionId")
                .and_then(|v| v.as_str())
                .map(str::to_string);
        }
        events::LEAVE_SESSION => *last_session = None,
        _ => {}
    }
}
