//! Signaling coordinator.
//!
//! A single task owns every pair's [`Exchange`] and peer connection. It
//! reacts to three sources: signaling messages from the session channel,
//! commands from the [`SignalingCoordinator`] handle, and callbacks from
//! the peer connections (tagged with the generation that created them so
//! stale callbacks from a reset pair are dropped).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tandem_common::SignalingError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::exchange::Exchange;
use super::peer::{AudioSink, CaptureSource, MediaStream, PeerConnection, PeerConnectionFactory, PeerEvent};
use super::types::{ExchangeState, SignalingEvent, SignalingSettings};
use crate::protocol::{
    events, AnswerPayload, IceCandidate, IceCandidatePayload, OfferPayload, Role,
    SessionDescription, StartStreamToPayload,
};
use crate::realtime::{ChannelClient, Subscription};

/// Collaborators supplied by the platform layer.
#[derive(Clone)]
pub struct SignalingDeps {
    pub factory: Arc<dyn PeerConnectionFactory>,
    /// Required on guests.
    pub capture: Option<Arc<dyn CaptureSource>>,
    /// Required on hosts.
    pub sink: Option<Arc<dyn AudioSink>>,
}

enum Command {
    ConnectToHost { host_id: String },
    ClosePair { peer_id: String },
    PairState {
        peer_id: String,
        reply: oneshot::Sender<Option<ExchangeState>>,
    },
    Shutdown,
}

enum Internal {
    Peer {
        peer_id: String,
        generation: u64,
        event: PeerEvent,
    },
    Timeout {
        peer_id: String,
        generation: u64,
    },
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

pub struct SignalingCoordinator {
    settings: SignalingSettings,
    channel: ChannelClient,
    command_tx: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl SignalingCoordinator {
    /// Subscribe to signaling events on `channel` and start the coordinator.
    pub fn start(
        channel: ChannelClient,
        settings: SignalingSettings,
        deps: SignalingDeps,
    ) -> (Self, mpsc::UnboundedReceiver<SignalingEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let inbox = Inbox {
            offers: channel.on(events::WEBRTC_OFFER),
            answers: channel.on(events::WEBRTC_ANSWER),
            candidates: channel.on(events::WEBRTC_ICE_CANDIDATE),
            start_stream: channel.on(events::START_STREAM_TO),
            commands: command_rx,
            internal: internal_rx,
        };
        let actor = Actor {
            settings: settings.clone(),
            deps,
            channel: channel.clone(),
            pairs: HashMap::new(),
            internal_tx,
            event_tx,
        };
        let task = tokio::spawn(actor.run(inbox));

        info!(
            user_id = %settings.local_id,
            role = %settings.role,
            "Signaling coordinator started"
        );
        (
            Self {
                settings,
                channel,
                command_tx,
                task,
            },
            event_rx,
        )
    }

    /// Guest: open a connection to the host. The guest always offers.
    pub fn connect_to_host(&self, host_id: &str) -> Result<(), SignalingError> {
        if self.settings.role != Role::Guest {
            return Err(SignalingError::RoleViolation(
                "only guests offer to the host".into(),
            ));
        }
        let _ = self.command_tx.send(Command::ConnectToHost {
            host_id: host_id.to_string(),
        });
        Ok(())
    }

    /// Host: ask a guest to start streaming to us.
    pub async fn invite_guest(&self, guest_id: &str) -> Result<(), SignalingError> {
        if self.settings.role != Role::Host {
            return Err(SignalingError::RoleViolation(
                "only the host invites guests".into(),
            ));
        }
        let payload = StartStreamToPayload {
            from_user_id: self.settings.local_id.clone(),
            to_user_id: guest_id.to_string(),
        };
        self.channel
            .send_json(events::START_STREAM_TO, &payload)
            .await
            .map_err(|e| SignalingError::PeerConnection {
                peer: guest_id.to_string(),
                reason: e.to_string(),
            })
    }

    /// Close one pair. Other pairs and the channel are unaffected.
    pub fn close_pair(&self, peer_id: &str) {
        let _ = self.command_tx.send(Command::ClosePair {
            peer_id: peer_id.to_string(),
        });
    }

    /// Current state for `peer_id`, or `None` if no exchange exists.
    pub async fn pair_state(&self, peer_id: &str) -> Option<ExchangeState> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(Command::PairState {
                peer_id: peer_id.to_string(),
                reply,
            })
            .ok()?;
        rx.await.ok().flatten()
    }

    /// Close every pair and stop the coordinator.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(Command::Shutdown);
    }
}

impl Drop for SignalingCoordinator {
    fn drop(&mut self) {
        if self.command_tx.send(Command::Shutdown).is_err() {
            self.task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct Inbox {
    offers: Subscription,
    answers: Subscription,
    candidates: Subscription,
    start_stream: Subscription,
    commands: mpsc::UnboundedReceiver<Command>,
    internal: mpsc::UnboundedReceiver<Internal>,
}

struct Pair {
    exchange: Exchange,
    conn: Option<Arc<dyn PeerConnection>>,
    forwarder: Option<JoinHandle<()>>,
    timer: Option<JoinHandle<()>>,
    remote_stream: Option<MediaStream>,
    retries_used: u32,
}

impl Pair {
    fn new(exchange: Exchange) -> Self {
        Self {
            exchange,
            conn: None,
            forwarder: None,
            timer: None,
            remote_stream: None,
            retries_used: 0,
        }
    }

    /// Drop the connection and any timers. The exchange is left alone.
    async fn release(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        self.remote_stream = None;
        if let Some(conn) = self.conn.take() {
            conn.close().await;
        }
    }
}

enum Inbound {
    Offer(OfferPayload),
    Answer(AnswerPayload),
    Candidate(IceCandidatePayload),
}

impl Inbound {
    fn peer_id(&self) -> &str {
        match self {
            Self::Offer(p) => &p.from,
            Self::Answer(p) => &p.from,
            Self::Candidate(p) => &p.from,
        }
    }

    fn to(&self) -> &str {
        match self {
            Self::Offer(p) => &p.to,
            Self::Answer(p) => &p.to,
            Self::Candidate(p) => &p.to,
        }
    }
}

struct Actor {
    settings: SignalingSettings,
    deps: SignalingDeps,
    channel: ChannelClient,
    pairs: HashMap<String, Pair>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    event_tx: mpsc::UnboundedSender<SignalingEvent>,
}

impl Actor {
    async fn run(mut self, mut inbox: Inbox) {
        loop {
            tokio::select! {
                command = inbox.commands.recv() => {
                    match command {
                        Some(Command::Shutdown) | None => break,
                        Some(command) => self.on_command(command).await,
                    }
                }
                Some(payload) = inbox.offers.recv() => {
                    self.on_message(events::WEBRTC_OFFER, payload).await;
                }
                Some(payload) = inbox.answers.recv() => {
                    self.on_message(events::WEBRTC_ANSWER, payload).await;
                }
                Some(payload) = inbox.candidates.recv() => {
                    self.on_message(events::WEBRTC_ICE_CANDIDATE, payload).await;
                }
                Some(payload) = inbox.start_stream.recv() => {
                    self.on_start_stream(payload).await;
                }
                Some(internal) = inbox.internal.recv() => {
                    self.on_internal(internal).await;
                }
            }
        }

        for (peer_id, mut pair) in self.pairs.drain() {
            pair.release().await;
            if let Some(sink) = &self.deps.sink {
                sink.detach(&peer_id);
            }
        }
        debug!("Signaling coordinator stopped");
    }

    fn emit(&self, event: SignalingEvent) {
        let _ = self.event_tx.send(event);
    }

    fn emit_state(&self, peer_id: &str) {
        if let Some(pair) = self.pairs.get(peer_id) {
            self.emit(SignalingEvent::StateChanged {
                peer_id: peer_id.to_string(),
                state: pair.exchange.state(),
                generation: pair.exchange.generation(),
            });
        }
    }

    fn pair_mut(&mut self, peer_id: &str) -> &mut Pair {
        let settings = &self.settings;
        self.pairs.entry(peer_id.to_string()).or_insert_with(|| {
            Pair::new(Exchange::new(settings.role, &settings.local_id, peer_id))
        })
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::ConnectToHost { host_id } => {
                let pair = self.pair_mut(&host_id);
                if pair.exchange.state() == ExchangeState::Connected {
                    debug!(peer_id = %host_id, "Already connected to host");
                    return;
                }
                pair.release().await;
                pair.exchange.reset();
                pair.retries_used = 0;
                self.offer(&host_id).await;
            }
            Command::ClosePair { peer_id } => self.close(&peer_id).await,
            Command::PairState { peer_id, reply } => {
                let state = self.pairs.get(&peer_id).map(|p| p.exchange.state());
                let _ = reply.send(state);
            }
            Command::Shutdown => {}
        }
    }

    async fn close(&mut self, peer_id: &str) {
        let Some(mut pair) = self.pairs.remove(peer_id) else {
            return;
        };
        pair.release().await;
        pair.exchange.close();
        if let Some(sink) = &self.deps.sink {
            sink.detach(peer_id);
        }
        info!(peer_id = %peer_id, pair = %pair.exchange.pair(), "Peer pair closed");
        self.emit(SignalingEvent::StateChanged {
            peer_id: peer_id.to_string(),
            state: ExchangeState::Closed,
            generation: pair.exchange.generation(),
        });
    }

    /// Put the pair back to `Idle` under a new generation.
    async fn reset(&mut self, peer_id: &str, error: SignalingError) {
        warn!(peer_id = %peer_id, error = %error, "Resetting peer pair");
        if let Some(pair) = self.pairs.get_mut(peer_id) {
            pair.release().await;
            pair.exchange.reset();
        }
        if let Some(sink) = &self.deps.sink {
            sink.detach(peer_id);
        }
        self.emit(SignalingEvent::PairReset {
            peer_id: peer_id.to_string(),
            error,
        });
    }

    // -- connection setup ----------------------------------------------------

    /// Create a connection for the pair's current generation and forward
    /// its callbacks into the actor.
    async fn open_connection(&mut self, peer_id: &str) -> Result<Arc<dyn PeerConnection>, SignalingError> {
        let (conn, mut peer_rx) = self
            .deps
            .factory
            .create(peer_id, &self.settings.ice_servers)
            .await
            .map_err(|e| SignalingError::PeerConnection {
                peer: peer_id.to_string(),
                reason: e.to_string(),
            })?;

        let internal_tx = self.internal_tx.clone();
        let pair = self.pair_mut(peer_id);
        let generation = pair.exchange.generation();
        let id = peer_id.to_string();
        pair.forwarder = Some(tokio::spawn(async move {
            while let Some(event) = peer_rx.recv().await {
                let internal = Internal::Peer {
                    peer_id: id.clone(),
                    generation,
                    event,
                };
                if internal_tx.send(internal).is_err() {
                    break;
                }
            }
        }));
        pair.conn = Some(Arc::clone(&conn));
        Ok(conn)
    }

    fn arm_timeout(&mut self, peer_id: &str) {
        let timeout = self.settings.connect_timeout;
        let internal_tx = self.internal_tx.clone();
        let pair = self.pair_mut(peer_id);
        let generation = pair.exchange.generation();
        let id = peer_id.to_string();
        if let Some(old) = pair.timer.take() {
            old.abort();
        }
        pair.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = internal_tx.send(Internal::Timeout {
                peer_id: id,
                generation,
            });
        }));
    }

    /// Guest side: capture, create the offer, send it.
    async fn offer(&mut self, host_id: &str) {
        if let Err(e) = self.try_offer(host_id).await {
            self.reset(host_id, e).await;
        }
    }

    async fn try_offer(&mut self, host_id: &str) -> Result<(), SignalingError> {
        let peer_err = |e: super::peer::PeerError| SignalingError::PeerConnection {
            peer: host_id.to_string(),
            reason: e.to_string(),
        };

        let conn = self.open_connection(host_id).await?;
        if let Some(capture) = &self.deps.capture {
            let stream = capture.capture().await.map_err(peer_err)?;
            conn.add_stream(stream).await.map_err(peer_err)?;
        } else {
            warn!("No capture source, offering without local audio");
        }
        let offer = conn.create_offer().await.map_err(peer_err)?;
        self.pair_mut(host_id).exchange.on_local_offer()?;

        let payload = OfferPayload {
            session_id: self.settings.session_id.clone(),
            offer,
            to: host_id.to_string(),
            from: self.settings.local_id.clone(),
        };
        self.send(events::WEBRTC_OFFER, host_id, &payload).await?;
        self.arm_timeout(host_id);
        info!(peer_id = %host_id, "Sent offer to host");
        self.emit_state(host_id);
        Ok(())
    }

    async fn send<T: serde::Serialize>(&self, event: &str, peer_id: &str, payload: &T) -> Result<(), SignalingError> {
        self.channel
            .send_json(event, payload)
            .await
            .map_err(|e| SignalingError::PeerConnection {
                peer: peer_id.to_string(),
                reason: e.to_string(),
            })
    }

    // -- inbound signaling -----------------------------------------------------

    async fn on_start_stream(&mut self, payload: Value) {
        let request = match serde_json::from_value::<StartStreamToPayload>(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Malformed start-stream-to");
                return;
            }
        };
        if request.to_user_id != self.settings.local_id || self.settings.role != Role::Guest {
            return;
        }
        info!(host_id = %request.from_user_id, "Host asked us to stream");
        self.on_command(Command::ConnectToHost {
            host_id: request.from_user_id,
        })
        .await;
    }

    async fn on_message(&mut self, event: &str, payload: Value) {
        let inbound = match parse_inbound(event, payload.clone()) {
            Ok(inbound) => inbound,
            Err(reason) => {
                let peer = payload
                    .get("from")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                match peer {
                    Some(peer) if self.pairs.contains_key(&peer) => {
                        let error = SignalingError::Malformed {
                            peer: peer.clone(),
                            reason,
                        };
                        self.reset(&peer, error).await;
                    }
                    _ => warn!(event, reason = %reason, "Dropping malformed signaling message"),
                }
                return;
            }
        };
        if inbound.to() != self.settings.local_id {
            return;
        }

        let peer_id = inbound.peer_id().to_string();
        let result = match inbound {
            Inbound::Offer(p) => self.on_offer(&peer_id, p.offer).await,
            Inbound::Answer(p) => self.on_answer(&peer_id, p.answer).await,
            Inbound::Candidate(p) => self.on_candidate(&peer_id, p.candidate).await,
        };
        if let Err(error) = result {
            self.reset(&peer_id, error).await;
        }
    }

    /// Host side.
    async fn on_offer(&mut self, peer_id: &str, offer: SessionDescription) -> Result<(), SignalingError> {
        if self.settings.role != Role::Host {
            return Err(SignalingError::RoleViolation(format!(
                "guest received an offer from {peer_id}"
            )));
        }

        let state = self.pair_mut(peer_id).exchange.state();
        match state {
            ExchangeState::Connected => {
                warn!(peer_id = %peer_id, "Rejecting offer on a live connection");
                self.emit(SignalingEvent::Rejected {
                    peer_id: peer_id.to_string(),
                    error: SignalingError::OutOfOrder {
                        peer: peer_id.to_string(),
                        message: "offer".into(),
                        state: state.to_string(),
                    },
                });
                return Ok(());
            }
            ExchangeState::Idle => {}
            _ => {
                // A fresh offer mid-handshake means the guest started over.
                self.reset(
                    peer_id,
                    SignalingError::OutOfOrder {
                        peer: peer_id.to_string(),
                        message: "offer".into(),
                        state: state.to_string(),
                    },
                )
                .await;
            }
        }

        let peer_err = |e: super::peer::PeerError| SignalingError::PeerConnection {
            peer: peer_id.to_string(),
            reason: e.to_string(),
        };

        let conn = self.open_connection(peer_id).await?;
        self.pair_mut(peer_id).exchange.on_remote_offer()?;
        conn.set_remote_description(offer).await.map_err(peer_err)?;
        let buffered = self.pair_mut(peer_id).exchange.mark_remote_applied();
        for candidate in buffered {
            if let Err(e) = conn.add_ice_candidate(candidate).await {
                warn!(peer_id = %peer_id, error = %e, "Buffered candidate rejected");
            }
        }

        let answer = conn.create_answer().await.map_err(peer_err)?;
        self.pair_mut(peer_id).exchange.on_local_answer()?;
        let payload = AnswerPayload {
            session_id: self.settings.session_id.clone(),
            answer,
            to: peer_id.to_string(),
            from: self.settings.local_id.clone(),
        };
        self.send(events::WEBRTC_ANSWER, peer_id, &payload).await?;
        self.arm_timeout(peer_id);
        info!(peer_id = %peer_id, "Answered guest offer");
        self.emit_state(peer_id);
        Ok(())
    }

    /// Guest side.
    async fn on_answer(&mut self, peer_id: &str, answer: SessionDescription) -> Result<(), SignalingError> {
        let pair = self.pair_mut(peer_id);
        pair.exchange.on_remote_answer()?;
        let conn = pair.conn.clone().ok_or_else(|| SignalingError::UnknownPeer(peer_id.to_string()))?;

        conn.set_remote_description(answer)
            .await
            .map_err(|e| SignalingError::PeerConnection {
                peer: peer_id.to_string(),
                reason: e.to_string(),
            })?;
        let buffered = self.pair_mut(peer_id).exchange.mark_remote_applied();
        for candidate in buffered {
            if let Err(e) = conn.add_ice_candidate(candidate).await {
                warn!(peer_id = %peer_id, error = %e, "Buffered candidate rejected");
            }
        }
        debug!(peer_id = %peer_id, "Applied host answer");
        self.emit_state(peer_id);
        Ok(())
    }

    async fn on_candidate(&mut self, peer_id: &str, candidate: IceCandidate) -> Result<(), SignalingError> {
        let pair = self.pair_mut(peer_id);
        let Some(candidate) = pair.exchange.accept_candidate(candidate) else {
            debug!(peer_id = %peer_id, "Buffered early candidate");
            return Ok(());
        };
        if let Some(conn) = pair.conn.clone() {
            // ICE keeps running after connect; a bad candidate is not fatal.
            if let Err(e) = conn.add_ice_candidate(candidate).await {
                warn!(peer_id = %peer_id, error = %e, "Candidate rejected");
            }
        }
        Ok(())
    }

    // -- peer callbacks --------------------------------------------------------

    async fn on_internal(&mut self, internal: Internal) {
        match internal {
            Internal::Peer {
                peer_id,
                generation,
                event,
            } => {
                if !self.is_current(&peer_id, generation) {
                    return;
                }
                self.on_peer_event(&peer_id, event).await;
            }
            Internal::Timeout {
                peer_id,
                generation,
            } => {
                if !self.is_current(&peer_id, generation) {
                    return;
                }
                let connected = self
                    .pairs
                    .get(&peer_id)
                    .is_some_and(|p| p.exchange.state() == ExchangeState::Connected);
                if !connected {
                    self.on_establish_failed(&peer_id, SignalingError::Timeout(peer_id.clone()))
                        .await;
                }
            }
        }
    }

    fn is_current(&self, peer_id: &str, generation: u64) -> bool {
        self.pairs
            .get(peer_id)
            .is_some_and(|p| p.exchange.generation() == generation)
    }

    async fn on_peer_event(&mut self, peer_id: &str, event: PeerEvent) {
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                let payload = IceCandidatePayload {
                    session_id: self.settings.session_id.clone(),
                    candidate,
                    to: peer_id.to_string(),
                    from: self.settings.local_id.clone(),
                };
                if let Err(e) = self.send(events::WEBRTC_ICE_CANDIDATE, peer_id, &payload).await {
                    warn!(peer_id = %peer_id, error = %e, "Failed to relay candidate");
                }
            }
            PeerEvent::RemoteStream(stream) => {
                let pair = self.pair_mut(peer_id);
                let connected = pair.exchange.state() == ExchangeState::Connected;
                pair.remote_stream = Some(stream.clone());
                if connected {
                    self.hand_off(peer_id, stream);
                }
            }
            PeerEvent::Connected => {
                let pair = self.pair_mut(peer_id);
                if let Err(e) = pair.exchange.on_connected() {
                    self.reset(peer_id, e).await;
                    return;
                }
                if let Some(timer) = pair.timer.take() {
                    timer.abort();
                }
                pair.retries_used = 0;
                let stream = pair.remote_stream.clone();
                info!(peer_id = %peer_id, pair = %pair.exchange.pair(), "Peer connected");
                self.emit_state(peer_id);
                if let Some(stream) = stream {
                    self.hand_off(peer_id, stream);
                }
            }
            PeerEvent::Disconnected => {
                let connected = self
                    .pairs
                    .get(peer_id)
                    .is_some_and(|p| p.exchange.state() == ExchangeState::Connected);
                if connected {
                    self.close(peer_id).await;
                }
            }
            PeerEvent::Failed => {
                let error = SignalingError::PeerConnection {
                    peer: peer_id.to_string(),
                    reason: "connection failed".into(),
                };
                self.on_establish_failed(peer_id, error).await;
            }
        }
    }

    /// Host only: give the guest's audio to the sink.
    fn hand_off(&self, peer_id: &str, stream: MediaStream) {
        if self.settings.role != Role::Host {
            return;
        }
        match &self.deps.sink {
            Some(sink) => sink.attach(peer_id, stream.clone()),
            None => warn!(peer_id = %peer_id, "No audio sink for inbound stream"),
        }
        self.emit(SignalingEvent::RemoteStream {
            peer_id: peer_id.to_string(),
            stream,
        });
    }

    /// Establishment timed out or failed. Guests re-offer while retries remain.
    async fn on_establish_failed(&mut self, peer_id: &str, error: SignalingError) {
        let max_retries = self.settings.max_retries;
        let role = self.settings.role;
        let pair = self.pair_mut(peer_id);
        let retry = role == Role::Guest && pair.retries_used < max_retries;

        if retry {
            pair.retries_used += 1;
            let attempt = pair.retries_used;
            pair.release().await;
            pair.exchange.reset();
            warn!(peer_id = %peer_id, error = %error, attempt, "Peer connection failed, re-offering");
            self.offer(peer_id).await;
            return;
        }

        warn!(peer_id = %peer_id, error = %error, "Peer connection failed");
        self.emit(SignalingEvent::Failed {
            peer_id: peer_id.to_string(),
            error,
        });
        self.close(peer_id).await;
    }
}

fn parse_inbound(event: &str, payload: Value) -> Result<Inbound, String> {
    let parsed = match event {
        events::WEBRTC_OFFER => serde_json::from_value(payload).map(Inbound::Offer),
        events::WEBRTC_ANSWER => serde_json::from_value(payload).map(Inbound::Answer),
        events::WEBRTC_ICE_CANDIDATE => serde_json::from_value(payload).map(Inbound::Candidate),
        other => return Err(format!("unexpected event {other}")),
    };
    parsed.map_err(|e| e.to_string())
}
