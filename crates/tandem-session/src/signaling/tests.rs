use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tandem_common::SignalingError;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::testing::{FakeCapture, FakeFactory, FakeSink};
use super::*;
use crate::protocol::{events, IceCandidate, Role};
use crate::realtime::testing::{memory_pair, test_settings, wait_for, MemoryServer};
use crate::realtime::{ChannelClient, ChannelState};

struct Harness {
    coordinator: SignalingCoordinator,
    events: mpsc::UnboundedReceiver<SignalingEvent>,
    channel: ChannelClient,
    server: MemoryServer,
    factory: Arc<FakeFactory>,
    sink: Arc<FakeSink>,
}

async fn harness(role: Role, me: &str) -> Harness {
    let (connector, server) = memory_pair();
    let channel = ChannelClient::connect(test_settings(), connector);
    let mut state = channel.state();
    wait_for(&mut state, ChannelState::is_connected).await;

    let factory = Arc::new(FakeFactory::default());
    let sink = Arc::new(FakeSink::default());
    let settings = SignalingSettings {
        session_id: "room".into(),
        local_id: me.into(),
        role,
        ice_servers: vec![IceServer {
            url: "stun:stun.example.org".into(),
            username: None,
            credential: None,
        }],
        connect_timeout: Duration::from_secs(10),
        max_retries: 1,
    };
    let deps = SignalingDeps {
        factory: factory.clone(),
        capture: Some(Arc::new(FakeCapture)),
        sink: Some(sink.clone()),
    };
    let (coordinator, events) = SignalingCoordinator::start(channel.clone(), settings, deps);
    Harness {
        coordinator,
        events,
        channel,
        server,
        factory,
        sink,
    }
}

fn offer_from(from: &str, to: &str) -> Value {
    json!({
        "sessionId": "room",
        "offer": { "type": "offer", "sdp": "v=0 offer" },
        "to": to,
        "from": from,
    })
}

fn answer_from(from: &str, to: &str) -> Value {
    json!({
        "sessionId": "room",
        "answer": { "type": "answer", "sdp": "v=0 answer" },
        "to": to,
        "from": from,
    })
}

fn candidate_from(from: &str, to: &str, candidate: &str) -> Value {
    json!({
        "sessionId": "room",
        "candidate": { "candidate": candidate },
        "to": to,
        "from": from,
    })
}

async fn wait_state(coordinator: &SignalingCoordinator, peer_id: &str, want: Option<ExchangeState>) {
    for _ in 0..500 {
        if coordinator.pair_state(peer_id).await == want {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!(
        "{peer_id} never reached {want:?}, last {:?}",
        coordinator.pair_state(peer_id).await
    );
}

async fn next_matching(
    events: &mut mpsc::UnboundedReceiver<SignalingEvent>,
    pred: impl Fn(&SignalingEvent) -> bool,
) -> SignalingEvent {
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            let event = events.recv().await.expect("coordinator stopped");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for signaling event")
}

/// Drive a guest's offer through to `Connected` on the host.
async fn connect_guest(h: &mut Harness, guest: &str) {
    h.server.push(events::WEBRTC_OFFER, offer_from(guest, "h"));
    let answer = h.server.next_event(events::WEBRTC_ANSWER).await;
    assert_eq!(answer.payload["to"], guest);
    wait_state(&h.coordinator, guest, Some(ExchangeState::AnswerSent)).await;
    h.factory.emit(guest, PeerEvent::Connected);
    wait_state(&h.coordinator, guest, Some(ExchangeState::Connected)).await;
}

#[tokio::test(start_paused = true)]
async fn guest_captures_before_offering_and_connects() {
    let mut h = harness(Role::Guest, "g1").await;
    h.coordinator.connect_to_host("h").unwrap();

    let offer = h.server.next_event(events::WEBRTC_OFFER).await;
    assert_eq!(offer.payload["to"], "h");
    assert_eq!(offer.payload["from"], "g1");
    assert_eq!(offer.payload["sessionId"], "room");
    assert_eq!(offer.payload["offer"]["type"], "offer");
    wait_state(&h.coordinator, "h", Some(ExchangeState::OfferCreated)).await;
    assert_eq!(h.factory.peer("h").log(), vec!["add_stream mic", "create_offer"]);

    // Host candidate overtakes the answer.
    h.server
        .push(events::WEBRTC_ICE_CANDIDATE, candidate_from("h", "g1", "hc1"));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.factory.peer("h").log().len(), 2);

    h.server.push(events::WEBRTC_ANSWER, answer_from("h", "g1"));
    wait_state(&h.coordinator, "h", Some(ExchangeState::AnswerReceived)).await;
    assert_eq!(
        h.factory.peer("h").log(),
        vec![
            "add_stream mic",
            "create_offer",
            "set_remote v=0 answer",
            "candidate hc1"
        ]
    );

    h.factory
        .emit("h", PeerEvent::LocalCandidate(IceCandidate::new("gc1")));
    let relayed = h.server.next_event(events::WEBRTC_ICE_CANDIDATE).await;
    assert_eq!(relayed.payload["candidate"]["candidate"], "gc1");
    assert_eq!(relayed.payload["to"], "h");

    h.factory.emit("h", PeerEvent::Connected);
    let event = next_matching(&mut h.events, |e| {
        matches!(e, SignalingEvent::StateChanged { state: ExchangeState::Connected, .. })
    })
    .await;
    assert_eq!(event.peer_id(), "h");
}

#[tokio::test(start_paused = true)]
async fn host_flushes_early_candidates_right_after_offer_applied() {
    let mut h = harness(Role::Host, "h").await;

    h.server
        .push(events::WEBRTC_ICE_CANDIDATE, candidate_from("g1", "h", "c1"));
    h.server
        .push(events::WEBRTC_ICE_CANDIDATE, candidate_from("g1", "h", "c2"));
    tokio::time::sleep(Duration::from_millis(10)).await;
    wait_state(&h.coordinator, "g1", Some(ExchangeState::Idle)).await;
    assert_eq!(h.factory.created("g1"), 0);

    h.server.push(events::WEBRTC_OFFER, offer_from("g1", "h"));
    let answer = h.server.next_event(events::WEBRTC_ANSWER).await;
    assert_eq!(answer.payload["answer"]["type"], "answer");
    assert_eq!(answer.payload["from"], "h");

    assert_eq!(
        h.factory.peer("g1").log(),
        vec![
            "set_remote v=0 offer",
            "candidate c1",
            "candidate c2",
            "create_answer"
        ]
    );
    wait_state(&h.coordinator, "g1", Some(ExchangeState::AnswerSent)).await;
}

#[tokio::test(start_paused = true)]
async fn host_hands_inbound_stream_to_sink_on_connect() {
    let mut h = harness(Role::Host, "h").await;
    h.server.push(events::WEBRTC_OFFER, offer_from("g1", "h"));
    h.server.next_event(events::WEBRTC_ANSWER).await;

    h.factory
        .emit("g1", PeerEvent::RemoteStream(MediaStream::new("guest-audio")));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(h.sink.attached().is_empty());

    h.factory.emit("g1", PeerEvent::Connected);
    let event = next_matching(&mut h.events, |e| {
        matches!(e, SignalingEvent::RemoteStream { .. })
    })
    .await;
    assert_eq!(event.peer_id(), "g1");
    assert_eq!(
        h.sink.attached(),
        vec![("g1".to_string(), "guest-audio".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn second_offer_on_live_pair_is_rejected() {
    let mut h = harness(Role::Host, "h").await;
    connect_guest(&mut h, "g1").await;

    h.server.push(events::WEBRTC_OFFER, offer_from("g1", "h"));
    let event = next_matching(&mut h.events, |e| {
        matches!(e, SignalingEvent::Rejected { .. })
    })
    .await;
    assert!(matches!(
        event,
        SignalingEvent::Rejected { error: SignalingError::OutOfOrder { .. }, .. }
    ));

    assert_eq!(
        h.coordinator.pair_state("g1").await,
        Some(ExchangeState::Connected)
    );
    assert_eq!(h.factory.created("g1"), 1);
    assert!(!h.factory.peer("g1").log().contains(&"close".to_string()));
}

#[tokio::test(start_paused = true)]
async fn bad_message_resets_only_its_pair() {
    let mut h = harness(Role::Host, "h").await;
    connect_guest(&mut h, "g1").await;
    h.server.push(events::WEBRTC_OFFER, offer_from("g2", "h"));
    h.server.next_event(events::WEBRTC_ANSWER).await;
    wait_state(&h.coordinator, "g2", Some(ExchangeState::AnswerSent)).await;

    // Hosts never receive answers.
    h.server.push(events::WEBRTC_ANSWER, answer_from("g2", "h"));
    let event = next_matching(&mut h.events, |e| {
        matches!(e, SignalingEvent::PairReset { .. })
    })
    .await;
    assert_eq!(event.peer_id(), "g2");

    wait_state(&h.coordinator, "g2", Some(ExchangeState::Idle)).await;
    assert!(h.factory.peer("g2").log().contains(&"close".to_string()));
    assert_eq!(
        h.coordinator.pair_state("g1").await,
        Some(ExchangeState::Connected)
    );
    assert!(h.channel.is_connected());

    // The reset pair can handshake again.
    connect_guest(&mut h, "g2").await;
    assert_eq!(h.factory.created("g2"), 2);
}

#[tokio::test(start_paused = true)]
async fn malformed_message_resets_known_pair() {
    let mut h = harness(Role::Guest, "g1").await;
    h.coordinator.connect_to_host("h").unwrap();
    h.server.next_event(events::WEBRTC_OFFER).await;
    wait_state(&h.coordinator, "h", Some(ExchangeState::OfferCreated)).await;

    h.server.push(
        events::WEBRTC_ANSWER,
        json!({ "sessionId": "room", "to": "g1", "from": "h" }),
    );
    let event = next_matching(&mut h.events, |e| {
        matches!(e, SignalingEvent::PairReset { .. })
    })
    .await;
    assert!(matches!(
        event,
        SignalingEvent::PairReset { error: SignalingError::Malformed { .. }, .. }
    ));
    wait_state(&h.coordinator, "h", Some(ExchangeState::Idle)).await;
}

#[tokio::test(start_paused = true)]
async fn messages_for_other_users_are_ignored() {
    let mut h = harness(Role::Host, "h").await;
    h.server.push(events::WEBRTC_OFFER, offer_from("g1", "someone-else"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.coordinator.pair_state("g1").await, None);
    assert!(h.server.drain_sent().iter().all(|e| e.event != events::WEBRTC_ANSWER));
}

#[tokio::test(start_paused = true)]
async fn close_pair_releases_only_that_pair() {
    let mut h = harness(Role::Host, "h").await;
    connect_guest(&mut h, "g1").await;
    connect_guest(&mut h, "g2").await;

    h.coordinator.close_pair("g1");
    wait_state(&h.coordinator, "g1", None).await;

    assert_eq!(h.factory.peer("g1").log().last().unwrap(), "close");
    assert!(!h.factory.peer("g2").log().contains(&"close".to_string()));
    assert_eq!(h.sink.detached(), vec!["g1".to_string()]);
    assert_eq!(
        h.coordinator.pair_state("g2").await,
        Some(ExchangeState::Connected)
    );
    assert!(h.channel.is_connected());
}

#[tokio::test(start_paused = true)]
async fn peer_disconnect_closes_pair() {
    let mut h = harness(Role::Host, "h").await;
    connect_guest(&mut h, "g1").await;

    h.factory.emit("g1", PeerEvent::Disconnected);
    let event = next_matching(&mut h.events, |e| {
        matches!(e, SignalingEvent::StateChanged { state: ExchangeState::Closed, .. })
    })
    .await;
    assert_eq!(event.peer_id(), "g1");
    assert_eq!(h.coordinator.pair_state("g1").await, None);
}

#[tokio::test(start_paused = true)]
async fn establishment_timeout_retries_once_then_fails() {
    let mut h = harness(Role::Guest, "g1").await;
    let start = Instant::now();
    h.coordinator.connect_to_host("h").unwrap();
    h.server.next_event(events::WEBRTC_OFFER).await;

    h.server.next_event(events::WEBRTC_OFFER).await;
    assert!(start.elapsed() >= Duration::from_secs(10));
    assert_eq!(h.factory.created("h"), 2);

    let event = next_matching(&mut h.events, |e| {
        matches!(e, SignalingEvent::Failed { .. })
    })
    .await;
    assert!(matches!(
        event,
        SignalingEvent::Failed { error: SignalingError::Timeout(_), .. }
    ));
    assert!(start.elapsed() >= Duration::from_secs(20));
    assert_eq!(h.coordinator.pair_state("h").await, None);
    assert_eq!(h.factory.created("h"), 2);
}

#[tokio::test(start_paused = true)]
async fn host_invites_and_guest_offers() {
    let mut host = harness(Role::Host, "h").await;
    host.coordinator.invite_guest("g1").await.unwrap();
    let invite = host.server.next_event(events::START_STREAM_TO).await;
    assert_eq!(invite.payload["fromUserId"], "h");
    assert_eq!(invite.payload["toUserId"], "g1");
    assert!(matches!(
        host.coordinator.connect_to_host("x"),
        Err(SignalingError::RoleViolation(_))
    ));

    let mut guest = harness(Role::Guest, "g1").await;
    assert!(matches!(
        guest.coordinator.invite_guest("g2").await,
        Err(SignalingError::RoleViolation(_))
    ));
    guest.server.push(events::START_STREAM_TO, invite.payload);
    let offer = guest.server.next_event(events::WEBRTC_OFFER).await;
    assert_eq!(offer.payload["to"], "h");
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_every_pair() {
    let mut h = harness(Role::Host, "h").await;
    connect_guest(&mut h, "g1").await;

    h.coordinator.shutdown();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(h.factory.peer("g1").log().last().unwrap(), "close");
    assert_eq!(h.sink.detached(), vec!["g1".to_string()]);
    assert_eq!(h.coordinator.pair_state("g1").await, None);
}
