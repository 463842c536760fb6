use std::collections::HashMap;
use std::sync::Arc;

use tandem_common::ChannelError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::roster::{build_roster, parse_device_list, Roster};
use crate::protocol::{events, DeviceCapabilitiesPayload, Participant};
use crate::realtime::{ChannelClient, Subscription};

/// Tracks the roster of one joined session.
pub struct MembershipRegistry {
    session_id: String,
    me: Participant,
    channel: ChannelClient,
    roster_tx: Arc<watch::Sender<Roster>>,
    task: JoinHandle<()>,
}

impl MembershipRegistry {
    /// Join `session_id` as `me` and start following the device list.
    pub async fn join(
        channel: ChannelClient,
        session_id: &str,
        me: Participant,
    ) -> Result<Self, ChannelError> {
        // Subscribe before sending so the first device-list is not missed.
        let device_list = channel.on(events::DEVICE_LIST);
        let connected = channel.on(events::CONNECTED);

        channel.join_session(session_id).await?;
        announce(&channel, session_id, &me).await?;
        info!(session_id, user_id = %me.user_id, role = %me.role, "Joined session");

        let roster_tx = Arc::new(watch::channel(Roster::solo(session_id, me.clone())).0);
        let task = tokio::spawn(roster_loop(
            channel.clone(),
            session_id.to_string(),
            me.clone(),
            Arc::clone(&roster_tx),
            device_list,
            connected,
        ));

        Ok(Self {
            session_id: session_id.to_string(),
            me,
            channel,
            roster_tx,
            task,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn me(&self) -> &Participant {
        &self.me
    }

    /// Receiver that sees every roster change.
    pub fn on_roster_update(&self) -> watch::Receiver<Roster> {
        self.roster_tx.subscribe()
    }

    pub fn current_roster(&self) -> Roster {
        self.roster_tx.borrow().clone()
    }

    pub async fn leave(&self) -> Result<(), ChannelError> {
        self.task.abort();
        self.channel.leave_session(&self.session_id).await?;
        info!(session_id = %self.session_id, "Left session");
        Ok(())
    }
}

impl Drop for MembershipRegistry {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn announce(
    channel: &ChannelClient,
    session_id: &str,
    me: &Participant,
) -> Result<(), ChannelError> {
    let payload = DeviceCapabilitiesPayload {
        session_id: session_id.to_string(),
        user_id: me.user_id.clone(),
        role: me.role,
        flags: me.flags,
    };
    channel
        .send_json(events::DEVICE_CAPABILITIES, &payload)
        .await
}

async fn roster_loop(
    channel: ChannelClient,
    session_id: String,
    me: Participant,
    roster_tx: Arc<watch::Sender<Roster>>,
    mut device_list: Subscription,
    mut connected: Subscription,
) {
    let mut claims = HashMap::new();

    loop {
        tokio::select! {
            payload = device_list.recv() => {
                let Some(payload) = payload else { break };
                match parse_device_list(payload) {
                    Ok(list) => {
                        let roster = build_roster(&session_id, &me, &mut claims, list);
                        debug!(
                            session_id = %session_id,
                            participants = roster.participant_count(),
                            "Roster updated"
                        );
                        roster_tx.send_replace(roster);
                    }
                    Err(e) => warn!(error = %e, "Malformed device-list"),
                }
            }
            event = connected.recv() => {
                let Some(event) = event else { break };
                // The channel re-joins the session itself; capabilities must be re-announced.
                if event["reconnected"] == true {
                    if let Err(e) = announce(&channel, &session_id, &me).await {
                        warn!(error = %e, "Failed to re-announce capabilities");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Capabilities, Role, Source};
    use crate::realtime::testing::{memory_pair, test_settings, wait_for};
    use crate::realtime::ChannelState;
    use serde_json::json;

    fn caps() -> Capabilities {
        Capabilities::only(Source::Spotify)
    }

    #[tokio::test]
    async fn join_announces_and_tracks_roster() {
        let (connector, mut server) = memory_pair();
        let channel = ChannelClient::connect(test_settings(), connector);

        let registry = MembershipRegistry::join(channel, "room", Participant::guest("g1", caps()))
            .await
            .unwrap();

        let join = server.next_sent().await;
        assert_eq!(join.event, events::JOIN_SESSION);
        assert_eq!(join.payload["sessionId"], "room");
        let caps_msg = server.next_sent().await;
        assert_eq!(caps_msg.event, events::DEVICE_CAPABILITIES);
        assert_eq!(caps_msg.payload["userId"], "g1");
        assert_eq!(caps_msg.payload["role"], "guest");
        assert_eq!(caps_msg.payload["flags"]["supportsSpotify"], true);

        let mut updates = registry.on_roster_update();
        server.push(
            events::DEVICE_LIST,
            json!([
                { "userId": "h", "role": "host", "flags": { "supportsSpotify": true } },
                { "userId": "g1", "role": "guest" },
                { "userId": "g2", "role": "guest" }
            ]),
        );
        let roster = wait_for(&mut updates, |r| r.host.is_some()).await;
        assert_eq!(roster.host_id(), Some("h"));
        assert_eq!(roster.guest_ids(), vec!["g2"]);
        assert_eq!(registry.current_roster(), roster);
    }

    #[tokio::test]
    async fn role_conflicts_keep_first_claim() {
        let (connector, mut server) = memory_pair();
        let channel = ChannelClient::connect(test_settings(), connector);
        let registry = MembershipRegistry::join(channel, "room", Participant::host("h", caps()))
            .await
            .unwrap();
        server.next_event(events::DEVICE_CAPABILITIES).await;
        let mut updates = registry.on_roster_update();

        server.push(events::DEVICE_LIST, json!([{ "userId": "x", "role": "guest" }]));
        wait_for(&mut updates, |r| r.guests.len() == 1).await;

        server.push(
            events::DEVICE_LIST,
            json!([{ "userId": "x", "role": "host" }, { "userId": "y", "role": "guest" }]),
        );
        let roster = wait_for(&mut updates, |r| r.guests.len() == 2).await;
        assert_eq!(roster.host_id(), Some("h"));
        assert!(roster.guests.iter().all(|g| g.role == Role::Guest));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_rejoins_and_reannounces() {
        let (connector, mut server) = memory_pair();
        let channel = ChannelClient::connect(test_settings(), connector);
        let mut state = channel.state();
        let _registry =
            MembershipRegistry::join(channel, "room", Participant::guest("g1", caps()))
                .await
                .unwrap();
        server.next_event(events::DEVICE_CAPABILITIES).await;
        wait_for(&mut state, ChannelState::is_connected).await;

        server.drop_connection();

        let rejoin = server.next_event(events::JOIN_SESSION).await;
        assert_eq!(rejoin.payload["sessionId"], "room");
        let again = server.next_event(events::DEVICE_CAPABILITIES).await;
        assert_eq!(again.payload["userId"], "g1");
    }

    #[tokio::test]
    async fn leave_sends_leave_session() {
        let (connector, mut server) = memory_pair();
        let channel = ChannelClient::connect(test_settings(), connector);
        let registry = MembershipRegistry::join(channel, "room", Participant::guest("g1", caps()))
            .await
            .unwrap();
        registry.leave().await.unwrap();
        let leave = server.next_event(events::LEAVE_SESSION).await;
        assert_eq!(leave.payload["sessionId"], "room");
    }
}
