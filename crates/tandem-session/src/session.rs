//! Per-session context.
//!
//! [`SessionContext::join`] builds every component for one session: the
//! session and queue channels, membership, the queue synchronizer, the
//! rate-limited player (host only) and, when a media engine is supplied,
//! the signaling coordinator. [`SessionContext::leave`] tears them down in
//! reverse order.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tandem_common::{ConfigError, NoticeBus, SessionNotice, TandemError};
use tandem_config::TandemConfig;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::membership::{MembershipRegistry, Roster};
use crate::player::{GatedPlayer, HttpPlayerClient, LocalStore, PlayerApi};
use crate::protocol::{events, Capabilities, Participant, Role, Source};
use crate::queue::{QueueSynchronizer, SyncParams};
use crate::rate_limit::RateLimiter;
use crate::realtime::{ChannelClient, ChannelSettings, ChannelState, Connector, Subscription};
use crate::signaling::{SignalingCoordinator, SignalingDeps, SignalingEvent, SignalingSettings};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    /// Unknown on a guest until the first device list arrives.
    pub host_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// What the platform layer hands to [`SessionContext::join`].
pub struct SessionCollaborators {
    pub store: Arc<dyn LocalStore>,
    pub connector: Arc<dyn Connector>,
    /// Player to drive on the host. `None` builds an HTTP client from config.
    pub player: Option<Arc<dyn PlayerApi>>,
    pub capabilities: Capabilities,
    /// Media engine. `None` disables peer audio for this device.
    pub peers: Option<SignalingDeps>,
}

pub struct SessionContext {
    session: Session,
    me: Participant,
    session_channel: ChannelClient,
    queue_channel: ChannelClient,
    membership: MembershipRegistry,
    queue: QueueSynchronizer,
    signaling: Option<SignalingCoordinator>,
    signaling_events: Option<mpsc::UnboundedReceiver<SignalingEvent>>,
    player: Option<Arc<dyn PlayerApi>>,
    limiter: Arc<RateLimiter>,
    notices: NoticeBus,
    watchdog: JoinHandle<()>,
}

impl SessionContext {
    pub async fn join(
        config: &TandemConfig,
        session_id: &str,
        collaborators: SessionCollaborators,
    ) -> Result<Self, TandemError> {
        let SessionCollaborators {
            store,
            connector,
            player,
            capabilities,
            peers,
        } = collaborators;

        // Role is fixed here for the lifetime of the session.
        let role = if store.is_host() { Role::Host } else { Role::Guest };
        let me = Participant {
            user_id: store.user_id(),
            role,
            flags: capabilities,
        };
        let source: Source = config
            .player
            .source
            .parse()
            .map_err(|e: String| TandemError::Config(ConfigError::ValidationError(e)))?;

        let notices = NoticeBus::default();
        let session_channel = ChannelClient::connect(
            ChannelSettings::from_config(&config.channel),
            Arc::clone(&connector),
        );
        let queue_channel = ChannelClient::connect(
            ChannelSettings::queue_from_config(&config.channel),
            connector,
        );
        let watchdog = tokio::spawn(watch_channels(
            session_channel.on(events::ERROR),
            queue_channel.on(events::ERROR),
            notices.clone(),
        ));

        // One limiter per session, shared by every player call.
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
        let player: Option<Arc<dyn PlayerApi>> = match role {
            Role::Host => {
                let raw: Arc<dyn PlayerApi> = match player {
                    Some(player) => player,
                    None => Arc::new(HttpPlayerClient::new(&config.player, Arc::clone(&store))?),
                };
                Some(Arc::new(GatedPlayer::new(raw, Arc::clone(&limiter))))
            }
            Role::Guest => None,
        };

        let membership =
            MembershipRegistry::join(session_channel.clone(), session_id, me.clone()).await?;
        queue_channel.join_session(session_id).await?;

        let queue = QueueSynchronizer::start(SyncParams {
            session_id: session_id.to_string(),
            role,
            source,
            channel: queue_channel.clone(),
            player: player.clone(),
            limiter: Arc::clone(&limiter),
            store: Arc::clone(&store),
            notices: notices.clone(),
            min_interval: Duration::from_millis(config.queue.min_interval_ms),
        });

        let (signaling, signaling_events) = match peers {
            Some(deps) => {
                let settings = SignalingSettings::from_config(
                    &config.signaling,
                    session_id,
                    me.user_id.clone(),
                    role,
                );
                let (coordinator, events) =
                    SignalingCoordinator::start(session_channel.clone(), settings, deps);
                (Some(coordinator), Some(events))
            }
            None => (None, None),
        };

        if let (Some(player), Some(device_id)) = (&player, &config.player.device_id) {
            if let Err(e) = player.transfer_playback(device_id, false).await {
                warn!(device_id = %device_id, error = %e, "Failed to activate playback device");
            }
        }

        queue.request_queue().await?;

        let session = Session {
            id: session_id.to_string(),
            host_id: (role == Role::Host).then(|| me.user_id.clone()),
            created_at: Utc::now(),
        };
        info!(
            session_id,
            user_id = %me.user_id,
            role = %role,
            source = %source,
            peers = signaling.is_some(),
            "Session ready"
        );

        Ok(Self {
            session,
            me,
            session_channel,
            queue_channel,
            membership,
            queue,
            signaling,
            signaling_events,
            player,
            limiter,
            notices,
            watchdog,
        })
    }

    /// Session record with the host filled in from the latest roster.
    pub fn session(&self) -> Session {
        let mut session = self.session.clone();
        if session.host_id.is_none() {
            session.host_id = self.membership.current_roster().host_id().map(str::to_string);
        }
        session
    }

    pub fn me(&self) -> &Participant {
        &self.me
    }

    pub fn role(&self) -> Role {
        self.me.role
    }

    pub fn roster(&self) -> Roster {
        self.membership.current_roster()
    }

    pub fn on_roster_update(&self) -> watch::Receiver<Roster> {
        self.membership.on_roster_update()
    }

    pub fn queue(&self) -> &QueueSynchronizer {
        &self.queue
    }

    pub fn signaling(&self) -> Option<&SignalingCoordinator> {
        self.signaling.as_ref()
    }

    /// Signaling outcomes. Can be taken once.
    pub fn take_signaling_events(&mut self) -> Option<mpsc::UnboundedReceiver<SignalingEvent>> {
        self.signaling_events.take()
    }

    /// Rate-limited player. `None` on guests.
    pub fn player(&self) -> Option<&Arc<dyn PlayerApi>> {
        self.player.as_ref()
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    pub fn channel_state(&self) -> watch::Receiver<ChannelState> {
        self.session_channel.state()
    }

    /// Leave the session and release everything it owns.
    pub async fn leave(self) -> Result<(), TandemError> {
        if let Some(signaling) = &self.signaling {
            signaling.shutdown();
        }
        self.queue.shutdown();

        if let Err(e) = self.queue_channel.leave_session(&self.session.id).await {
            warn!(error = %e, "Queue channel leave failed");
        }
        if let Err(e) = self.membership.leave().await {
            warn!(error = %e, "Session channel leave failed");
        }

        self.watchdog.abort();
        self.queue_channel.disconnect().await;
        self.session_channel.disconnect().await;
        info!(session_id = %self.session.id, "Session closed");
        Ok(())
    }
}

/// Turn terminal channel errors into notices.
async fn watch_channels(mut session: Subscription, mut queue: Subscription, notices: NoticeBus) {
    loop {
        let payload = tokio::select! {
            Some(payload) = session.recv() => payload,
            Some(payload) = queue.recv() => payload,
            else => break,
        };
        let terminal = payload
            .get("terminal")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !terminal {
            continue;
        }
        let message = payload
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("connection lost")
            .to_string();
        error!(message = %message, "Realtime channel gave up");
        notices.publish(SessionNotice::Terminal(message));
    }
}
