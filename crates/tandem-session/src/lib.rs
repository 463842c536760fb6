//! Core of a collaborative listening session.
//!
//! One host drives playback on an external music service while guests
//! mirror its audio over peer connections and propose queue changes.
//! Everything here talks through the realtime channel; the per-session
//! [`SessionContext`] wires the components together at join and tears
//! them down at leave.

pub mod membership;
pub mod player;
pub mod protocol;
pub mod queue;
pub mod rate_limit;
pub mod realtime;
pub mod session;
pub mod signaling;

pub use membership::{MembershipRegistry, Roster};
pub use player::{
    Device, ExternalQueue, GatedPlayer, HttpPlayerClient, LocalStore,
    MemoryStore, PlayerApi, PlayerError,
};
pub use protocol::{
    Capabilities, EntryRef, IceCandidate, NewEntry, Participant, QueueEntry, Role,
    SessionDescription, Source, TrackMetadata,
};
pub use queue::{PassOutcome, PassReport, QueueError, QueueSynchronizer, ReconcilePlan, SyncParams};
pub use rate_limit::{Category, RateLimiter, RateLimits};
pub use realtime::{
    ChannelClient, ChannelSettings, ChannelState, Connector, DefaultConnector, ReconnectPolicy,
    Subscription, TransportMode,
};
pub use session::{Session, SessionCollaborators, SessionContext};
pub use signaling::{
    AudioSink, CaptureSource, ExchangeState, IceServer, MediaStream, PairKey, PeerConnection,
    PeerConnectionFactory, PeerError, PeerEvent, SignalingCoordinator, SignalingDeps,
    SignalingEvent, SignalingSettings,
};
