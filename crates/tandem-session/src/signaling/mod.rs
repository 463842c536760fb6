//! Peer-connection signaling.
//!
//! Offers, answers and ICE candidates travel over the session channel.
//! Each host/guest pair runs its own [`Exchange`]; a bad message resets
//! only that pair.

mod coordinator;
mod exchange;
mod peer;
mod types;

#[cfg(test)]
pub(crate) mod testing;
#[cfg(test)]
mod tests;

pub use coordinator::{SignalingCoordinator, SignalingDeps};
pub use exchange::Exchange;
pub use peer::{
    AudioSink, CaptureSource, IceServer, MediaStream, PeerConnection, PeerConnectionFactory,
    PeerError, PeerEvent,
};
pub use types::{ExchangeState, PairKey, SignalingEvent, SignalingSettings};
