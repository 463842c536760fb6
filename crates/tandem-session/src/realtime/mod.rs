//! Realtime channel client.
//!
//! Carries named events with JSON payloads over a WebSocket, falling back
//! to HTTP long-polling. Handles heartbeats, reconnect with capped
//! exponential backoff, transport downgrade, and re-joining the last
//! session after every reconnect.

mod client;
mod connection;
mod dispatch;
mod transport;
mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use client::ChannelClient;
pub use dispatch::Subscription;
pub use transport::{
    Connection, Connector, DefaultConnector, FrameSink, FrameStream, Inbound, LongPollConnector,
    WebSocketConnector,
};
pub use types::{ChannelSettings, ChannelState, Envelope, ReconnectPolicy, TransportMode};
