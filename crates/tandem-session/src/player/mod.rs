//! External music player access.
//!
//! [`PlayerApi`] is the seam to the host's music service. The HTTP client
//! speaks the Spotify Web API; [`GatedPlayer`] puts every call behind the
//! session's rate limiter. [`LocalStore`] holds credentials and the
//! locally asserted role.

mod api;
pub(crate) mod gated;
mod http;
mod store;

use std::time::Duration;

use tandem_common::{AuthExpired, RateLimitExceeded, TandemError};

pub use api::{Device, ExternalQueue, PlayerApi};
pub use gated::GatedPlayer;
pub use http::HttpPlayerClient;
pub use store::{LocalStore, MemoryStore};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlayerError {
    #[error(transparent)]
    AuthExpired(#[from] AuthExpired),

    /// The service asked us to back off for this long.
    #[error("player asked to retry after {0:?}")]
    RetryAfter(Duration),

    #[error(transparent)]
    RateLimited(#[from] RateLimitExceeded),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected response: {0}")]
    Parse(String),
}

impl From<PlayerError> for TandemError {
    fn from(err: PlayerError) -> Self {
        match err {
            PlayerError::AuthExpired(e) => TandemError::Auth(e),
            PlayerError::RateLimited(e) => TandemError::RateLimit(e),
            other => TandemError::Player(other.to_string()),
        }
    }
}
