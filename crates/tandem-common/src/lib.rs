pub mod errors;
pub mod events;
pub mod id;

pub use errors::{
    AuthExpired, ChannelError, ConfigError, RateLimitExceeded, ReconciliationError,
    SignalingError, TandemError,
};
pub use events::{NoticeBus, SessionNotice};
pub use id::{new_entry_id, new_user_id};

pub type Result<T> = std::result::Result<T, TandemError>;
