use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config file {}: {message}", .path.display())]
    Io { path: PathBuf, message: String },

    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Transport or reconnect failure on a realtime channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("connection timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("reconnect attempts exhausted after {attempts} tries")]
    ReconnectExhausted { attempts: u32 },

    #[error("channel closed")]
    Closed,
}

/// A handshake message that cannot be applied. Always scoped to one peer pair.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalingError {
    #[error("malformed signaling message from {peer}: {reason}")]
    Malformed { peer: String, reason: String },

    #[error("unexpected {message} from {peer} in state {state}")]
    OutOfOrder {
        peer: String,
        message: String,
        state: String,
    },

    #[error("role violation: {0}")]
    RoleViolation(String),

    #[error("peer connection error for {peer}: {reason}")]
    PeerConnection { peer: String, reason: String },

    #[error("no exchange for peer {0}")]
    UnknownPeer(String),

    #[error("connection with {0} was not established in time")]
    Timeout(String),
}

/// The external player rejected the stored credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("external credentials expired or were rejected")]
pub struct AuthExpired;

/// A call was attempted before its category's window elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("rate limit exceeded for {category}, retry in {retry_in:?}")]
pub struct RateLimitExceeded {
    pub category: &'static str,
    pub retry_in: Duration,
}

/// External-API failure while aligning the player queue with the session queue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconciliationError {
    #[error("failed to fetch external queue: {0}")]
    FetchQueue(String),

    #[error("failed to enqueue {uri}: {reason}")]
    Enqueue { uri: String, reason: String },

    #[error("failed to skip: {0}")]
    Skip(String),

    #[error(transparent)]
    AuthExpired(#[from] AuthExpired),

    #[error(transparent)]
    RateLimited(#[from] RateLimitExceeded),
}

#[derive(Debug, thiserror::Error)]
pub enum TandemError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Reconciliation(#[from] ReconciliationError),

    #[error(transparent)]
    RateLimit(#[from] RateLimitExceeded),

    #[error(transparent)]
    Auth(#[from] AuthExpired),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("player error: {0}")]
    Player(String),

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = ConfigError::FileNotFound(PathBuf::from("/tmp/missing.toml"));
        assert_eq!(err.to_string(), "config file not found: /tmp/missing.toml");

        let err = ConfigError::ValidationError("queue.min_interval_ms = 0".into());
        assert_eq!(
            err.to_string(),
            "config validation error: queue.min_interval_ms = 0"
        );
    }

    #[test]
    fn channel_error_display() {
        let err = ChannelError::ReconnectExhausted { attempts: 5 };
        assert_eq!(err.to_string(), "reconnect attempts exhausted after 5 tries");

        let err = ChannelError::ConnectFailed("refused".into());
        assert_eq!(err.to_string(), "connect failed: refused");
    }

    #[test]
    fn signaling_error_names_peer() {
        let err = SignalingError::OutOfOrder {
            peer: "guest-1".into(),
            message: "answer".into(),
            state: "Idle".into(),
        };
        assert_eq!(err.to_string(), "unexpected answer from guest-1 in state Idle");
    }

    #[test]
    fn reconciliation_error_from_auth() {
        let err: ReconciliationError = AuthExpired.into();
        assert!(matches!(err, ReconciliationError::AuthExpired(_)));
        assert!(err.to_string().contains("credentials"));
    }

    #[test]
    fn tandem_error_from_variants() {
        let err: TandemError = ChannelError::Closed.into();
        assert!(matches!(err, TandemError::Channel(_)));

        let err: TandemError = RateLimitExceeded {
            category: "queue-control",
            retry_in: Duration::from_millis(30),
        }
        .into();
        assert!(matches!(err, TandemError::RateLimit(_)));
        assert!(err.to_string().contains("queue-control"));

        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: TandemError = io_err.into();
        assert!(matches!(err, TandemError::Io(_)));
    }

    #[test]
    fn tandem_error_other_variants() {
        let err = TandemError::Queue("duplicate uri".into());
        assert_eq!(err.to_string(), "queue error: duplicate uri");

        let err = TandemError::Player("HTTP 500".into());
        assert_eq!(err.to_string(), "player error: HTTP 500");

        let err = TandemError::Other("something went wrong".into());
        assert_eq!(err.to_string(), "something went wrong");
    }
}
