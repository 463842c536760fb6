use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// User-visible outcomes the session layer must surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SessionNotice {
    /// Single-item failure; shown as a non-blocking notification.
    Transient(String),
    /// Reconnect attempts exhausted. The session state must be reset.
    Terminal(String),
    /// Credentials were rejected and invalidated. Re-authentication required.
    ReloadRequired,
}

impl SessionNotice {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_) | Self::ReloadRequired)
    }
}

#[derive(Clone)]
pub struct NoticeBus {
    sender: broadcast::Sender<SessionNotice>,
}

impl NoticeBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.sender.subscribe()
    }

    pub fn publish(&self, notice: SessionNotice) -> usize {
        self.sender.send(notice).unwrap_or(0)
    }
}

impl Default for NoticeBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive() {
        let bus = NoticeBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(SessionNotice::Transient("track unavailable".into()));

        let notice = rx.recv().await.unwrap();
        assert_eq!(notice, SessionNotice::Transient("track unavailable".into()));
    }

    #[tokio::test]
    async fn multiple_subscribers() {
        let bus = NoticeBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(SessionNotice::ReloadRequired);

        assert_eq!(rx1.recv().await.unwrap(), SessionNotice::ReloadRequired);
        assert_eq!(rx2.recv().await.unwrap(), SessionNotice::ReloadRequired);
    }

    #[test]
    fn publish_without_subscribers_returns_zero() {
        let bus = NoticeBus::new(4);
        assert_eq!(bus.publish(SessionNotice::Terminal("gone".into())), 0);
    }

    #[test]
    fn terminal_classification() {
        assert!(SessionNotice::Terminal("x".into()).is_terminal());
        assert!(SessionNotice::ReloadRequired.is_terminal());
        assert!(!SessionNotice::Transient("x".into()).is_terminal());
    }

    #[test]
    fn notice_serialization() {
        let json = serde_json::to_string(&SessionNotice::Transient("oops".into())).unwrap();
        assert!(json.contains("\"type\":\"Transient\""));
        let back: SessionNotice = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SessionNotice::Transient("oops".into()));
    }
}
