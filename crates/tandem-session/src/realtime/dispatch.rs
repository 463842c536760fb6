//! Per-event subscriber registry.
//!
//! Inbound envelopes and local lifecycle events are fanned out to every
//! live [`Subscription`] for that event name, in arrival order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde_json::Value;
use tokio::sync::mpsc;

type Registry = HashMap<String, Vec<(u64, mpsc::UnboundedSender<Value>)>>;

#[derive(Clone, Default)]
pub(crate) struct Dispatcher {
    registry: Arc<Mutex<Registry>>,
    next_id: Arc<AtomicU64>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn subscribe(&self, event: &str) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.registry)
            .entry(event.to_string())
            .or_default()
            .push((id, tx));
        Subscription {
            event: event.to_string(),
            id,
            rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver `payload` to every subscriber of `event`. Returns how many got it.
    pub(crate) fn dispatch(&self, event: &str, payload: Value) -> usize {
        let mut registry = lock(&self.registry);
        let Some(subscribers) = registry.get_mut(event) else {
            tracing::trace!(event, "No subscribers");
            return 0;
        };
        subscribers.retain(|(_, tx)| tx.send(payload.clone()).is_ok());
        let delivered = subscribers.len();
        if subscribers.is_empty() {
            registry.remove(event);
        }
        delivered
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self, event: &str) -> usize {
        lock(&self.registry).get(event).map_or(0, Vec::len)
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Handle returned by [`ChannelClient::on`](super::ChannelClient::on).
///
/// Dropping it (or calling [`unsubscribe`](Self::unsubscribe)) removes the
/// handler; later events for that name are not delivered to it.
pub struct Subscription {
    event: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<Value>,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Next payload for this event. `None` once the channel client is gone.
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Value> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = lock(&registry);
        if let Some(subscribers) = registry.get_mut(&self.event) {
            subscribers.retain(|(id, _)| *id != self.id);
            if subscribers.is_empty() {
                registry.remove(&self.event);
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("event", &self.event)
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn delivers_in_order_to_all_subscribers() {
        let dispatcher = Dispatcher::new();
        let mut a = dispatcher.subscribe("queue-update");
        let mut b = dispatcher.subscribe("queue-update");

        assert_eq!(dispatcher.dispatch("queue-update", json!(1)), 2);
        assert_eq!(dispatcher.dispatch("queue-update", json!(2)), 2);

        assert_eq!(a.recv().await, Some(json!(1)));
        assert_eq!(a.recv().await, Some(json!(2)));
        assert_eq!(b.recv().await, Some(json!(1)));
        assert_eq!(b.recv().await, Some(json!(2)));
    }

    #[test]
    fn other_events_are_not_delivered() {
        let dispatcher = Dispatcher::new();
        let mut sub = dispatcher.subscribe("device-list");
        assert_eq!(dispatcher.dispatch("queue-update", json!({})), 0);
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn dropped_subscription_stops_receiving() {
        let dispatcher = Dispatcher::new();
        let sub = dispatcher.subscribe("ping");
        let mut keep = dispatcher.subscribe("ping");
        assert_eq!(dispatcher.subscriber_count("ping"), 2);

        sub.unsubscribe();
        assert_eq!(dispatcher.subscriber_count("ping"), 1);
        assert_eq!(dispatcher.dispatch("ping", json!(null)), 1);
        assert_eq!(keep.try_recv(), Some(json!(null)));

        drop(keep);
        assert_eq!(dispatcher.subscriber_count("ping"), 0);
    }

    #[test]
    fn subscription_outliving_dispatcher_is_harmless() {
        let dispatcher = Dispatcher::new();
        let sub = dispatcher.subscribe("x");
        drop(dispatcher);
        drop(sub);
    }
}
