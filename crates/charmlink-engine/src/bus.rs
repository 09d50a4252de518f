use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::broadcast;

use charmlink_types::events::ChatEvent;

type Callback = Arc<dyn Fn(&ChatEvent) + Send + Sync>;

/// Fan-out of engine events to UI-facing observers.
///
/// Callback observers are registered with [`EventBus::subscribe`] and stay
/// alive as long as the returned [`Subscription`]. Streaming consumers take
/// a broadcast receiver instead.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    broadcast_tx: broadcast::Sender<ChatEvent>,
    callbacks: Mutex<HashMap<u64, Callback>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(BusInner {
                broadcast_tx,
                callbacks: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a callback. Dropping the returned handle unregisters it.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ChatEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(callback));

        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Broadcast receiver for streaming consumers (e.g. a WebSocket).
    pub fn receiver(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    pub fn publish(&self, event: ChatEvent) {
        // Snapshot so a callback may subscribe or dispose without deadlocking.
        let callbacks: Vec<Callback> = self
            .inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        for callback in callbacks {
            callback(&event);
        }

        let _ = self.inner.broadcast_tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Disposer for a callback registered on an [`EventBus`].
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn dispose(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.callbacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn updated(peer: &str) -> ChatEvent {
        ChatEvent::MessagesUpdated {
            counterparty: peer.to_string(),
        }
    }

    #[test]
    fn callbacks_run_until_disposed() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicU64::new(0));

        let counter = seen.clone();
        let sub = bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(updated("bob"));
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        sub.dispose();
        bus.publish(updated("bob"));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn dropping_the_bus_first_is_fine() {
        let bus = EventBus::new();
        let sub = bus.subscribe(|_| {});
        drop(bus);
        drop(sub);
    }

    #[tokio::test]
    async fn receivers_see_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.receiver();
        bus.publish(updated("carol"));

        match rx.recv().await.unwrap() {
            ChatEvent::MessagesUpdated { counterparty } => assert_eq!(counterparty, "carol"),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
