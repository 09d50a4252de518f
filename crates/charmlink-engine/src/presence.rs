use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use charmlink_types::events::ChatEvent;
use charmlink_types::now_ms;

use crate::bus::EventBus;

/// What the handshake has told us about one peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceEntry {
    pub installed: bool,
    /// When we last pinged them.
    pub last_ping: Option<i64>,
    /// When they last answered.
    pub last_pong: Option<i64>,
}

/// Ephemeral cache of which peers run the application. Safe to lose; never
/// consulted for message-state decisions.
#[derive(Clone)]
pub struct ContactPresence {
    entries: Arc<RwLock<HashMap<String, PresenceEntry>>>,
    bus: EventBus,
}

impl ContactPresence {
    pub fn new(bus: EventBus) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            bus,
        }
    }

    /// Note that we just pinged `counterparty`.
    pub async fn record_ping(&self, counterparty: &str) {
        self.entries
            .write()
            .await
            .entry(counterparty.to_string())
            .or_default()
            .last_ping = Some(now_ms());
    }

    /// A pong arrived: the peer has the application.
    pub async fn record_pong(&self, counterparty: &str) {
        let newly_installed = {
            let mut entries = self.entries.write().await;
            let entry = entries.entry(counterparty.to_string()).or_default();
            entry.last_pong = Some(now_ms());
            !std::mem::replace(&mut entry.installed, true)
        };

        if newly_installed {
            self.bus.publish(ChatEvent::PresenceChanged {
                counterparty: counterparty.to_string(),
                installed: true,
            });
        }
    }

    /// `None` when we know nothing about the peer yet.
    pub async fn is_installed(&self, counterparty: &str) -> Option<bool> {
        self.entries.read().await.get(counterparty).map(|e| e.installed)
    }

    pub async fn get(&self, counterparty: &str) -> Option<PresenceEntry> {
        self.entries.read().await.get(counterparty).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_until_seen() {
        let presence = ContactPresence::new(EventBus::new());
        assert_eq!(presence.is_installed("bob").await, None);

        presence.record_ping("bob").await;
        assert_eq!(presence.is_installed("bob").await, Some(false));

        presence.record_pong("bob").await;
        assert_eq!(presence.is_installed("bob").await, Some(true));
        let entry = presence.get("bob").await.unwrap();
        assert!(entry.last_ping.is_some());
        assert!(entry.last_pong.is_some());
    }

    #[tokio::test]
    async fn first_pong_is_announced_once() {
        let bus = EventBus::new();
        let mut rx = bus.receiver();
        let presence = ContactPresence::new(bus);

        presence.record_pong("bob").await;
        presence.record_pong("bob").await;

        assert!(matches!(
            rx.try_recv(),
            Ok(ChatEvent::PresenceChanged { installed: true, .. })
        ));
        assert!(rx.try_recv().is_err());
    }
}
