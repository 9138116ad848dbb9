//! Events, channels and their subscribers.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{ServerError, ServerResult};
use crate::session::{Session, SessionId};

#[derive(Debug, Default)]
struct Channel {
    subscribers: HashMap<SessionId, Weak<Session>>,
}

#[derive(Debug, Default)]
struct Event {
    channels: HashMap<String, Channel>,
}

/// Declared events and their channel subscriptions.
///
/// Channels hold weak references, so a session that is gone but not yet
/// cleaned up is skipped at delivery time instead of being kept alive.
#[derive(Debug, Default)]
pub struct EventRegistry {
    events: RwLock<HashMap<String, Event>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the given events already declared.
    pub fn with_events<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let events = names
            .into_iter()
            .map(|name| (name.into(), Event::default()))
            .collect();
        Self {
            events: RwLock::new(events),
        }
    }

    /// Declares an event. Returns false if it already existed.
    pub async fn declare(&self, name: &str) -> bool {
        let mut events = self.events.write().await;
        if events.contains_key(name) {
            return false;
        }
        events.insert(name.to_string(), Event::default());
        debug!(event = name, "Event declared");
        true
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.events.read().await.contains_key(name)
    }

    /// Adds a session to a channel, creating the event and channel if needed.
    ///
    /// Returns false if the session was already subscribed or has been
    /// disconnected.
    pub async fn subscribe(&self, event: &str, channel: &str, session: &Arc<Session>) -> bool {
        let mut events = self.events.write().await;
        // Checked under the lock so a racing `remove_session` always wins.
        if session.is_disconnected() {
            debug!(event, channel, session_id = %session.id(), "Disconnected session not subscribed");
            return false;
        }
        let subscribers = &mut events
            .entry(event.to_string())
            .or_default()
            .channels
            .entry(channel.to_string())
            .or_default()
            .subscribers;

        let added = subscribers
            .insert(session.id().clone(), Arc::downgrade(session))
            .is_none();
        debug!(event, channel, session_id = %session.id(), added, "Subscribed");
        added
    }

    /// Removes a session from a channel. Empty channels are dropped.
    pub async fn unsubscribe(&self, event: &str, channel: &str, session_id: &str) -> bool {
        let mut events = self.events.write().await;
        let Some(ev) = events.get_mut(event) else {
            return false;
        };
        let Some(ch) = ev.channels.get_mut(channel) else {
            return false;
        };

        let removed = ch.subscribers.remove(session_id).is_some();
        if ch.subscribers.is_empty() {
            ev.channels.remove(channel);
        }
        removed
    }

    /// Removes a session from every channel of every event in one pass.
    ///
    /// Returns the number of channels it was removed from.
    pub async fn remove_session(&self, session_id: &str) -> usize {
        let mut events = self.events.write().await;
        let mut removed = 0;
        for ev in events.values_mut() {
            ev.channels.retain(|_, ch| {
                if ch.subscribers.remove(session_id).is_some() {
                    removed += 1;
                }
                !ch.subscribers.is_empty()
            });
        }
        if removed > 0 {
            debug!(session_id, channels = removed, "Session unsubscribed everywhere");
        }
        removed
    }

    /// Snapshots the live subscribers of a channel.
    ///
    /// An empty `channel` selects every channel of the event; a session
    /// subscribed to several of them appears once.
    pub async fn recipients(&self, event: &str, channel: &str) -> ServerResult<Vec<Arc<Session>>> {
        let events = self.events.read().await;
        let ev = events
            .get(event)
            .ok_or_else(|| ServerError::event_not_found(event))?;

        if channel.is_empty() {
            let mut unique: HashMap<&SessionId, &Weak<Session>> = HashMap::new();
            for ch in ev.channels.values() {
                unique.extend(ch.subscribers.iter());
            }
            return Ok(unique.values().filter_map(|w| w.upgrade()).collect());
        }

        let ch = ev
            .channels
            .get(channel)
            .filter(|ch| !ch.subscribers.is_empty())
            .ok_or_else(|| ServerError::channel_not_found(event, channel))?;
        Ok(ch.subscribers.values().filter_map(Weak::upgrade).collect())
    }

    /// Lists the (event, channel) pairs a session is subscribed to.
    pub async fn channels_of(&self, session_id: &str) -> Vec<(String, String)> {
        let events = self.events.read().await;
        let mut pairs: Vec<_> = events
            .iter()
            .flat_map(|(name, ev)| {
                ev.channels
                    .iter()
                    .filter(|(_, ch)| ch.subscribers.contains_key(session_id))
                    .map(move |(channel, _)| (name.clone(), channel.clone()))
            })
            .collect();
        pairs.sort();
        pairs
    }

    /// Drops every event and subscription.
    pub async fn clear(&self) {
        self.events.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ChannelTransport, Outbound, Transport};
    use tokio::sync::mpsc;

    fn session(id: &str) -> (Arc<Session>, mpsc::Receiver<Outbound>) {
        let (transport, rx) = ChannelTransport::new(8);
        let transport: Arc<dyn Transport> = Arc::new(transport);
        (Arc::new(Session::new(SessionId::from(id), transport)), rx)
    }

    fn ids(sessions: &[Arc<Session>]) -> Vec<String> {
        let mut ids: Vec<_> = sessions.iter().map(|s| s.id().to_string()).collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn declare_is_idempotent() {
        let registry = EventRegistry::new();
        assert!(registry.declare("chat").await);
        assert!(!registry.declare("chat").await);
        assert!(registry.contains("chat").await);
    }

    #[tokio::test]
    async fn predeclared_events() {
        let registry = EventRegistry::with_events(["chat", "news"]);
        assert!(registry.contains("news").await);
        assert!(!registry.declare("chat").await);
    }

    #[tokio::test]
    async fn undeclared_event_is_not_found() {
        let registry = EventRegistry::new();
        let result = registry.recipients("chat", "room1").await;
        assert!(matches!(result, Err(ServerError::EventNotFound { .. })));
    }

    #[tokio::test]
    async fn unknown_channel_is_not_found() {
        let registry = EventRegistry::new();
        registry.declare("chat").await;
        let result = registry.recipients("chat", "room1").await;
        assert!(matches!(result, Err(ServerError::ChannelNotFound { .. })));
    }

    #[tokio::test]
    async fn named_channel_selects_its_subscribers() {
        let registry = EventRegistry::new();
        let (a, _ra) = session("a");
        let (b, _rb) = session("b");
        let (c, _rc) = session("c");
        registry.subscribe("chat", "room1", &a).await;
        registry.subscribe("chat", "room1", &b).await;
        registry.subscribe("chat", "room2", &c).await;

        let room1 = registry.recipients("chat", "room1").await.unwrap();
        assert_eq!(ids(&room1), ["a", "b"]);
    }

    #[tokio::test]
    async fn broadcast_deduplicates_sessions() {
        let registry = EventRegistry::new();
        let (a, _ra) = session("a");
        let (b, _rb) = session("b");
        registry.subscribe("chat", "room1", &a).await;
        registry.subscribe("chat", "room2", &a).await;
        registry.subscribe("chat", "room2", &b).await;

        let all = registry.recipients("chat", "").await.unwrap();
        assert_eq!(ids(&all), ["a", "b"]);
    }

    #[tokio::test]
    async fn subscribing_twice_keeps_one_entry() {
        let registry = EventRegistry::new();
        let (a, _ra) = session("a");
        assert!(registry.subscribe("chat", "room1", &a).await);
        assert!(!registry.subscribe("chat", "room1", &a).await);
        assert_eq!(registry.recipients("chat", "room1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_drops_empty_channel() {
        let registry = EventRegistry::new();
        let (a, _ra) = session("a");
        registry.subscribe("chat", "room1", &a).await;

        assert!(registry.unsubscribe("chat", "room1", "a").await);
        assert!(!registry.unsubscribe("chat", "room1", "a").await);
        let result = registry.recipients("chat", "room1").await;
        assert!(matches!(result, Err(ServerError::ChannelNotFound { .. })));
        assert!(registry.contains("chat").await);
    }

    #[tokio::test]
    async fn remove_session_leaves_no_trace() {
        let registry = EventRegistry::new();
        let (a, _ra) = session("a");
        let (b, _rb) = session("b");
        registry.subscribe("chat", "room1", &a).await;
        registry.subscribe("chat", "room2", &a).await;
        registry.subscribe("news", "", &a).await;
        registry.subscribe("chat", "room1", &b).await;

        assert_eq!(registry.remove_session("a").await, 3);
        assert!(registry.channels_of("a").await.is_empty());
        assert_eq!(
            registry.channels_of("b").await,
            [("chat".to_string(), "room1".to_string())]
        );
    }

    #[tokio::test]
    async fn disconnected_session_cannot_subscribe() {
        let registry = EventRegistry::new();
        let (a, _ra) = session("a");
        a.mark_disconnected();

        assert!(!registry.subscribe("chat", "room1", &a).await);
        assert!(registry.channels_of("a").await.is_empty());
        let result = registry.recipients("chat", "room1").await;
        assert!(matches!(result, Err(ServerError::ChannelNotFound { .. })));
    }

    #[tokio::test]
    async fn dropped_sessions_are_skipped() {
        let registry = EventRegistry::new();
        let (a, _ra) = session("a");
        let (b, _rb) = session("b");
        registry.subscribe("chat", "room1", &a).await;
        registry.subscribe("chat", "room1", &b).await;
        drop(b);

        let room1 = registry.recipients("chat", "room1").await.unwrap();
        assert_eq!(ids(&room1), ["a"]);
    }
}
