//! Sessions and the session registry.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use mego_core::{Keys, Value};
use parking_lot::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ServerError, ServerResult};
use crate::transport::Transport;
use crate::upload::Uploads;

/// Opaque, unique session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Generates a fresh random ID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// One connected client.
pub struct Session {
    id: SessionId,
    transport: Arc<dyn Transport>,
    keys: RwLock<Keys>,
    uploads: Uploads,
    disconnected: AtomicBool,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("keys", &*self.keys.read())
            .field("uploads", &self.uploads.len())
            .field("closed", &self.transport.is_closed())
            .field("disconnected", &self.is_disconnected())
            .finish()
    }
}

impl Session {
    /// Creates a session bound to a transport.
    pub fn new(id: SessionId, transport: Arc<dyn Transport>) -> Self {
        Self {
            id,
            transport,
            keys: RwLock::new(Keys::new()),
            uploads: Uploads::default(),
            disconnected: AtomicBool::new(false),
        }
    }

    /// Returns the session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns a copy of a stored value.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.keys.read().get(key).cloned()
    }

    /// Stores a value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.keys.write().insert(key.into(), value.into());
    }

    /// Merges a map into the stored keys, overwriting duplicates.
    pub fn merge(&self, keys: Keys) {
        self.keys.write().extend(keys);
    }

    /// Returns a copy of all stored keys.
    pub fn keys(&self) -> Keys {
        self.keys.read().clone()
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.keys.read().get(key)?.as_str().map(str::to_string)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.keys.read().get(key)?.as_i64()
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.keys.read().get(key)?.as_f64()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.keys.read().get(key)?.as_bool()
    }

    /// Writes an encoded frame to the client.
    pub fn send(&self, frame: Vec<u8>) -> ServerResult<()> {
        self.transport.send(frame)
    }

    /// Closes the underlying connection.
    pub fn close(&self) {
        self.transport.close();
    }

    /// True once the connection is gone.
    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    /// True once the engine has started forgetting this session. A
    /// disconnected session can no longer join channels.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    pub(crate) fn mark_disconnected(&self) {
        self.disconnected.store(true, Ordering::Release);
    }

    pub(crate) fn uploads(&self) -> &Uploads {
        &self.uploads
    }
}

/// All live sessions, keyed by ID.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: tokio::sync::RwLock<HashMap<SessionId, Arc<Session>>>,
    max_sessions: usize,
}

impl SessionRegistry {
    /// Creates a registry. `max_sessions` of 0 means unlimited.
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: tokio::sync::RwLock::new(HashMap::new()),
            max_sessions,
        }
    }

    /// Allocates a session for a new connection.
    pub async fn register(&self, transport: Arc<dyn Transport>) -> ServerResult<Arc<Session>> {
        let mut sessions = self.sessions.write().await;
        if self.max_sessions > 0 && sessions.len() >= self.max_sessions {
            return Err(ServerError::SessionLimit {
                max: self.max_sessions,
            });
        }

        let mut id = SessionId::generate();
        while sessions.contains_key(&id) {
            id = SessionId::generate();
        }

        let session = Arc::new(Session::new(id.clone(), transport));
        sessions.insert(id.clone(), Arc::clone(&session));
        debug!(session_id = %id, total = sessions.len(), "Session registered");
        Ok(session)
    }

    pub async fn lookup(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Removes a session, returning it if it was registered.
    pub async fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.write().await.remove(id);
        if removed.is_some() {
            debug!(session_id = %id, "Session removed");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Point-in-time list of sessions.
    pub async fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Closes every transport and empties the registry.
    pub async fn close_all(&self) {
        let drained: Vec<_> = self.sessions.write().await.drain().collect();
        info!(count = drained.len(), "Closing all sessions");
        for (_, session) in drained {
            session.mark_disconnected();
            session.uploads().clear();
            session.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ChannelTransport, Outbound};
    use serde_json::json;

    fn transport() -> Arc<dyn Transport> {
        Arc::new(ChannelTransport::new(4).0)
    }

    #[test]
    fn session_keys() {
        let session = Session::new(SessionId::from("s1"), transport());
        session.set("name", "alice");
        session.set("age", 30);
        session.set("ratio", 0.5);
        session.set("admin", true);

        assert_eq!(session.get_str("name").as_deref(), Some("alice"));
        assert_eq!(session.get_i64("age"), Some(30));
        assert_eq!(session.get_f64("ratio"), Some(0.5));
        assert_eq!(session.get_bool("admin"), Some(true));
        assert_eq!(session.get_i64("name"), None);
        assert_eq!(session.get("missing"), None);
    }

    #[test]
    fn merge_overwrites_existing_keys() {
        let session = Session::new(SessionId::from("s1"), transport());
        session.set("name", "alice");
        session.set("lang", "en");

        let incoming = mego_core::into_keys(json!({"name": "bob", "room": 2})).unwrap();
        session.merge(incoming);

        let keys = session.keys();
        assert_eq!(keys.len(), 3);
        assert_eq!(keys["name"], json!("bob"));
        assert_eq!(keys["lang"], json!("en"));
    }

    #[tokio::test]
    async fn register_and_remove() {
        let registry = SessionRegistry::new(0);
        let a = registry.register(transport()).await.unwrap();
        let b = registry.register(transport()).await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.len().await, 2);

        assert!(registry.lookup(a.id().as_str()).await.is_some());
        assert!(registry.remove(a.id().as_str()).await.is_some());
        assert!(registry.remove(a.id().as_str()).await.is_none());
        assert!(registry.lookup(a.id().as_str()).await.is_none());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn limit_rejects_extra_sessions() {
        let registry = SessionRegistry::new(2);
        registry.register(transport()).await.unwrap();
        let second = registry.register(transport()).await.unwrap();

        let result = registry.register(transport()).await;
        assert!(matches!(result, Err(ServerError::SessionLimit { max: 2 })));

        registry.remove(second.id().as_str()).await;
        assert!(registry.register(transport()).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_registration_respects_limit() {
        let registry = Arc::new(SessionRegistry::new(8));
        let mut tasks = Vec::new();
        for _ in 0..32 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                registry.register(transport()).await.is_ok()
            }));
        }

        let mut accepted = 0;
        for task in tasks {
            if task.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 8);
        assert_eq!(registry.len().await, 8);
    }

    #[tokio::test]
    async fn close_all_closes_transports() {
        let registry = SessionRegistry::new(0);
        let (transport, mut rx) = ChannelTransport::new(4);
        let session = registry.register(Arc::new(transport)).await.unwrap();
        assert!(!session.is_closed());

        registry.close_all().await;
        assert!(registry.is_empty().await);
        assert!(session.is_closed());
        assert!(session.is_disconnected());
        assert_eq!(rx.recv().await, Some(Outbound::Close));
    }
}
