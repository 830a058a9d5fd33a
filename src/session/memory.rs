//! In-memory session store

use super::{Session, SessionStore};
use std::collections::HashMap;
use std::sync::Mutex;

/// Process-local session store backed by a map.
///
/// Sessions do not survive a restart; use the kv-backed store when they
/// should.
#[derive(Default)]
pub struct InMemoryStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore::default()
    }

    /// Number of stored sessions, expired ones included.
    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().unwrap().is_empty()
    }
}

impl SessionStore for InMemoryStore {
    fn store(&self, session: &Session) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id().to_string(), session.clone());
    }

    fn load(&self, id: &str) -> Option<Session> {
        self.sessions.lock().unwrap().get(id).cloned()
    }

    fn remove(&self, id: &str) {
        self.sessions.lock().unwrap().remove(id);
    }

    fn clear_expired(&self) {
        self.sessions
            .lock()
            .unwrap()
            .retain(|_, session| !session.is_expired());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    #[test]
    fn test_store_load_remove() {
        let store = InMemoryStore::new();
        let mut session = Session::new("abc");
        session.set_attribute("k", "v");

        store.store(&session);
        let loaded = store.load("abc").unwrap();
        assert_eq!(loaded.attribute("k"), Some("v"));

        store.remove("abc");
        assert!(store.load("abc").is_none());
    }

    #[test]
    fn test_store_overwrites() {
        let store = InMemoryStore::new();
        let mut session = Session::new("abc");
        store.store(&session);

        session.set_attribute("k", "v2");
        store.store(&session);

        assert_eq!(store.len(), 1);
        assert_eq!(store.load("abc").unwrap().attribute("k"), Some("v2"));
    }

    #[test]
    fn test_clear_expired_keeps_live_sessions() {
        let store = InMemoryStore::new();

        let live = Session::new("live");
        let mut dead = Session::new("dead");
        dead.set_expires_at(SystemTime::now() - Duration::from_secs(1));

        store.store(&live);
        store.store(&dead);
        store.clear_expired();

        assert!(store.load("live").is_some());
        assert!(store.load("dead").is_none());
    }
}
