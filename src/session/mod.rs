//! Session abstraction
//!
//! Sessions are string-attribute bags identified by a 32-hex-character id
//! carried in a `session_id` cookie. The core provides the storage contract
//! and two implementations (in-memory and key-value backed); it ships no
//! session middleware of its own — user middleware drives the manager.

pub mod kv;
pub mod memory;

pub use kv::KvSessionStore;
pub use memory::InMemoryStore;

use crate::http::{Request, Response};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Default session lifetime in seconds
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 3600;

/// One user session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    id: String,
    attributes: HashMap<String, String>,
    timeout_secs: u64,
    expires_at: SystemTime,
}

impl Session {
    /// Create a session with the default lifetime.
    pub fn new(id: impl Into<String>) -> Self {
        Session::with_timeout(id, DEFAULT_SESSION_TIMEOUT_SECS)
    }

    /// Create a session expiring `timeout_secs` from now.
    pub fn with_timeout(id: impl Into<String>, timeout_secs: u64) -> Self {
        let mut session = Session {
            id: id.into(),
            attributes: HashMap::new(),
            timeout_secs,
            expires_at: SystemTime::UNIX_EPOCH,
        };
        session.refresh();
        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn remove_attribute(&mut self, key: &str) {
        self.attributes.remove(key);
    }

    pub fn clear_attributes(&mut self) {
        self.attributes.clear();
    }

    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    /// Push the expiry out by the session's timeout.
    pub fn refresh(&mut self) {
        self.expires_at = SystemTime::now() + Duration::from_secs(self.timeout_secs);
    }

    pub fn is_expired(&self) -> bool {
        SystemTime::now() > self.expires_at
    }

    pub fn expires_at(&self) -> SystemTime {
        self.expires_at
    }

    pub fn set_expires_at(&mut self, expires_at: SystemTime) {
        self.expires_at = expires_at;
    }

    /// Time until expiry, zero when already expired.
    pub fn remaining_lifetime(&self) -> Duration {
        self.expires_at
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO)
    }
}

/// Session storage contract
///
/// Implementations are shared across worker threads and must be internally
/// synchronized.
pub trait SessionStore: Send + Sync {
    fn store(&self, session: &Session);

    fn load(&self, id: &str) -> Option<Session>;

    fn remove(&self, id: &str);

    fn clear_expired(&self);
}

/// Resolves the session for a request and maintains the cookie.
pub struct SessionManager {
    store: Box<dyn SessionStore>,
}

impl SessionManager {
    pub fn new(store: Box<dyn SessionStore>) -> Self {
        SessionManager { store }
    }

    /// Load the request's session, or create a fresh one.
    ///
    /// An expired stored session is removed and replaced. Creating a session
    /// sets the `session_id` cookie on the response.
    pub fn get_session(&self, request: &Request, response: &mut Response) -> Session {
        let id = session_id_from_request(request);

        if let Some(id) = id {
            if let Some(mut session) = self.store.load(&id) {
                if session.is_expired() {
                    debug!(%id, "stored session expired, replacing");
                    self.store.remove(&id);
                } else {
                    session.refresh();
                    self.store.store(&session);
                    return session;
                }
            }
        }

        let id = generate_session_id();
        let session = Session::new(&id);
        set_session_cookie(response, &id);
        self.store.store(&session);
        debug!(%id, "created new session");
        session
    }

    /// Persist changes made to a borrowed session.
    pub fn update_session(&self, session: &Session) {
        self.store.store(session);
    }

    pub fn destroy_session(&self, id: &str) {
        self.store.remove(id);
    }

    pub fn cleanup_expired_sessions(&self) {
        self.store.clear_expired();
    }
}

/// 32 hex characters from a non-deterministic RNG.
fn generate_session_id() -> String {
    let mut rng = rand::thread_rng();
    (0..32)
        .map(|_| char::from_digit(rng.gen_range(0..16), 16).unwrap())
        .collect()
}

fn session_id_from_request(request: &Request) -> Option<String> {
    let cookie = request.header("Cookie")?;
    for part in cookie.split(';') {
        if let Some(id) = part.trim().strip_prefix("session_id=") {
            return Some(id.to_string());
        }
    }
    None
}

fn set_session_cookie(response: &mut Response, id: &str) {
    response.set_header(
        "Set-Cookie",
        format!("session_id={}; Path=/; HttpOnly", id),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;

    fn request_with_cookie(cookie: Option<&str>) -> Request {
        let mut req = Request::new();
        req.set_method(Method::Get);
        req.set_path("/".to_string());
        if let Some(cookie) = cookie {
            req.headers_mut().insert("Cookie", cookie);
        }
        req
    }

    #[test]
    fn test_session_attributes() {
        let mut session = Session::new("abc");
        session.set_attribute("user", "betty");
        assert_eq!(session.attribute("user"), Some("betty"));

        session.remove_attribute("user");
        assert_eq!(session.attribute("user"), None);

        session.set_attribute("a", "1");
        session.set_attribute("b", "2");
        session.clear_attributes();
        assert!(session.attributes().is_empty());
    }

    #[test]
    fn test_session_expiry() {
        let mut session = Session::with_timeout("abc", 3600);
        assert!(!session.is_expired());
        assert!(session.remaining_lifetime() > Duration::from_secs(3590));

        session.set_expires_at(SystemTime::now() - Duration::from_secs(1));
        assert!(session.is_expired());
        assert_eq!(session.remaining_lifetime(), Duration::ZERO);

        session.refresh();
        assert!(!session.is_expired());
    }

    #[test]
    fn test_generated_ids_are_32_hex() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_new_session_sets_cookie() {
        let manager = SessionManager::new(Box::new(InMemoryStore::new()));
        let req = request_with_cookie(None);
        let mut resp = Response::new();

        let session = manager.get_session(&req, &mut resp);

        let cookie = resp.header("Set-Cookie").unwrap();
        assert_eq!(
            cookie,
            format!("session_id={}; Path=/; HttpOnly", session.id())
        );
    }

    #[test]
    fn test_existing_session_round_trip() {
        let manager = SessionManager::new(Box::new(InMemoryStore::new()));
        let mut resp = Response::new();
        let mut session = manager.get_session(&request_with_cookie(None), &mut resp);

        session.set_attribute("user", "betty");
        manager.update_session(&session);

        let cookie = format!("session_id={}", session.id());
        let mut resp2 = Response::new();
        let loaded = manager.get_session(&request_with_cookie(Some(&cookie)), &mut resp2);

        assert_eq!(loaded.id(), session.id());
        assert_eq!(loaded.attribute("user"), Some("betty"));
        // No new cookie for an existing session.
        assert_eq!(resp2.header("Set-Cookie"), None);
    }

    #[test]
    fn test_expired_session_is_replaced() {
        let store = InMemoryStore::new();
        let mut stale = Session::new("deadbeefdeadbeefdeadbeefdeadbeef");
        stale.set_expires_at(SystemTime::now() - Duration::from_secs(10));
        store.store(&stale);

        let manager = SessionManager::new(Box::new(store));
        let req = request_with_cookie(Some("session_id=deadbeefdeadbeefdeadbeefdeadbeef"));
        let mut resp = Response::new();
        let fresh = manager.get_session(&req, &mut resp);

        assert_ne!(fresh.id(), stale.id());
        assert!(resp.header("Set-Cookie").is_some());
    }

    #[test]
    fn test_cookie_parsing_among_other_cookies() {
        let req = request_with_cookie(Some("theme=dark; session_id=cafe1234; lang=en"));
        assert_eq!(session_id_from_request(&req), Some("cafe1234".to_string()));

        let req = request_with_cookie(Some("theme=dark"));
        assert_eq!(session_id_from_request(&req), None);
    }
}
