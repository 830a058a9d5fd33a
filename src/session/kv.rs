//! Key-value-backed session store
//!
//! Serializes session attributes as JSON under `session:<id>` with a TTL
//! equal to the session's remaining lifetime, so the backend expires entries
//! on its own. Connections come from the shared pool and are held only for
//! the duration of one operation.

use super::{Session, SessionStore};
use crate::pool::{KvConnection, Pool};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

const KEY_PREFIX: &str = "session:";

/// On-wire representation of a stored session
#[derive(Serialize, Deserialize)]
struct StoredSession {
    attributes: std::collections::HashMap<String, String>,
    expires_at_epoch_secs: u64,
}

/// Session store over a pooled key-value backend.
pub struct KvSessionStore<C: KvConnection> {
    pool: Pool<C>,
}

impl<C: KvConnection> KvSessionStore<C> {
    pub fn new(pool: Pool<C>) -> Self {
        KvSessionStore { pool }
    }

    fn key(id: &str) -> String {
        format!("{}{}", KEY_PREFIX, id)
    }
}

impl<C: KvConnection> SessionStore for KvSessionStore<C> {
    fn store(&self, session: &Session) {
        let ttl = session.remaining_lifetime().as_secs();
        if ttl == 0 {
            self.remove(session.id());
            return;
        }

        let stored = StoredSession {
            attributes: session.attributes().clone(),
            expires_at_epoch_secs: session
                .expires_at()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or(Duration::ZERO)
                .as_secs(),
        };
        let payload = match serde_json::to_string(&stored) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(%err, id = session.id(), "failed to serialize session");
                return;
            }
        };

        match self.pool.acquire() {
            Ok(mut conn) => {
                if let Err(err) = conn.set_ex(&Self::key(session.id()), &payload, ttl) {
                    warn!(%err, id = session.id(), "failed to store session");
                } else {
                    debug!(id = session.id(), ttl, "session stored");
                }
            }
            Err(err) => warn!(%err, "no connection available to store session"),
        }
    }

    fn load(&self, id: &str) -> Option<Session> {
        let mut conn = match self.pool.acquire() {
            Ok(conn) => conn,
            Err(err) => {
                warn!(%err, "no connection available to load session");
                return None;
            }
        };

        let payload = match conn.get(&Self::key(id)) {
            Ok(Some(payload)) => payload,
            Ok(None) => return None,
            Err(err) => {
                warn!(%err, id, "failed to load session");
                return None;
            }
        };

        let stored: StoredSession = match serde_json::from_str(&payload) {
            Ok(stored) => stored,
            Err(err) => {
                warn!(%err, id, "stored session is not valid JSON");
                return None;
            }
        };

        let mut session = Session::new(id);
        for (key, value) in stored.attributes {
            session.set_attribute(key, value);
        }
        session.set_expires_at(
            SystemTime::UNIX_EPOCH + Duration::from_secs(stored.expires_at_epoch_secs),
        );
        Some(session)
    }

    fn remove(&self, id: &str) {
        match self.pool.acquire() {
            Ok(mut conn) => {
                if let Err(err) = conn.del(&Self::key(id)) {
                    warn!(%err, id, "failed to remove session");
                }
            }
            Err(err) => warn!(%err, "no connection available to remove session"),
        }
    }

    fn clear_expired(&self) {
        // The backend expires keys through their TTL; nothing to sweep.
    }
}
