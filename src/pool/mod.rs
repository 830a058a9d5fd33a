//! Connection pool contract
//!
//! Bounded pool of backend connections shared by session stores and user
//! handlers. `acquire` blocks on a condition variable until a connection is
//! free; the returned guard hands the connection back on drop after running
//! its cleanup hook. A background health checker periodically pings idle
//! connections and reconnects the ones that went stale.
//!
//! The pool is generic over the backend: anything implementing
//! [`ManagedConnection`] can be pooled, and [`KvConnection`] is the seam the
//! key-value session store consumes.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result type for pool operations
pub type PoolResult<T> = std::result::Result<T, PoolError>;

/// Pool errors
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("connection pool is not initialized")]
    Uninitialized,

    #[error("no connection became available within {0:?}")]
    Exhausted(Duration),

    #[error("backend error: {0}")]
    Backend(String),
}

/// A poolable backend connection.
pub trait ManagedConnection: Send + 'static {
    /// Liveness probe; false means the connection went stale.
    fn ping(&mut self) -> bool;

    /// Re-establish a stale connection in place.
    fn reconnect(&mut self) -> PoolResult<()>;

    /// Runs when a borrowed connection is returned: roll back whatever the
    /// borrower left uncommitted and drain pending results.
    fn cleanup(&mut self);
}

/// Key-value backend operations used by the kv-backed session store.
pub trait KvConnection: ManagedConnection {
    /// Store `value` under `key` with a time-to-live.
    fn set_ex(&mut self, key: &str, value: &str, ttl_secs: u64) -> PoolResult<()>;

    fn get(&mut self, key: &str) -> PoolResult<Option<String>>;

    fn del(&mut self, key: &str) -> PoolResult<()>;
}

struct PoolState<C> {
    idle: VecDeque<C>,
    initialized: bool,
}

struct PoolInner<C> {
    state: Mutex<PoolState<C>>,
    available: Condvar,
    acquire_timeout: Duration,
}

/// Bounded connection pool
pub struct Pool<C: ManagedConnection> {
    inner: Arc<PoolInner<C>>,
}

impl<C: ManagedConnection> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Pool {
            inner: self.inner.clone(),
        }
    }
}

impl<C: ManagedConnection> Pool<C> {
    /// Create an empty, uninitialized pool.
    pub fn new() -> Self {
        Pool {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    initialized: false,
                }),
                available: Condvar::new(),
                acquire_timeout: Duration::from_secs(5),
            }),
        }
    }

    /// Fill the pool with `capacity` connections from `factory`.
    ///
    /// Factory failures are logged and skipped; the pool starts with however
    /// many connections could be established, as long as there is at least
    /// one.
    pub fn init<F>(&self, capacity: usize, factory: F) -> PoolResult<()>
    where
        F: Fn() -> PoolResult<C>,
    {
        let mut state = self.inner.state.lock().unwrap();
        if state.initialized {
            warn!("pool already initialized, ignoring");
            return Ok(());
        }

        for i in 0..capacity {
            match factory() {
                Ok(conn) => state.idle.push_back(conn),
                Err(err) => warn!(slot = i, %err, "failed to create pooled connection"),
            }
        }

        if state.idle.is_empty() {
            return Err(PoolError::Backend(
                "no pooled connection could be established".to_string(),
            ));
        }

        info!(
            connections = state.idle.len(),
            capacity, "connection pool initialized"
        );
        state.initialized = true;
        self.inner.available.notify_all();
        Ok(())
    }

    /// Borrow a connection, blocking until one is free.
    ///
    /// The connection is pinged before being handed out; a stale one is
    /// reconnected in place. Callers must hold the guard only for the
    /// duration of one logical operation.
    pub fn acquire(&self) -> PoolResult<PooledConn<C>> {
        let mut conn = {
            let state = self.inner.state.lock().unwrap();
            if !state.initialized {
                return Err(PoolError::Uninitialized);
            }

            let (mut state, timeout) = self
                .inner
                .available
                .wait_timeout_while(state, self.inner.acquire_timeout, |s| s.idle.is_empty())
                .unwrap();
            if timeout.timed_out() {
                return Err(PoolError::Exhausted(self.inner.acquire_timeout));
            }
            state.idle.pop_front().unwrap()
        };

        if !conn.ping() {
            warn!("pooled connection went stale, reconnecting");
            conn.reconnect()?;
        }

        debug!("connection acquired from pool");
        Ok(PooledConn {
            pool: Arc::downgrade(&self.inner),
            conn: Some(conn),
        })
    }

    /// Number of idle connections right now.
    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().unwrap().idle.len()
    }

    /// Spawn the background health checker.
    ///
    /// Every `interval` it pings each idle connection and reconnects the
    /// unhealthy ones. The thread exits when the pool is dropped.
    pub fn start_health_checker(&self, interval: Duration) {
        let weak: Weak<PoolInner<C>> = Arc::downgrade(&self.inner);
        thread::Builder::new()
            .name("pool-health".to_string())
            .spawn(move || loop {
                thread::sleep(interval);
                let Some(inner) = weak.upgrade() else {
                    return;
                };

                let mut state = inner.state.lock().unwrap();
                let mut reconnected = 0usize;
                for conn in state.idle.iter_mut() {
                    if !conn.ping() {
                        match conn.reconnect() {
                            Ok(()) => reconnected += 1,
                            Err(err) => warn!(%err, "health check reconnect failed"),
                        }
                    }
                }
                if reconnected > 0 {
                    info!(reconnected, "health checker reconnected stale connections");
                }
            })
            .expect("failed to spawn pool health checker");
    }
}

impl<C: ManagedConnection> Default for Pool<C> {
    fn default() -> Self {
        Pool::new()
    }
}

/// Guard around a borrowed connection.
///
/// Dropping the guard runs the connection's cleanup hook and returns it to
/// the pool.
pub struct PooledConn<C: ManagedConnection> {
    pool: Weak<PoolInner<C>>,
    conn: Option<C>,
}

impl<C: ManagedConnection> Deref for PooledConn<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.conn.as_ref().expect("connection already released")
    }
}

impl<C: ManagedConnection> DerefMut for PooledConn<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn.as_mut().expect("connection already released")
    }
}

impl<C: ManagedConnection> Drop for PooledConn<C> {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        conn.cleanup();

        if let Some(pool) = self.pool.upgrade() {
            let mut state = pool.state.lock().unwrap();
            state.idle.push_back(conn);
            pool.available.notify_one();
            debug!("connection returned to pool");
        }
    }
}
