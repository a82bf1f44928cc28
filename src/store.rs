//! Bounded credential-store connection pool.
//!
//! The protocol core only needs the pool boundary: a fixed set of handles,
//! `acquire` blocking while the set is momentarily exhausted, `release` on
//! drop. The backing store here is an in-memory user table standing in for a
//! real database; the pool discipline is the part the server depends on.
//!
//! `acquire` waits at most the configured timeout and then fails with
//! `StoreUnavailable`, which the response path turns into an Internal Error
//! outcome instead of blocking a worker without bound.

use crate::error::{RavelError, RavelResult};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

struct StoreConn {
    users: Arc<Mutex<HashMap<String, String>>>,
}

impl StoreConn {
    /// Check a username/password pair against the store.
    fn verify(&self, user: &str, password: &str) -> bool {
        self.users
            .lock()
            .unwrap()
            .get(user)
            .is_some_and(|p| p == password)
    }

    /// Create an account. `false` if the username is taken.
    fn register(&self, user: &str, password: &str) -> bool {
        let mut users = self.users.lock().unwrap();
        if users.contains_key(user) {
            return false;
        }
        users.insert(user.to_string(), password.to_string());
        true
    }
}

pub struct CredentialPool {
    idle: Mutex<Vec<StoreConn>>,
    available: Condvar,
    acquire_timeout: Duration,
}

impl CredentialPool {
    pub fn new(handles: usize, acquire_timeout: Duration) -> Arc<Self> {
        let users = Arc::new(Mutex::new(HashMap::new()));
        let idle = (0..handles)
            .map(|_| StoreConn {
                users: users.clone(),
            })
            .collect();
        Arc::new(Self {
            idle: Mutex::new(idle),
            available: Condvar::new(),
            acquire_timeout,
        })
    }

    /// Take a handle, waiting up to the acquire timeout for one to free up.
    pub fn acquire(self: &Arc<Self>) -> RavelResult<StoreGuard> {
        let deadline = Instant::now() + self.acquire_timeout;
        let mut idle = self.idle.lock().unwrap();
        loop {
            if let Some(conn) = idle.pop() {
                return Ok(StoreGuard {
                    pool: self.clone(),
                    conn: Some(conn),
                });
            }
            let now = Instant::now();
            if now >= deadline {
                debug!("credential store acquire timed out");
                return Err(RavelError::StoreUnavailable);
            }
            let (guard, timeout) = self
                .available
                .wait_timeout(idle, deadline - now)
                .unwrap();
            idle = guard;
            if timeout.timed_out() && idle.is_empty() {
                return Err(RavelError::StoreUnavailable);
            }
        }
    }

    fn release(&self, conn: StoreConn) {
        self.idle.lock().unwrap().push(conn);
        self.available.notify_one();
    }

    pub fn idle_handles(&self) -> usize {
        self.idle.lock().unwrap().len()
    }
}

/// RAII handle: released back to the pool on drop, never across a socket wait.
pub struct StoreGuard {
    pool: Arc<CredentialPool>,
    conn: Option<StoreConn>,
}

impl StoreGuard {
    pub fn verify(&self, user: &str, password: &str) -> bool {
        self.conn.as_ref().unwrap().verify(user, password)
    }

    pub fn register(&self, user: &str, password: &str) -> bool {
        self.conn.as_ref().unwrap().register(user, password)
    }
}

impl Drop for StoreGuard {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
