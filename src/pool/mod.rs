//! Traffic police and connection pool.
//!
//! The general borrow/release/eviction bookkeeping follows the shape of
//! `awc`'s `ConnectionPool` (`Arc<Mutex<_>>` + per-key `VecDeque`, a scoped
//! `Acquired` release guard), and the shared-connection memorization map
//! follows the style of reqwest's HTTP/3 pool (`PoolInner` keyed by `Key`,
//! one entry per endpoint, `watch`-free here since borrowing doesn't need to
//! await a concurrent connect — see [`Pool::borrow`]).

pub(crate) mod key;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Mutex as AsyncMutex;

use crate::backend::{Connection, ResponsePromise};
use crate::pool::key::Key;

type Shared = Arc<AsyncMutex<Connection>>;

struct Bucket {
    idle: VecDeque<Shared>,
    /// Connections currently shared (HTTP/2/3) and how many responses still
    /// memorize them; a connection leaves this map when the count drops to
    /// zero and its engine reports `is_idle()`.
    memorized_counts: HashMap<u64, usize>,
}

impl Default for Bucket {
    fn default() -> Self {
        Bucket { idle: VecDeque::new(), memorized_counts: HashMap::new() }
    }
}

#[derive(Default)]
struct PoolInner {
    buckets: HashMap<Key, Bucket>,
    memorized: HashMap<ResponsePromise, Shared>,
    next_connection_id: u64,
}

/// Typed knobs for [`Pool`], following the usual `..Default::default()`
/// convention.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// How long an idle pooled connection is kept before [`Pool::evict_stale`] drops it.
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig { idle_timeout: Duration::from_secs(90) }
    }
}

/// Bounded `endpoint -> queue<Connection>` mapping plus the memorization
/// table from response to connection.
pub(crate) struct Pool {
    inner: Mutex<PoolInner>,
    idle_timeout: Duration,
}

impl Pool {
    pub(crate) fn new(config: PoolConfig) -> Self {
        Pool { inner: Mutex::new(PoolInner::default()), idle_timeout: config.idle_timeout }
    }

    pub(crate) fn next_connection_id(&self) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        inner.next_connection_id += 1;
        inner.next_connection_id
    }

    /// Pop one idle, still-available connection for `key`, if any. Expired
    /// or draining connections are dropped rather than handed out (eviction
    /// happens lazily, on the borrow path, as well as via
    /// [`Pool::evict_stale`]).
    pub(crate) async fn take_idle(&self, key: &Key) -> Option<Shared> {
        loop {
            let candidate = {
                let mut inner = self.inner.lock().unwrap();
                inner.buckets.get_mut(key).and_then(|b| b.idle.pop_front())
            };
            let conn = candidate?;
            let usable = {
                let guard = conn.lock().await;
                guard.is_available() && !guard.has_expired()
            };
            if usable {
                return Some(conn);
            }
            // Fell out of the idle queue as unusable; loop to try the next one.
        }
    }

    /// HTTP/1: exclusive borrow, returned to the idle queue once the caller
    /// is done. HTTP/2/3: rejoin the idle set immediately (shared borrows
    /// don't remove a connection from eligibility for new streams), tracked
    /// instead via [`Pool::memorize`].
    pub(crate) fn release_exclusive(&self, key: &Key, conn: Shared) {
        let mut inner = self.inner.lock().unwrap();
        inner.buckets.entry(key.clone()).or_default().idle.push_back(conn);
    }

    pub(crate) fn admit(&self, key: &Key, conn: Shared) {
        let mut inner = self.inner.lock().unwrap();
        inner.buckets.entry(key.clone()).or_default().idle.push_back(conn);
    }

    /// Record that `promise` now memorizes `conn`.
    pub(crate) fn memorize(&self, key: &Key, connection_id: u64, promise: ResponsePromise, conn: Shared) {
        let mut inner = self.inner.lock().unwrap();
        inner.memorized.insert(promise, conn);
        *inner.buckets.entry(key.clone()).or_default().memorized_counts.entry(connection_id).or_insert(0) += 1;
    }

    /// Look up a memorized connection by its promise without consuming the
    /// memorization (the caller still must call
    /// [`Pool::release_memorized`] once `get_response` has been served).
    pub(crate) fn lookup_memorized(&self, promise: ResponsePromise) -> Option<Shared> {
        self.inner.lock().unwrap().memorized.get(&promise).cloned()
    }

    /// Release one memorization. If this was the last one for the
    /// connection and the connection's engine reports `is_idle()`, the
    /// connection rejoins the idle set.
    pub(crate) async fn release_memorized(&self, key: &Key, connection_id: u64, promise: ResponsePromise) {
        let conn = {
            let mut inner = self.inner.lock().unwrap();
            let conn = inner.memorized.remove(&promise);
            if let Some(bucket) = inner.buckets.get_mut(key) {
                if let Some(count) = bucket.memorized_counts.get_mut(&connection_id) {
                    *count = count.saturating_sub(1);
                }
            }
            conn
        };

        let Some(conn) = conn else { return };
        let should_requeue = {
            let guard = conn.lock().await;
            guard.is_idle() && !guard.has_expired()
        };
        let remaining = {
            let inner = self.inner.lock().unwrap();
            inner.buckets.get(key).and_then(|b| b.memorized_counts.get(&connection_id).copied()).unwrap_or(0)
        };
        if should_requeue && remaining == 0 {
            self.admit(key, conn);
        }
    }

    /// Remove every idle connection past `idle_timeout` or already expired
    /// by GOAWAY/termination.
    pub(crate) async fn evict_stale(&self) {
        let now = Instant::now();
        let keys: Vec<Key> = self.inner.lock().unwrap().buckets.keys().cloned().collect();
        for key in keys {
            let candidates: Vec<Shared> = {
                let mut inner = self.inner.lock().unwrap();
                inner.buckets.get_mut(&key).map(|b| b.idle.drain(..).collect()).unwrap_or_default()
            };
            let mut keep = VecDeque::new();
            for conn in candidates {
                let retain = {
                    let guard = conn.lock().await;
                    !guard.has_expired() && now.duration_since(guard.last_activity) < self.idle_timeout
                };
                if retain {
                    keep.push_back(conn);
                }
            }
            let mut inner = self.inner.lock().unwrap();
            if let Some(bucket) = inner.buckets.get_mut(&key) {
                bucket.idle = keep;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_key_by_scheme_host_port() {
        let a = Key::new("https", "example.com", 443);
        let b = Key::new("https", "example.com", 443);
        let c = Key::new("https", "example.com", 8443);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn connection_ids_are_monotonic() {
        let pool = Pool::new(PoolConfig::default());
        let a = pool.next_connection_id();
        let b = pool.next_connection_id();
        assert!(b > a);
    }
}
