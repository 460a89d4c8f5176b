//! Time-bounded cache for service metadata
//!
//! Entries are keyed on the parameters of the lookup that produced them and
//! expire after a fixed TTL. A cache is an ordinary value: clients that
//! should share entries are handed the same `Arc<TtlCache<_, _>>`, clients
//! that should not are given separate caches.

use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::time::{Duration, Instant};
use tracing::trace;

/// Default lifetime of a cached metadata entry
pub const DEFAULT_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// Concurrent map whose entries expire `ttl` after insertion
#[derive(Debug)]
pub struct TtlCache<K: Eq + Hash, V> {
    entries: DashMap<K, (Instant, V)>,
    ttl: Duration,
}

impl<K: Eq + Hash, V: Clone> Default for TtlCache<K, V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Live value for `key`, dropping it if expired
    pub fn get(&self, key: &K) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) => {
                let (inserted, value) = entry.value();
                if inserted.elapsed() < self.ttl {
                    return Some(value.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(key, (Instant::now(), value));
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the cached value for `key`, or run `fetch` and cache its result.
    ///
    /// Errors are returned without being cached. Concurrent misses on the
    /// same key may each run `fetch`; the last one to finish wins.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: K, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            trace!("cache hit");
            return Ok(value);
        }
        let value = fetch().await?;
        self.insert(key, value.clone());
        Ok(value)
    }
}
