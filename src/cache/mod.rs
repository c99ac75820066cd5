//! In-process TTL key/value cache.
//!
//! Serves two roles: the distributed-rotation dedup flag ("this identifier
//! was already handled") and the API-token positive-auth cache. The contract
//! is just get / insert-with-ttl; a shared cache service satisfies it equally
//! well for multi-instance deployments.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Entries beyond this count trigger a full expiry sweep on insert.
const SWEEP_THRESHOLD: usize = 1024;

struct Entry<V> {
    expires_at: Instant,
    value: V,
}

/// A TTL key/value map. Cloning yields another handle to the same map.
#[derive(Clone)]
pub struct TtlCache<V: Clone> {
    inner: Arc<Mutex<HashMap<String, Entry<V>>>>,
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> TtlCache<V> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Look up a live entry. Expired entries are dropped on access.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut map = self.inner.lock().expect("cache lock poisoned");
        match map.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                map.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert a value that expires after `ttl`.
    pub fn insert(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let mut map = self.inner.lock().expect("cache lock poisoned");
        if map.len() >= SWEEP_THRESHOLD {
            let now = Instant::now();
            map.retain(|_, entry| entry.expires_at > now);
        }
        map.insert(
            key.into(),
            Entry {
                expires_at: Instant::now() + ttl,
                value,
            },
        );
    }

    /// Remove an entry, returning whether one was present.
    pub fn remove(&self, key: &str) -> bool {
        let mut map = self.inner.lock().expect("cache lock poisoned");
        map.remove(key).is_some()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").len()
    }
}
