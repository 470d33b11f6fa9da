// In-process TTL cache used for dashboard aggregates

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// A map whose entries expire `ttl` after insertion.
///
/// Expired entries are evicted lazily on read, or in bulk by [`TtlCache::purge_expired`].
/// Clones share the same storage.
#[derive(Debug, Clone)]
pub struct TtlCache<K, V> {
    name: &'static str,
    ttl: Duration,
    store: Arc<RwLock<HashMap<K, CacheEntry<V>>>>,
    // Bumped by invalidate/clear so a computation that started before an
    // invalidation does not write its stale result back.
    generation: Arc<AtomicU64>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            store: Arc::new(RwLock::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<K, CacheEntry<V>>> {
        self.store.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<K, CacheEntry<V>>> {
        self.store.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &K) -> Option<V> {
        {
            let store = self.read();
            match store.get(key) {
                Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        // Expired: evict under the write lock, re-checking in case it was refreshed meanwhile
        let mut store = self.write();
        if store.get(key).map(|e| e.is_expired()).unwrap_or(false) {
            store.remove(key);
        }
        None
    }

    pub fn insert(&self, key: K, value: V) {
        self.write().insert(key, CacheEntry::new(value, self.ttl));
    }

    /// Returns the cached value, or computes, stores and returns it.
    /// Errors are returned as-is and nothing is cached.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: K, f: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(hit) = self.get(&key) {
            metrics::counter!("crm.cache.hits", 1, "cache" => self.name);
            return Ok(hit);
        }
        metrics::counter!("crm.cache.misses", 1, "cache" => self.name);

        let generation = self.generation.load(Ordering::SeqCst);
        let value = f().await?;

        let mut store = self.write();
        if self.generation.load(Ordering::SeqCst) == generation {
            store.insert(key, CacheEntry::new(value.clone(), self.ttl));
        }
        Ok(value)
    }

    pub fn invalidate(&self, key: &K) {
        let mut store = self.write();
        self.generation.fetch_add(1, Ordering::SeqCst);
        store.remove(key);
    }

    pub fn clear(&self) {
        let mut store = self.write();
        self.generation.fetch_add(1, Ordering::SeqCst);
        store.clear();
        tracing::debug!(cache = self.name, "cache cleared");
    }

    /// Drops every expired entry and returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let mut store = self.write();
        let before = store.len();
        store.retain(|_, entry| !entry.is_expired());
        before - store.len()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
