// src/cache.rs

//! Bounded least-recently-used cache with per-entry hit counts.
//!
//! Used for compiled expressions (per evaluator) and for parsed job
//! documents (per service). Storage and eviction are [`lru::LruCache`]; this
//! wrapper adds the hit counter and fallible fill.

use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;
use tracing::debug;

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    hits: u64,
}

#[derive(Debug)]
pub struct HitCache<K: Hash + Eq, V> {
    entries: LruCache<K, CacheEntry<V>>,
}

impl<K, V> HitCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    /// A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get a cached value, recording the hit and promoting the entry.
    pub fn get(&mut self, key: &K) -> Option<V> {
        self.entries.get_mut(key).map(|entry| {
            entry.hits += 1;
            entry.value.clone()
        })
    }

    /// Number of hits recorded for `key` (0 for a fresh or missing entry).
    pub fn hits(&self, key: &K) -> u64 {
        self.entries.peek(key).map(|e| e.hits).unwrap_or(0)
    }

    /// Insert or replace a value. When full, the least recently used entry
    /// is evicted.
    pub fn insert(&mut self, key: K, value: V) {
        let displaced = self.entries.push(key.clone(), CacheEntry { value, hits: 0 });
        if let Some((evicted, _)) = displaced.filter(|(old, _)| *old != key) {
            debug!(key = ?evicted, "cache full; evicted least recently used entry");
        }
    }

    /// Get a cached value or compute and insert it.
    pub fn get_or_try_insert_with<E>(
        &mut self,
        key: &K,
        compute: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = compute()?;
        self.insert(key.clone(), value.clone());
        Ok(value)
    }

    pub fn invalidate(&mut self, key: &K) {
        if self.entries.pop(key).is_some() {
            debug!(?key, "invalidated cache entry");
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
