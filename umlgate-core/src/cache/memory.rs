//! Bounded in-process cache with TTL-on-read.
//!
//! Capacity is enforced FIFO by *original* insertion order: overwriting a key
//! that is already present keeps its place in the queue. Expired entries are
//! never removed proactively; a read past the TTL is simply a miss.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::key::CacheKey;
use super::traits::CacheStats;

/// A cached value and the instant it was stored.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: CacheKey,
    pub payload: V,
    pub stored_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_fresh_at(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.stored_at) < ttl
    }
}

struct Inner<V> {
    entries: HashMap<CacheKey, CacheEntry<V>>,
    order: VecDeque<CacheKey>,
}

/// In-memory cache tier.
pub struct MemoryCache<V> {
    ttl: Duration,
    max_entries: usize,
    inner: Mutex<Inner<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<V: Clone> MemoryCache<V> {
    /// Create a cache holding at most `max_entries` (minimum 1) for `ttl`.
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Fresh value for `key`, or `None`.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    /// Lookup evaluated at `now` instead of the wall clock.
    pub fn get_at(&self, key: &CacheKey, now: Instant) -> Option<V> {
        let inner = self.inner.lock();
        let found = inner
            .entries
            .get(key)
            .filter(|entry| entry.is_fresh_at(now, self.ttl))
            .map(|entry| entry.payload.clone());
        drop(inner);

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Value for `key` regardless of age. Does not count as a hit or miss.
    pub fn peek(&self, key: &CacheKey) -> Option<V> {
        self.inner
            .lock()
            .entries
            .get(key)
            .map(|entry| entry.payload.clone())
    }

    /// Whether a fresh entry exists. Does not count as a hit or miss.
    pub fn contains_fresh(&self, key: &CacheKey) -> bool {
        let now = Instant::now();
        self.inner
            .lock()
            .entries
            .get(key)
            .is_some_and(|entry| entry.is_fresh_at(now, self.ttl))
    }

    /// Insert or overwrite `key`, then evict from the front while over capacity.
    pub fn set(&self, key: CacheKey, payload: V) {
        let mut inner = self.inner.lock();
        let entry = CacheEntry {
            key: key.clone(),
            payload,
            stored_at: Instant::now(),
        };
        if inner.entries.insert(key.clone(), entry).is_none() {
            inner.order.push_back(key);
        }

        while inner.entries.len() > self.max_entries {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            if inner.entries.remove(&oldest).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %oldest, "Evicted memory cache entry");
            }
        }
    }

    /// Remove `key`. Returns whether an entry was present.
    pub fn delete(&self, key: &CacheKey) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.entries.remove(key).is_some();
        if removed {
            inner.order.retain(|queued| queued != key);
        }
        removed
    }

    /// Remove every entry. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.entries.len();
        inner.entries.clear();
        inner.order.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys in eviction order (front is evicted first).
    pub fn keys(&self) -> Vec<CacheKey> {
        self.inner.lock().order.iter().cloned().collect()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entry_count: self.len() as u64,
            bytes: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(s: &str) -> CacheKey {
        CacheKey::alias(s)
    }

    #[test]
    fn test_get_returns_fresh_entry() {
        let cache = MemoryCache::new(Duration::from_secs(60), 10);
        cache.set(key("a"), 1);
        assert_eq!(cache.get(&key("a")), Some(1));
        assert_eq!(cache.get(&key("b")), None);
    }

    #[test]
    fn test_expired_entry_is_miss_but_not_deleted() {
        let cache = MemoryCache::new(Duration::from_secs(60), 10);
        cache.set(key("a"), 1);

        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(cache.get_at(&key("a"), later), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.peek(&key("a")), Some(1));
    }

    #[test]
    fn test_evicts_earliest_inserted_not_least_recently_used() {
        let cache = MemoryCache::new(Duration::from_secs(60), 2);
        cache.set(key("a"), 1);
        cache.set(key("b"), 2);

        // Reading "a" must not protect it from eviction.
        assert_eq!(cache.get(&key("a")), Some(1));
        cache.set(key("c"), 3);

        assert_eq!(cache.get(&key("a")), None);
        assert_eq!(cache.get(&key("b")), Some(2));
        assert_eq!(cache.get(&key("c")), Some(3));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_overwrite_keeps_original_position() {
        let cache = MemoryCache::new(Duration::from_secs(60), 2);
        cache.set(key("a"), 1);
        cache.set(key("b"), 2);
        cache.set(key("a"), 10);
        cache.set(key("c"), 3);

        assert_eq!(cache.get(&key("a")), None);
        assert_eq!(cache.get(&key("b")), Some(2));
        assert_eq!(cache.keys(), vec![key("b"), key("c")]);
    }

    #[test]
    fn test_delete_then_reinsert_goes_to_back() {
        let cache = MemoryCache::new(Duration::from_secs(60), 2);
        cache.set(key("a"), 1);
        cache.set(key("b"), 2);
        assert!(cache.delete(&key("a")));
        cache.set(key("a"), 3);
        cache.set(key("c"), 4);

        assert_eq!(cache.get(&key("b")), None);
        assert_eq!(cache.get(&key("a")), Some(3));
    }

    #[test]
    fn test_clear_reports_count() {
        let cache = MemoryCache::new(Duration::from_secs(60), 10);
        cache.set(key("a"), 1);
        cache.set(key("b"), 2);
        assert_eq!(cache.clear(), 2);
        assert!(cache.is_empty());
    }

    proptest! {
        #[test]
        fn prop_n_plus_one_inserts_evict_first(n in 1usize..32) {
            let cache = MemoryCache::new(Duration::from_secs(60), n);
            for i in 0..=n {
                cache.set(key(&format!("k{}", i)), i);
            }
            prop_assert_eq!(cache.len(), n);
            prop_assert_eq!(cache.get(&key("k0")), None);
            for i in 1..=n {
                let expected = Some(i);
                prop_assert_eq!(cache.get(&key(&format!("k{}", i))), expected);
            }
        }
    }
}
