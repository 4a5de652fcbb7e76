use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Slot<V> {
    value: V,
    inserted: Instant,
    last_used: Instant,
}

/// Bounded map with LRU eviction and per-entry TTL. Safe under concurrent
/// readers and writers; every operation takes the one exclusive lock
/// briefly.
pub struct TtlCache<K, V> {
    inner: Mutex<HashMap<K, Slot<V>>>,
    capacity: usize,
    ttl: Duration,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(capacity: usize, ttl: Duration) -> TtlCache<K, V> {
        TtlCache {
            inner: Mutex::new(HashMap::new()),
            capacity,
            ttl,
        }
    }

    /// Cloned value if present and fresh; expired entries are dropped on
    /// the way out.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        match map.get_mut(key) {
            Some(slot) if now.duration_since(slot.inserted) < self.ttl => {
                slot.last_used = now;
                Some(slot.value.clone())
            }
            Some(_) => {
                map.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        if !map.contains_key(&key) && map.len() >= self.capacity {
            // Evict the least recently used entry.
            if let Some(oldest) = map
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(k, _)| k.clone())
            {
                map.remove(&oldest);
            }
        }

        map.insert(
            key,
            Slot {
                value,
                inserted: now,
                last_used: now,
            },
        );
    }

    pub fn remove(&self, key: &K) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(key);
    }

    pub fn len(&self) -> usize {
        let map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys of all fresh entries, for secondary-index rebuilds.
    pub fn keys(&self) -> Vec<K> {
        let map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        map.iter()
            .filter(|(_, slot)| now.duration_since(slot.inserted) < self.ttl)
            .map(|(k, _)| k.clone())
            .collect()
    }
}
