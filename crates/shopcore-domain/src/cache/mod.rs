//! Map with per-key TTL eviction.
//!
//! [`TtlCache`] arms one timer per key. Re-setting a key cancels its timer and
//! arms a fresh one, so the eviction deadline is always `ttl` after the most
//! recent write. Manual `delete`/`clear` cancel timers before removing, and
//! dropping the cache cancels whatever is still scheduled.
//!
//! # Example
//!
//! ```rust,ignore
//! use shopcore_domain::cache::TtlCache;
//! use std::time::Duration;
//!
//! let cache = TtlCache::new(Duration::from_secs(30));
//! cache.set("order:1001".to_string(), 42);
//!
//! assert_eq!(cache.get(&"order:1001".to_string()), Some(42));
//! ```

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::timer::TimerHandle;

/// A stored value plus the timer that will evict it.
struct CacheEntry<V> {
    value: V,
    timer: TimerHandle,
    /// Matches the generation captured by `timer`; a timer only evicts the
    /// entry it was armed for.
    generation: u64,
}

/// Concurrent map whose entries expire `ttl` after they were last set.
///
/// Timers are tokio tasks, so [`set`](TtlCache::set) must be called from
/// within a tokio runtime. Reads never touch the runtime.
pub struct TtlCache<K, V>
where
    K: Eq + Hash,
{
    entries: Arc<DashMap<K, CacheEntry<V>>>,
    ttl_nanos: AtomicU64,
    next_generation: AtomicU64,
}

impl<K, V> std::fmt::Debug for TtlCache<K, V>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("ttl", &Duration::from_nanos(self.ttl_nanos.load(Ordering::Relaxed)))
            .field("len", &self.entries.len())
            .finish()
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates an empty cache whose entries live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl_nanos: AtomicU64::new(duration_to_nanos(ttl)),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Returns the TTL applied to newly armed timers.
    pub fn ttl(&self) -> Duration {
        Duration::from_nanos(self.ttl_nanos.load(Ordering::Relaxed))
    }

    /// Changes the TTL. Entries already scheduled keep their deadline.
    pub fn set_ttl(&self, ttl: Duration) {
        self.ttl_nanos
            .store(duration_to_nanos(ttl), Ordering::Relaxed);
    }

    /// Returns a clone of the value for `key`, if present.
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Returns true if `key` is present.
    pub fn has(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Stores `value` under `key` and (re)starts its eviction clock.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn set(&self, key: K, value: V) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        // The timer is armed while the shard is locked so that even a zero
        // TTL cannot fire before the entry it targets exists.
        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let timer = self.arm(key, generation);
                let previous = occupied.insert(CacheEntry {
                    value,
                    timer,
                    generation,
                });
                previous.timer.cancel();
            }
            Entry::Vacant(vacant) => {
                let timer = self.arm(key, generation);
                vacant.insert(CacheEntry {
                    value,
                    timer,
                    generation,
                });
            }
        }
    }

    /// Removes `key`, cancelling its timer. Returns the removed value.
    pub fn delete(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, entry)| {
            entry.timer.cancel();
            entry.value
        })
    }

    /// Cancels every timer and empties the map.
    pub fn clear(&self) {
        self.entries.retain(|_, entry| {
            entry.timer.cancel();
            false
        });
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the current keys.
    pub fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Snapshot of the current values.
    pub fn values(&self) -> Vec<V> {
        self.entries
            .iter()
            .map(|entry| entry.value().value.clone())
            .collect()
    }

    /// Snapshot of the current key/value pairs.
    pub fn entries(&self) -> Vec<(K, V)> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().value.clone()))
            .collect()
    }

    /// Calls `f` for every key/value pair.
    ///
    /// The map is read-locked shard by shard while `f` runs; `f` must not
    /// call back into this cache.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V),
    {
        for entry in self.entries.iter() {
            f(entry.key(), &entry.value().value);
        }
    }

    fn arm(&self, key: K, generation: u64) -> TimerHandle {
        let entries: Weak<DashMap<K, CacheEntry<V>>> = Arc::downgrade(&self.entries);
        TimerHandle::schedule(self.ttl(), move || async move {
            let Some(entries) = entries.upgrade() else {
                return;
            };
            if entries
                .remove_if(&key, |_, entry| entry.generation == generation)
                .is_some()
            {
                metrics::counter!("shopcore_ttl_evictions_total").increment(1);
            }
        })
    }
}

impl<K, V> Drop for TtlCache<K, V>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        for entry in self.entries.iter() {
            entry.value().timer.cancel();
        }
    }
}

fn duration_to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Registers TTL cache metric descriptions.
pub fn register_ttl_cache_metrics() {
    metrics::describe_counter!(
        "shopcore_ttl_evictions_total",
        "Total number of entries evicted by TTL expiry"
    );
}
