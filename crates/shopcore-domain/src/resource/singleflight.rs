//! Singleflight registry for deduplicating concurrent revalidations.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

/// Result of trying to acquire a singleflight slot.
pub enum SingleflightSlot<V> {
    /// We won the race and must run the operation.
    /// Contains the sender used to broadcast its outcome.
    Leader(broadcast::Sender<V>),
    /// Another task is running it; wait for its outcome.
    Follower(broadcast::Receiver<V>),
}

/// Registry of in-flight operations keyed by `K`, each broadcasting a `V`.
///
/// When multiple callers ask for the same key concurrently, only the first
/// becomes the leader and runs the operation; the rest subscribe to its
/// outcome.
pub struct Singleflight<K, V>
where
    K: Hash + Eq,
{
    in_flight: DashMap<K, broadcast::Sender<V>>,
}

impl<K, V> Singleflight<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            in_flight: DashMap::new(),
        }
    }

    /// Atomically joins or registers the operation for `key`.
    ///
    /// Check-and-insert happens under the entry lock, so two callers can
    /// never both become leader for the same key.
    pub fn acquire(&self, key: K) -> SingleflightSlot<V> {
        use dashmap::mapref::entry::Entry;

        match self.in_flight.entry(key) {
            Entry::Occupied(entry) => SingleflightSlot::Follower(entry.get().subscribe()),
            Entry::Vacant(entry) => {
                let (tx, _rx) = broadcast::channel(1);
                entry.insert(tx.clone());
                SingleflightSlot::Leader(tx)
            }
        }
    }

    /// Removes a settled operation.
    pub fn complete(&self, key: &K) {
        self.in_flight.remove(key);
    }

    /// Number of operations currently in flight.
    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}

impl<K, V> Default for Singleflight<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that removes the registry entry when the leader settles.
///
/// Owns an `Arc` to the registry so it can travel into a spawned task; if
/// that task panics the entry is still removed on unwind.
pub struct SingleflightGuard<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    singleflight: Arc<Singleflight<K, V>>,
    key: K,
    completed: bool,
}

impl<K, V> SingleflightGuard<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(singleflight: Arc<Singleflight<K, V>>, key: K) -> Self {
        Self {
            singleflight,
            key,
            completed: false,
        }
    }

    /// Mark as completed (normal path, not panic).
    pub fn complete(mut self) {
        self.singleflight.complete(&self.key);
        self.completed = true;
    }
}

impl<K, V> Drop for SingleflightGuard<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn drop(&mut self) {
        if !self.completed {
            self.singleflight.complete(&self.key);
        }
    }
}
