//! Process-wide registry of named coalescing primitives.
//!
//! Batch windows, partitioned batchers and single-flight resources are only
//! useful when every caller shares the same instance. The registry hands out
//! one shared instance per `(type, name)` pair, created on first use.

use std::any::{Any, TypeId};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

type Slot = Arc<dyn Any + Send + Sync>;

/// Lazily-initialized, named shared instances.
///
/// Two lookups with the same name but different types never collide.
#[derive(Default)]
pub struct PrimitiveRegistry {
    entries: DashMap<(TypeId, String), Slot>,
}

impl std::fmt::Debug for PrimitiveRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimitiveRegistry")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl PrimitiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the instance registered under `name`, creating it with `init`
    /// if absent.
    ///
    /// `init` runs at most once per `(T, name)`, even under concurrent calls.
    pub fn get_or_insert_with<T, F>(&self, name: &str, init: F) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let slot = self
            .entries
            .entry((TypeId::of::<T>(), name.to_string()))
            .or_insert_with(|| {
                debug!(name, kind = std::any::type_name::<T>(), "registering primitive");
                Arc::new(init()) as Slot
            })
            .clone();
        downcast(slot)
    }

    /// Returns the instance registered under `name`, if any.
    pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.entries
            .get(&(TypeId::of::<T>(), name.to_string()))
            .map(|slot| downcast(slot.clone()))
    }

    /// Removes the instance registered under `name`. Holders of the returned
    /// `Arc` keep using it; later lookups create a fresh one.
    pub fn remove<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.entries
            .remove(&(TypeId::of::<T>(), name.to_string()))
            .map(|(_, slot)| downcast(slot))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn downcast<T: Send + Sync + 'static>(slot: Slot) -> Arc<T> {
    match slot.downcast::<T>() {
        Ok(value) => value,
        // Slots are keyed by TypeId::of::<T>().
        Err(_) => unreachable!("registry slot type does not match its key"),
    }
}
