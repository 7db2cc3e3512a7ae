// Scoped key/value cache shared between task executions

use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;

/// Concurrency-safe typed key/value store.
///
/// Two instances with different lifetimes pass derived state between otherwise
/// isolated executions: the pipeline cache spans the whole run, a module cache
/// spans one composed unit of tasks and is dropped when the unit finishes.
/// Values are stored type-erased; `get` reads them back through their concrete
/// type, so a key stored as one type reads as absent through any other.
#[derive(Default)]
pub struct Cache {
    store: DashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Cache {
    pub fn new() -> Self {
        Cache {
            store: DashMap::new(),
        }
    }

    pub fn set<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        self.store.insert(key.into(), Box::new(value));
    }

    /// Typed read. `None` means the key is absent or the stored value has a
    /// different type.
    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &str) -> Option<T> {
        self.store
            .get(key)
            .and_then(|entry| entry.value().downcast_ref::<T>().cloned())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get::<String>(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get::<bool>(key)
    }

    /// Initialize a key exactly once. Racing writers agree on a single stored
    /// value; later callers read it back. If the key already holds a value of
    /// a different type, the stored value is left alone and `default` is
    /// returned.
    pub fn get_or_set<T: Clone + Send + Sync + 'static>(&self, key: &str, default: T) -> T {
        let entry = self
            .store
            .entry(key.to_string())
            .or_insert_with(|| Box::new(default.clone()) as Box<dyn Any + Send + Sync>);
        entry
            .value()
            .downcast_ref::<T>()
            .cloned()
            .unwrap_or(default)
    }

    pub fn delete(&self, key: &str) {
        self.store.remove(key);
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

/// Convenience constructor for the `Arc<Cache>` handles task init expects
pub fn shared() -> Arc<Cache> {
    Arc::new(Cache::new())
}
