//! Flat id→object registries
//!
//! Transactions and the background tasks refer to values and indexes by
//! id rather than by pointer, so the components stay decoupled; these
//! registries resolve the ids back. Both are plain injected services
//! owned by the engine, not process-wide singletons.

use crate::config::EngineConfig;
use crate::storage::index::SkipList;
use crate::storage::lock::{LockRegistry, RwLock};
use crate::storage::value::Value;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// id → [`Value`] lookup for every live value.
pub struct ValueRegistry {
    next_id: AtomicU64,
    values: Mutex<HashMap<u64, Arc<Value>>>,
}

impl ValueRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(0),
            values: Mutex::new(HashMap::new()),
        })
    }

    /// Mint and register a value around `lock`.
    pub fn new_value(&self, lock: Arc<RwLock>) -> Arc<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let value = Arc::new(Value::new(id, lock));
        self.values.lock().insert(id, value.clone());
        value
    }

    pub fn get(&self, id: u64) -> Option<Arc<Value>> {
        self.values.lock().get(&id).cloned()
    }

    /// Deregister a vacuumed value.
    pub fn remove(&self, id: u64) {
        self.values.lock().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}

/// id → [`SkipList`] lookup, so write-set entries can name the index a
/// key must be vacuumed from.
pub struct IndexRegistry {
    next_id: AtomicU64,
    indexes: Mutex<HashMap<u64, Arc<SkipList>>>,
}

impl IndexRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(0),
            indexes: Mutex::new(HashMap::new()),
        })
    }

    /// Mint and register an index wired to the given registries.
    pub fn create_index(
        &self,
        config: &EngineConfig,
        values: Arc<ValueRegistry>,
        locks: Arc<LockRegistry>,
    ) -> Arc<SkipList> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let index = Arc::new(SkipList::new(id, config, values, locks));
        self.indexes.lock().insert(id, index.clone());
        index
    }

    pub fn get(&self, id: u64) -> Option<Arc<SkipList>> {
        self.indexes.lock().get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_registry_round_trip() {
        let locks = LockRegistry::new();
        let registry = ValueRegistry::new();
        let value = registry.new_value(locks.new_lock());
        assert_eq!(registry.get(value.id()).unwrap().id(), value.id());

        registry.remove(value.id());
        assert!(registry.get(value.id()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_index_registry_round_trip() {
        let registry = IndexRegistry::new();
        let index = registry.create_index(
            &EngineConfig::default(),
            ValueRegistry::new(),
            LockRegistry::new(),
        );
        assert_eq!(registry.get(index.id()).unwrap().id(), index.id());
        assert!(registry.get(index.id() + 1).is_none());
    }
}
