//! In-memory key-value storage implementation.

use parking_lot::RwLock;
use std::collections::HashMap;

use super::{KeyValueStore, Secret, StoreError};

/// In-memory store for testing and development.
///
/// This store is not persistent; data is lost when the process exits.
pub struct MemoryStore {
    data: RwLock<HashMap<String, Secret>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }

    /// Create a memory store with initial data.
    pub fn with_data(data: HashMap<String, Secret>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Number of keys currently held.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if no keys are held.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("keys_count", &self.len())
            .finish()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &Secret) -> Result<(), StoreError> {
        self.data.write().insert(key.to_string(), value.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.data.write().remove(key);
        Ok(())
    }

    fn set_many(&self, entries: &[(&str, &Secret)]) -> Result<(), StoreError> {
        let mut data = self.data.write();
        for (key, value) in entries {
            data.insert(key.to_string(), (*value).clone());
        }
        Ok(())
    }

    fn delete_many(&self, keys: &[&str]) -> Result<(), StoreError> {
        let mut data = self.data.write();
        for key in keys {
            data.remove(*key);
        }
        Ok(())
    }

    fn apply(&self, sets: &[(&str, &Secret)], deletes: &[&str]) -> Result<(), StoreError> {
        let mut data = self.data.write();
        for (key, value) in sets {
            data.insert(key.to_string(), (*value).clone());
        }
        for key in deletes {
            data.remove(*key);
        }
        Ok(())
    }
}
