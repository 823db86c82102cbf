//! Key/value state store.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

/// Storage behind the read/write endpoints.
///
/// No transactions, no schema: each key holds one JSON value and the last
/// write wins.
pub trait StateStore: Send + Sync + 'static {
    /// Returns the value of `key`, if it was ever written.
    fn get(&self, key: &str) -> Option<Value>;

    /// Stores `value` under `key` and returns the stored value.
    fn set(&self, key: &str, value: Value) -> Value;
}

/// In-memory store. Contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Returns true if nothing was written.
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Value {
        self.values.write().insert(key.to_string(), value.clone());
        value
    }
}
