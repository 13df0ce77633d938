// src/cache/memory.rs
//! In-process cache with the same validity rules as the file store. Used by tests.

use std::collections::HashMap;
use std::io;
use std::sync::Mutex;

use super::{CacheEntry, CacheStore};
use crate::clock::SharedClock;

pub struct MemoryCacheStore {
    entries: Mutex<HashMap<(String, String), CacheEntry>>,
    clock: SharedClock,
}

impl MemoryCacheStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Number of stored entries, fresh or not.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, namespace: &str, key: &str) -> Option<serde_json::Value> {
        let now = self.clock.now();
        let g = self.entries.lock().expect("cache mutex poisoned");
        g.get(&(namespace.to_string(), key.to_string()))
            .filter(|e| e.is_valid_at(now))
            .map(|e| e.payload.clone())
    }

    fn put(
        &self,
        namespace: &str,
        key: &str,
        payload: serde_json::Value,
        ttl_seconds: u64,
    ) -> io::Result<()> {
        let entry = CacheEntry {
            namespace: namespace.to_string(),
            key: key.to_string(),
            fetched_at: self.clock.now(),
            ttl_seconds,
            payload,
        };
        self.entries
            .lock()
            .expect("cache mutex poisoned")
            .insert((namespace.to_string(), key.to_string()), entry);
        Ok(())
    }
}
