// src/cache/mod.rs
//! Key-value persistence with time-to-live, one namespace per data source.
//!
//! Expiry is logical: stale entries stay on disk and are simply never returned.
//! Reads fail soft. A corrupt or expired entry is a miss and the caller refetches.

pub mod file;
pub mod memory;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;

pub use file::FileCacheStore;
pub use memory::MemoryCacheStore;

use crate::error::PipelineError;

/// One stored value plus the bookkeeping needed to decide whether it is still fresh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub namespace: String,
    pub key: String,
    pub fetched_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    pub payload: serde_json::Value,
}

impl CacheEntry {
    /// `now - fetched_at < ttl_seconds`. A TTL too large for `chrono::Duration` never expires.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        let ttl = i64::try_from(self.ttl_seconds).ok().and_then(Duration::try_seconds);
        match ttl {
            Some(ttl) => now.signed_duration_since(self.fetched_at) < ttl,
            None => true,
        }
    }
}

pub trait CacheStore: Send + Sync {
    /// Fresh payload for `(namespace, key)`, or `None` on miss, expiry or corruption.
    fn get(&self, namespace: &str, key: &str) -> Option<serde_json::Value>;

    /// Store (or overwrite) the payload. Atomic per entry; last writer wins.
    fn put(
        &self,
        namespace: &str,
        key: &str,
        payload: serde_json::Value,
        ttl_seconds: u64,
    ) -> io::Result<()>;
}

pub type SharedCache = Arc<dyn CacheStore>;

/// Typed read. A payload that no longer matches `T` counts as corrupt and reads as a miss.
pub fn get_json<T: DeserializeOwned>(store: &dyn CacheStore, namespace: &str, key: &str) -> Option<T> {
    let value = store.get(namespace, key)?;
    match serde_json::from_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            report_corrupt(&PipelineError::CacheCorrupt {
                namespace: namespace.to_string(),
                key: key.to_string(),
                cause: e.to_string(),
            });
            None
        }
    }
}

pub fn put_json<T: Serialize>(
    store: &dyn CacheStore,
    namespace: &str,
    key: &str,
    value: &T,
    ttl_seconds: u64,
) -> io::Result<()> {
    let payload =
        serde_json::to_value(value).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    store.put(namespace, key, payload, ttl_seconds)
}

pub(crate) fn report_corrupt(err: &PipelineError) {
    tracing::warn!(error = %err, "treating corrupt cache entry as miss");
    counter!("cache_corrupt_total").increment(1);
}
