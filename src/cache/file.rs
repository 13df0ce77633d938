// src/cache/file.rs
//! Durable cache: `<root>/<namespace>/<sha256(key)>.json`, written via temp file + rename.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use sha2::{Digest, Sha256};

use super::{report_corrupt, CacheEntry, CacheStore};
use crate::clock::SharedClock;
use crate::error::PipelineError;

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

pub struct FileCacheStore {
    root: PathBuf,
    clock: SharedClock,
}

impl FileCacheStore {
    /// Creates the root directory (best-effort); namespaces are created lazily on `put`.
    pub fn new(root: impl Into<PathBuf>, clock: SharedClock) -> Self {
        let root = root.into();
        if let Err(e) = fs::create_dir_all(&root) {
            tracing::warn!(error = %e, dir = %root.display(), "cache dir not created");
        }
        Self { root, clock }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, namespace: &str, key: &str) -> PathBuf {
        self.root.join(namespace).join(format!("{}.json", hash_key(key)))
    }

    fn read_entry(&self, path: &Path) -> io::Result<String> {
        let mut file = fs::File::open(path)?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        Ok(buf)
    }
}

impl CacheStore for FileCacheStore {
    fn get(&self, namespace: &str, key: &str) -> Option<serde_json::Value> {
        let path = self.entry_path(namespace, key);
        let raw = match self.read_entry(&path) {
            Ok(s) => s,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::debug!(error = %e, path = %path.display(), "cache read failed");
                }
                counter!("cache_misses_total", "namespace" => namespace.to_string()).increment(1);
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(e) => e,
            Err(e) => {
                report_corrupt(&PipelineError::CacheCorrupt {
                    namespace: namespace.to_string(),
                    key: key.to_string(),
                    cause: e.to_string(),
                });
                counter!("cache_misses_total", "namespace" => namespace.to_string()).increment(1);
                return None;
            }
        };

        // Guards against a digest collision or a hand-edited file.
        if entry.key != key || entry.namespace != namespace {
            counter!("cache_misses_total", "namespace" => namespace.to_string()).increment(1);
            return None;
        }

        if !entry.is_valid_at(self.clock.now()) {
            tracing::debug!(namespace, key, "cache entry expired");
            counter!("cache_misses_total", "namespace" => namespace.to_string()).increment(1);
            return None;
        }

        counter!("cache_hits_total", "namespace" => namespace.to_string()).increment(1);
        Some(entry.payload)
    }

    fn put(
        &self,
        namespace: &str,
        key: &str,
        payload: serde_json::Value,
        ttl_seconds: u64,
    ) -> io::Result<()> {
        let path = self.entry_path(namespace, key);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let entry = CacheEntry {
            namespace: namespace.to_string(),
            key: key.to_string(),
            fetched_at: self.clock.now(),
            ttl_seconds,
            payload,
        };
        let json = serde_json::to_string(&entry)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        // Unique temp name per writer so concurrent puts never share a half-written file.
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("json.{}.{seq}.tmp", std::process::id()));
        let mut f = fs::File::create(&tmp)?;
        f.write_all(json.as_bytes())?;
        f.sync_all()?;
        drop(f);
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        Ok(())
    }
}

fn hash_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
