//! Get-or-compute caching for configuration lookups.
//!
//! This module provides a TTL cache that sits in front of expensive reads.
//! Features include:
//! - A disk backend shared by every process on the machine
//! - A process-local fallback chosen once, at construction, when the disk
//!   backend is unusable
//! - Per-key locking, so concurrent misses on one key run the supplier once
//!   while unrelated keys never contend
//! - Synchronous invalidation for write paths

mod backend;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, trace, warn};

pub use backend::{CacheBackend, DiskBackend, MemoryBackend};

/// TTL applied to configuration lookups.
pub const CONFIG_TTL: Duration = Duration::from_secs(300);

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// A cache entry with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    /// The cached data.
    pub data: T,
    /// When the entry was cached (Unix milliseconds).
    pub cached_at: u64,
    /// When the entry expires (Unix milliseconds).
    pub expires_at: u64,
}

impl<T> CacheEntry<T> {
    /// Create a new cache entry with the given TTL.
    pub fn new(data: T, ttl: Duration) -> Self {
        let now = now_millis();
        Self {
            data,
            cached_at: now,
            expires_at: now.saturating_add(ttl.as_millis() as u64),
        }
    }

    /// Check if the cache entry has expired.
    pub fn is_expired(&self) -> bool {
        now_millis() >= self.expires_at
    }

    /// Get the age of the cache entry.
    pub fn age(&self) -> Duration {
        Duration::from_millis(now_millis().saturating_sub(self.cached_at))
    }
}

/// TTL cache over a pluggable backend.
#[derive(Debug)]
pub struct CacheLayer {
    backend: Box<dyn CacheBackend>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CacheLayer {
    /// Use the given backend as-is.
    pub fn with_backend(backend: impl CacheBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// A process-local cache.
    pub fn in_memory() -> Self {
        Self::with_backend(MemoryBackend::new())
    }

    /// A disk cache at `dir`, or an in-memory one if `dir` is unusable.
    pub fn at_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        match DiskBackend::open(&dir) {
            Ok(disk) => {
                debug!(dir = %dir.display(), "Using disk cache backend");
                Self::with_backend(disk)
            }
            Err(e) => {
                warn!(
                    dir = %dir.display(),
                    "Disk cache unavailable ({}), falling back to in-process cache", e
                );
                Self::in_memory()
            }
        }
    }

    /// The platform cache for a namespace (usually a connection scope).
    ///
    /// Lives under `<cache dir>/workbridge/<namespace>`.
    pub fn for_namespace(namespace: &str) -> Self {
        match dirs::cache_dir() {
            Some(base) => {
                let safe = namespace.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
                Self::at_dir(base.join("workbridge").join(safe))
            }
            None => {
                warn!("No cache directory available, falling back to in-process cache");
                Self::in_memory()
            }
        }
    }

    /// Name of the active backend.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.backend.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.backend.is_empty()
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(key.to_string()).or_default().clone()
    }

    /// Return the cached value for `key`, or run `supplier` and cache it.
    ///
    /// The supplier runs at most once per miss even under concurrent callers;
    /// later callers wait for the first and read its result. Supplier errors
    /// are returned as-is and nothing is cached.
    pub fn get_or_compute<T, E, F>(&self, key: &str, ttl: Duration, supplier: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, E>,
    {
        let lock = self.key_lock(key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(raw) = self.backend.get(key) {
            match serde_json::from_value::<T>(raw) {
                Ok(value) => {
                    trace!(key, backend = self.backend.name(), "Cache hit");
                    return Ok(value);
                }
                Err(e) => {
                    debug!(key, "Discarding cache entry with unexpected shape: {}", e);
                    self.backend.remove(key);
                }
            }
        }

        trace!(key, backend = self.backend.name(), "Cache miss");
        let value = supplier()?;

        match serde_json::to_value(&value) {
            Ok(raw) => self.backend.put(key, raw, ttl),
            Err(e) => warn!(key, "Value not cacheable: {}", e),
        }
        Ok(value)
    }

    /// Drop `key` before returning.
    pub fn invalidate(&self, key: &str) {
        let lock = self.key_lock(key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.backend.remove(key);
    }
}
