//! Storage backends for the cache layer.
//!
//! The disk backend lives under the user cache directory and is shared by
//! every process on the machine. The memory backend is private to one process
//! and is what the layer falls back to when the disk is unusable.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use serde_json::Value;
use tracing::{debug, trace, warn};

use super::CacheEntry;

/// Default maximum disk cache size in MB.
pub const DEFAULT_MAX_CACHE_SIZE_MB: u64 = 16;

/// Default maximum number of entries held in memory.
pub const DEFAULT_MAX_MEMORY_ENTRIES: usize = 256;

/// Minimal storage capability the cache layer needs.
///
/// Implementations must not fail: a broken read is a miss and a broken
/// write is logged and forgotten.
pub trait CacheBackend: Send + Sync + fmt::Debug {
    /// Short name for logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Fetch a live (unexpired) value.
    fn get(&self, key: &str) -> Option<Value>;

    /// Store a value that expires after `ttl`.
    fn put(&self, key: &str, value: Value, ttl: Duration);

    /// Drop a value if present.
    fn remove(&self, key: &str);

    /// Number of stored entries, expired ones included.
    fn len(&self) -> usize;

    /// Whether the backend holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// File-per-key JSON cache in a directory.
#[derive(Debug)]
pub struct DiskBackend {
    dir: PathBuf,
    max_size_bytes: u64,
}

impl DiskBackend {
    /// Open (and create) the cache directory.
    ///
    /// Fails when the directory cannot be created or written to; the caller
    /// uses that as its feasibility check.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let marker = dir.join(".marker");
        fs::write(&marker, b"ok")?;
        fs::remove_file(&marker)?;

        Ok(Self {
            dir,
            max_size_bytes: DEFAULT_MAX_CACHE_SIZE_MB * 1024 * 1024,
        })
    }

    /// Override the size limit.
    pub fn with_max_size_bytes(mut self, max_size_bytes: u64) -> Self {
        self.max_size_bytes = max_size_bytes;
        self
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        self.dir.join(format!("{}.json", safe_key))
    }

    fn write_entry(&self, path: &Path, entry: &CacheEntry<Value>) -> io::Result<()> {
        let content = serde_json::to_vec(entry)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        // Write then rename so concurrent readers never see a partial file.
        let tmp = path.with_extension(format!("tmp{}", std::process::id()));
        {
            let mut file = open_private(&tmp)?;
            file.write_all(&content)?;
        }
        fs::rename(&tmp, path)
    }

    fn cache_files(&self) -> impl Iterator<Item = walkdir::DirEntry> {
        walkdir::WalkDir::new(&self.dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
    }

    fn check_size(&self) {
        let size: u64 = self
            .cache_files()
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum();
        if size > self.max_size_bytes {
            debug!(
                "Cache size {} bytes exceeds limit {} bytes, evicting",
                size, self.max_size_bytes
            );
            self.evict_oldest();
        }
    }

    /// Delete the oldest quarter of the files.
    fn evict_oldest(&self) {
        let mut entries: Vec<(PathBuf, SystemTime)> = self
            .cache_files()
            .filter_map(|e| {
                let modified = e.metadata().ok()?.modified().ok()?;
                Some((e.path().to_path_buf(), modified))
            })
            .collect();

        entries.sort_by_key(|(_, time)| *time);

        let to_delete = (entries.len() / 4).max(1);
        for (path, _) in entries.into_iter().take(to_delete) {
            if let Err(e) = fs::remove_file(&path) {
                warn!("Failed to evict cache file {:?}: {}", path, e);
            } else {
                debug!("Evicted old cache file {:?}", path);
            }
        }
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

impl CacheBackend for DiskBackend {
    fn name(&self) -> &'static str {
        "disk"
    }

    fn get(&self, key: &str) -> Option<Value> {
        let path = self.entry_path(key);
        let content = match fs::read(&path) {
            Ok(c) => c,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    debug!("Failed to read cache file {:?}: {}", path, e);
                }
                return None;
            }
        };

        let entry: CacheEntry<Value> = match serde_json::from_slice(&content) {
            Ok(e) => e,
            Err(e) => {
                debug!("Failed to parse cache entry {:?}: {}", path, e);
                let _ = fs::remove_file(&path);
                return None;
            }
        };

        if entry.is_expired() {
            trace!("Cache expired for {:?}", path);
            let _ = fs::remove_file(&path);
            return None;
        }

        trace!("Cache hit for {:?} (age: {:?})", path, entry.age());
        Some(entry.data)
    }

    fn put(&self, key: &str, value: Value, ttl: Duration) {
        let path = self.entry_path(key);
        let entry = CacheEntry::new(value, ttl);
        if let Err(e) = self.write_entry(&path, &entry) {
            warn!("Failed to write cache file {:?}: {}", path, e);
            return;
        }
        trace!("Cached data to {:?}", path);
        self.check_size();
    }

    fn remove(&self, key: &str) {
        let path = self.entry_path(key);
        match fs::remove_file(&path) {
            Ok(()) => debug!("Invalidated cache file {:?}", path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to invalidate cache file {:?}: {}", path, e),
        }
    }

    fn len(&self) -> usize {
        self.cache_files().count()
    }
}

/// Process-local map; no sharing across instances.
#[derive(Debug)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, CacheEntry<Value>>>,
    max_entries: usize,
}

impl MemoryBackend {
    /// Create an empty map with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_MEMORY_ENTRIES)
    }

    /// Create an empty map holding at most `max_entries`.
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry<Value>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries();
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                trace!(key, "Cache expired");
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.data.clone()),
            None => None,
        }
    }

    fn put(&self, key: &str, value: Value, ttl: Duration) {
        let mut entries = self.entries();
        if !entries.contains_key(key) && entries.len() >= self.max_entries {
            entries.retain(|_, e| !e.is_expired());
        }
        if !entries.contains_key(key) && entries.len() >= self.max_entries {
            let mut by_age: Vec<(String, u64)> = entries
                .iter()
                .map(|(k, e)| (k.clone(), e.cached_at))
                .collect();
            by_age.sort_by_key(|(_, cached_at)| *cached_at);
            let to_delete = (by_age.len() / 4).max(1);
            for (old_key, _) in by_age.into_iter().take(to_delete) {
                debug!(key = %old_key, "Evicted cache entry under capacity pressure");
                entries.remove(&old_key);
            }
        }
        entries.insert(key.to_string(), CacheEntry::new(value, ttl));
    }

    fn remove(&self, key: &str) {
        if self.entries().remove(key).is_some() {
            debug!(key, "Invalidated cache entry");
        }
    }

    fn len(&self) -> usize {
        self.entries().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread;
    use tempfile::tempdir;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_memory_roundtrip() {
        let backend = MemoryBackend::new();
        backend.put("types", json!(["Task", "Bug"]), MINUTE);
        assert_eq!(backend.get("types"), Some(json!(["Task", "Bug"])));
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn test_memory_expiry() {
        let backend = MemoryBackend::new();
        backend.put("types", json!(1), Duration::from_millis(30));
        thread::sleep(Duration::from_millis(80));
        assert_eq!(backend.get("types"), None);
        assert!(backend.is_empty());
    }

    #[test]
    fn test_memory_capacity_eviction() {
        let backend = MemoryBackend::with_capacity(4);
        for i in 0..4 {
            backend.put(&format!("k{}", i), json!(i), MINUTE);
            thread::sleep(Duration::from_millis(2));
        }
        backend.put("k4", json!(4), MINUTE);
        assert_eq!(backend.len(), 4);
        assert_eq!(backend.get("k0"), None);
        assert_eq!(backend.get("k4"), Some(json!(4)));
    }

    #[test]
    fn test_disk_roundtrip_and_remove() {
        let dir = tempdir().unwrap();
        let backend = DiskBackend::open(dir.path()).unwrap();
        backend.put("connections", json!({"name": "contoso"}), MINUTE);
        assert_eq!(backend.get("connections"), Some(json!({"name": "contoso"})));

        backend.remove("connections");
        assert_eq!(backend.get("connections"), None);
    }

    #[test]
    fn test_disk_shared_between_instances() {
        let dir = tempdir().unwrap();
        let first = DiskBackend::open(dir.path()).unwrap();
        let second = DiskBackend::open(dir.path()).unwrap();
        first.put("priorities", json!([1, 2, 3, 4]), MINUTE);
        assert_eq!(second.get("priorities"), Some(json!([1, 2, 3, 4])));
    }

    #[test]
    fn test_disk_expiry_removes_file() {
        let dir = tempdir().unwrap();
        let backend = DiskBackend::open(dir.path()).unwrap();
        backend.put("types", json!(1), Duration::from_millis(30));
        thread::sleep(Duration::from_millis(80));
        assert_eq!(backend.get("types"), None);
        assert_eq!(backend.len(), 0);
    }

    #[test]
    fn test_disk_corrupt_entry_is_miss() {
        let dir = tempdir().unwrap();
        let backend = DiskBackend::open(dir.path()).unwrap();
        fs::write(dir.path().join("types.json"), "not json").unwrap();
        assert_eq!(backend.get("types"), None);
        assert!(!dir.path().join("types.json").exists());
    }

    #[test]
    fn test_disk_key_sanitized() {
        let dir = tempdir().unwrap();
        let backend = DiskBackend::open(dir.path()).unwrap();
        backend.put("states:User/Story", json!(1), MINUTE);
        assert_eq!(backend.get("states:User/Story"), Some(json!(1)));
        assert!(dir.path().join("states_User_Story.json").exists());
    }

    #[test]
    fn test_disk_eviction_under_size_pressure() {
        let dir = tempdir().unwrap();
        let backend = DiskBackend::open(dir.path())
            .unwrap()
            .with_max_size_bytes(200);
        for i in 0..8 {
            backend.put(&format!("k{}", i), json!("x".repeat(40)), MINUTE);
        }
        assert!(backend.len() < 8);
    }

    #[test]
    fn test_disk_open_fails_under_a_file() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "file").unwrap();
        assert!(DiskBackend::open(blocker.join("cache")).is_err());
    }
}
