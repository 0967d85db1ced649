//! Two-tier cache facade: a fast in-memory LRU in front of the durable disk
//! store, plus an explicit name-keyed registry.

use crate::core::error::{CacheError, Result};
use crate::core::memory::MemoryCache;
use crate::core::types::CacheConfig;
use crate::storage::disk_cache::{ArchiveFn, DiskCache, FilenameFn, UnarchiveFn};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;

struct CacheShared<V> {
    name: String,
    memory: MemoryCache<V>,
    disk: DiskCache<V>,
    trim_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<V> Drop for CacheShared<V> {
    fn drop(&mut self) {
        for task in self.trim_tasks.lock().drain(..) {
            task.abort();
        }
    }
}

/// Thread-safe two-tier key-value cache.
///
/// Reads check the memory tier first and fall back to disk, promoting disk
/// hits back into memory. Writes and removals cascade to both tiers. The two
/// tiers are not updated atomically: disk is the durable source of truth and
/// memory is a lossy accelerator that refills from disk on the next read.
///
/// Cloning the handle shares both tiers; auto-trim tasks started through
/// [`start_auto_trim`](Self::start_auto_trim) are aborted when the last
/// handle drops.
pub struct Cache<V> {
    shared: Arc<CacheShared<V>>,
}

impl<V> Clone for Cache<V> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<V> Cache<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Opens a cache rooted at `path` with the default bincode disk codec.
    /// The cache name is the last path component.
    pub fn open<P: AsRef<Path>>(path: P, config: CacheConfig) -> Result<Self> {
        let disk = DiskCache::open(path.as_ref(), config.disk)?;
        Self::compose(path.as_ref(), config.memory, disk)
    }
}

impl<V: Send + Sync + 'static> Cache<V> {
    /// Opens a cache with a caller-supplied disk codec and optional filename
    /// function.
    pub fn open_with_codec<P: AsRef<Path>>(
        path: P,
        config: CacheConfig,
        archive: ArchiveFn<V>,
        unarchive: UnarchiveFn<V>,
        filename: Option<FilenameFn>,
    ) -> Result<Self> {
        let disk =
            DiskCache::open_with_codec(path.as_ref(), config.disk, archive, unarchive, filename)?;
        Self::compose(path.as_ref(), config.memory, disk)
    }

    fn compose(
        path: &Path,
        memory_config: crate::core::types::MemoryCacheConfig,
        disk: DiskCache<V>,
    ) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| CacheError::InvalidPath(path.display().to_string()))?;
        Ok(Self {
            shared: Arc::new(CacheShared {
                name,
                memory: MemoryCache::new(memory_config),
                disk,
                trim_tasks: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// The underlying memory tier.
    pub fn memory(&self) -> &MemoryCache<V> {
        &self.shared.memory
    }

    /// The underlying disk tier.
    pub fn disk(&self) -> &DiskCache<V> {
        &self.shared.disk
    }

    /// Returns the cached value, checking memory first and promoting a disk
    /// hit back into the memory tier. May block on disk I/O.
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        if key.is_empty() {
            return None;
        }
        if let Some(value) = self.shared.memory.get(key) {
            return Some(value);
        }
        let value = Arc::new(self.shared.disk.get(key)?);
        self.shared.memory.set(key, value.clone(), 0);
        Some(value)
    }

    pub fn set(&self, key: &str, value: V) -> bool {
        self.set_with_cost(key, value, 0)
    }

    /// Writes to both tiers synchronously. Returns whether the disk write
    /// succeeded; the memory tier never fails.
    pub fn set_with_cost(&self, key: &str, value: V, cost: u64) -> bool {
        if key.is_empty() {
            return false;
        }
        let value = Arc::new(value);
        self.shared.memory.set(key, value.clone(), cost);
        self.shared.disk.set(key, &value)
    }

    /// Writes the memory tier now and the disk tier on the blocking pool,
    /// without waiting for it.
    pub fn set_background(&self, key: &str, value: V) {
        if key.is_empty() {
            return;
        }
        let value = Arc::new(value);
        self.shared.memory.set(key, value.clone(), 0);
        let disk = self.shared.disk.clone();
        let key = key.to_string();
        let _ = tokio::task::spawn_blocking(move || disk.set(&key, &value));
    }

    /// Membership probe: memory first (cheap), then a disk existence check
    /// that may block on I/O.
    pub fn contains(&self, key: &str) -> bool {
        if key.is_empty() {
            return false;
        }
        self.shared.memory.contains(key) || self.shared.disk.contains(key)
    }

    /// Removes the key from both tiers. Removing an absent key is a no-op.
    pub fn remove(&self, key: &str) {
        if key.is_empty() {
            return;
        }
        self.shared.memory.remove(key);
        self.shared.disk.remove(key);
    }

    /// Clears both tiers.
    pub fn remove_all(&self) {
        self.shared.memory.remove_all();
        self.shared.disk.remove_all();
    }

    /// Starts the auto-trim tasks for both tiers. Idempotent callers should
    /// invoke this once; tasks stop when the last cache handle drops.
    pub fn start_auto_trim(&self) {
        let mut tasks = self.shared.trim_tasks.lock();
        tasks.push(self.shared.memory.spawn_auto_trim());
        tasks.push(self.shared.disk.spawn_auto_trim());
    }

    /// Async variant of [`get`](Self::get) on the blocking pool.
    pub async fn get_async(&self, key: &str) -> Option<Arc<V>> {
        if let Some(value) = self.shared.memory.get(key) {
            return Some(value);
        }
        let cache = self.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || cache.get(&key))
            .await
            .unwrap_or(None)
    }

    /// Async variant of [`set`](Self::set): memory now, disk awaited on the
    /// blocking pool.
    pub async fn set_async(&self, key: &str, value: V) -> bool {
        if key.is_empty() {
            return false;
        }
        let value = Arc::new(value);
        self.shared.memory.set(key, value.clone(), 0);
        let disk = self.shared.disk.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || disk.set(&key, &value))
            .await
            .unwrap_or(false)
    }

    /// Async variant of [`contains`](Self::contains).
    pub async fn contains_async(&self, key: &str) -> bool {
        if self.shared.memory.contains(key) {
            return true;
        }
        let disk = self.shared.disk.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || disk.contains(&key))
            .await
            .unwrap_or(false)
    }

    /// Async variant of [`remove`](Self::remove): memory now, disk awaited
    /// on the blocking pool.
    pub async fn remove_async(&self, key: &str) {
        if key.is_empty() {
            return;
        }
        self.shared.memory.remove(key);
        let disk = self.shared.disk.clone();
        let key = key.to_string();
        let _ = tokio::task::spawn_blocking(move || disk.remove(&key)).await;
    }

    /// Async variant of [`remove_all`](Self::remove_all).
    pub async fn remove_all_async(&self) {
        self.shared.memory.remove_all();
        let disk = self.shared.disk.clone();
        let _ = tokio::task::spawn_blocking(move || disk.remove_all()).await;
    }
}

/// Explicit name-keyed cache registry.
///
/// Replaces process-wide shared singletons: the application constructs one
/// registry with a root directory and a template config, and
/// `get_or_create` hands out one shared [`Cache`] handle per name. Multiple
/// registries over the same root would make the caches unstable, exactly
/// like multiple caches over one path.
pub struct CacheRegistry<V> {
    root: PathBuf,
    config: CacheConfig,
    caches: Mutex<HashMap<String, Cache<V>>>,
}

impl<V> CacheRegistry<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new<P: AsRef<Path>>(root: P, config: CacheConfig) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            config,
            caches: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cache registered under `name`, creating it at
    /// `<root>/<name>` on first use.
    pub fn get_or_create(&self, name: &str) -> Result<Cache<V>> {
        if name.is_empty() {
            return Err(CacheError::InvalidPath("empty cache name".to_string()));
        }
        let mut caches = self.caches.lock();
        if let Some(cache) = caches.get(name) {
            return Ok(cache.clone());
        }
        let cache = Cache::open(self.root.join(name), self.config.clone())?;
        caches.insert(name.to_string(), cache.clone());
        Ok(cache)
    }

    /// Drops the registry's handle for `name`; live clones stay usable.
    pub fn evict_handle(&self, name: &str) {
        self.caches.lock().remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open(dir: &tempfile::TempDir) -> Cache<String> {
        Cache::open(dir.path().join("cache"), CacheConfig::default()).unwrap()
    }

    #[test]
    fn test_set_reaches_both_tiers() {
        let dir = tempdir().unwrap();
        let cache = open(&dir);

        assert!(cache.set("k", "value".to_string()));
        assert!(cache.memory().contains("k"));
        assert!(cache.disk().contains("k"));
        assert_eq!(cache.get("k").as_deref(), Some(&"value".to_string()));
    }

    #[test]
    fn test_disk_hit_promotes_into_memory() {
        let dir = tempdir().unwrap();
        let cache = open(&dir);

        // Write only the disk tier, as if the memory tier had been evicted.
        assert!(cache.disk().set("k", &"warm".to_string()));
        assert!(!cache.memory().contains("k"));

        assert_eq!(cache.get("k").as_deref(), Some(&"warm".to_string()));
        assert!(cache.memory().contains("k"));
    }

    #[test]
    fn test_remove_cascades() {
        let dir = tempdir().unwrap();
        let cache = open(&dir);

        cache.set("k", "value".to_string());
        cache.remove("k");
        assert!(!cache.contains("k"));
        assert!(!cache.memory().contains("k"));
        assert!(!cache.disk().contains("k"));

        // Second removal of the same key is a no-op.
        cache.remove("k");
        assert!(!cache.contains("k"));
    }

    #[test]
    fn test_memory_eviction_heals_from_disk() {
        let dir = tempdir().unwrap();
        let cache = open(&dir);

        cache.set("k", "value".to_string());
        cache.memory().remove_all();
        assert_eq!(cache.get("k").as_deref(), Some(&"value".to_string()));
    }

    #[test]
    fn test_name_is_last_path_component() {
        let dir = tempdir().unwrap();
        let cache: Cache<String> =
            Cache::open(dir.path().join("thumbs"), CacheConfig::default()).unwrap();
        assert_eq!(cache.name(), "thumbs");
    }

    #[test]
    fn test_registry_returns_shared_instance() {
        let dir = tempdir().unwrap();
        let registry: CacheRegistry<String> =
            CacheRegistry::new(dir.path(), CacheConfig::default());

        let a = registry.get_or_create("images").unwrap();
        let b = registry.get_or_create("images").unwrap();
        a.set("k", "value".to_string());
        assert_eq!(b.get("k").as_deref(), Some(&"value".to_string()));

        assert!(registry.get_or_create("").is_err());
    }

    #[tokio::test]
    async fn test_async_surface() {
        let dir = tempdir().unwrap();
        let cache = open(&dir);

        assert!(cache.set_async("k", "value".to_string()).await);
        assert!(cache.contains_async("k").await);
        assert_eq!(cache.get_async("k").await.as_deref(), Some(&"value".to_string()));

        cache.remove_async("k").await;
        assert!(!cache.contains_async("k").await);

        cache.set_async("k2", "v2".to_string()).await;
        cache.remove_all_async().await;
        assert!(!cache.contains("k2"));
    }
}
