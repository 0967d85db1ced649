use super::kv_storage::{default_filename, KvStorage};
use crate::core::error::Result;
use crate::core::types::{DiskCacheConfig, StorageKind};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Serializes a value to the byte buffer stored on disk.
pub type ArchiveFn<V> = Arc<dyn Fn(&V) -> Option<Vec<u8>> + Send + Sync>;
/// Rebuilds a value from the stored byte buffer.
pub type UnarchiveFn<V> = Arc<dyn Fn(&[u8]) -> Option<V> + Send + Sync>;
/// Maps a key to the backing file name, forcing file-backed storage.
pub type FilenameFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

struct DiskShared<V> {
    storage: Mutex<KvStorage>,
    config: DiskCacheConfig,
    archive: ArchiveFn<V>,
    unarchive: UnarchiveFn<V>,
    filename: Option<FilenameFn>,
    path: PathBuf,
}

/// Policy layer over [`KvStorage`]: inline-size threshold, count/cost/age/
/// free-disk-space limits with a periodic trim task, and pluggable
/// archive/unarchive/filename hooks.
///
/// One mutex serializes the whole store — connection, statements and
/// filesystem — so a long trim can transiently block foreground calls on the
/// same instance. Cloning the handle shares the store.
pub struct DiskCache<V> {
    shared: Arc<DiskShared<V>>,
}

impl<V> Clone for DiskCache<V> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<V> DiskCache<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Opens a disk cache at `path` with the default bincode codec.
    pub fn open<P: AsRef<Path>>(path: P, config: DiskCacheConfig) -> Result<Self> {
        let archive: ArchiveFn<V> = Arc::new(|value| {
            bincode::serde::encode_to_vec(value, bincode::config::standard()).ok()
        });
        let unarchive: UnarchiveFn<V> = Arc::new(|bytes| {
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .ok()
                .map(|(value, _)| value)
        });
        Self::open_with_codec(path, config, archive, unarchive, None)
    }
}

impl<V> DiskCache<V> {
    /// Opens a disk cache with a caller-supplied codec and optional filename
    /// function. Fails only when the underlying store cannot be built.
    pub fn open_with_codec<P: AsRef<Path>>(
        path: P,
        config: DiskCacheConfig,
        archive: ArchiveFn<V>,
        unarchive: UnarchiveFn<V>,
        filename: Option<FilenameFn>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut storage = KvStorage::open(&path, StorageKind::Hybrid)?;
        storage.set_error_logs_enabled(config.error_logs_enabled);
        Ok(Self {
            shared: Arc::new(DiskShared {
                storage: Mutex::new(storage),
                config,
                archive,
                unarchive,
                filename,
                path,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn config(&self) -> &DiskCacheConfig {
        &self.shared.config
    }

    /// Existence probe. Touches the item's access time and may block on I/O.
    pub fn contains(&self, key: &str) -> bool {
        if key.is_empty() {
            return false;
        }
        self.shared.storage.lock().exists(key)
    }

    /// Reads and unarchives the value for `key`. A failed read or a value
    /// the codec rejects behaves like a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        self.get_with_extended(key).map(|(value, _)| value)
    }

    /// Like `get`, also returning the stored extended data.
    pub fn get_with_extended(&self, key: &str) -> Option<(V, Option<Vec<u8>>)> {
        if key.is_empty() {
            return None;
        }
        let item = self.shared.storage.lock().get(key)?;
        let bytes = item.value?;
        match (self.shared.unarchive)(&bytes) {
            Some(value) => Some((value, item.extended_data)),
            None => {
                if self.shared.config.error_logs_enabled {
                    warn!("disk cache: unarchiving value for key {key} failed");
                }
                None
            }
        }
    }

    /// Returns only the extended data stored alongside `key`.
    pub fn extended_data(&self, key: &str) -> Option<Vec<u8>> {
        if key.is_empty() {
            return None;
        }
        self.shared.storage.lock().get(key)?.extended_data
    }

    pub fn set(&self, key: &str, value: &V) -> bool {
        self.set_with_extended(key, value, None)
    }

    /// Archives and stores a value, with optional extended data.
    ///
    /// Placement: a custom filename function forces file-backed storage; by
    /// default archives of at most `inline_threshold` bytes stay inline in
    /// the manifest and larger ones become a file named by the SHA-256 of
    /// the key.
    pub fn set_with_extended(&self, key: &str, value: &V, extended: Option<&[u8]>) -> bool {
        if key.is_empty() {
            return false;
        }
        let Some(data) = (self.shared.archive)(value) else {
            if self.shared.config.error_logs_enabled {
                warn!("disk cache: archiving value for key {key} failed");
            }
            return false;
        };
        let filename = if let Some(name_fn) = &self.shared.filename {
            Some(name_fn(key))
        } else if data.len() > self.shared.config.inline_threshold {
            Some(default_filename(key))
        } else {
            None
        };
        self.shared
            .storage
            .lock()
            .save(key, &data, filename.as_deref(), extended)
    }

    pub fn remove(&self, key: &str) -> bool {
        if key.is_empty() {
            return false;
        }
        self.shared.storage.lock().remove(key)
    }

    pub fn remove_all(&self) -> bool {
        self.shared.storage.lock().remove_all()
    }

    /// Total item count, `-1` on query failure.
    pub fn total_count(&self) -> i64 {
        self.shared.storage.lock().count()
    }

    /// Total stored value size in bytes, `-1` on query failure.
    pub fn total_cost(&self) -> i64 {
        self.shared.storage.lock().total_size()
    }

    pub fn trim_to_count(&self, count: u64) {
        let count = i64::try_from(count).unwrap_or(i64::MAX);
        self.shared.storage.lock().remove_to_fit_count(count);
    }

    pub fn trim_to_cost(&self, cost: u64) {
        let cost = i64::try_from(cost).unwrap_or(i64::MAX);
        self.shared.storage.lock().remove_to_fit_size(cost);
    }

    /// Removes every item last accessed more than `max_age` ago.
    pub fn trim_to_age(&self, max_age: Duration) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        let cutoff = now - max_age.as_secs() as i64;
        self.shared.storage.lock().remove_earlier_than(cutoff);
    }

    /// One auto-trim pass: free-disk-space, then count, then age. The cost
    /// limit is only consulted by the free-space step and explicit
    /// `trim_to_cost` calls.
    fn apply_limits(&self) {
        self.trim_to_free_disk_space();
        if let Some(count) = self.shared.config.count_limit {
            self.trim_to_count(count);
        }
        if let Some(age) = self.shared.config.age_limit {
            self.trim_to_age(age);
        }
    }

    /// When device free space is below the configured floor, shrinks the
    /// store by the deficit.
    fn trim_to_free_disk_space(&self) {
        let Some(limit) = self.shared.config.free_disk_space_limit else {
            return;
        };
        let Ok(disk) = sys_info::disk_info() else {
            return;
        };
        let free_bytes = disk.free.saturating_mul(1024);
        if free_bytes >= limit {
            return;
        }
        let deficit = limit - free_bytes;
        let current = self.total_cost();
        if current <= 0 {
            return;
        }
        let target = (current as u64).saturating_sub(deficit);
        self.trim_to_cost(target);
    }
}

impl<V: Send + Sync + 'static> DiskCache<V> {
    /// Starts the periodic auto-trim task (default interval 60s).
    ///
    /// Each pass runs on the blocking pool since trimming does file and
    /// SQLite I/O. The task holds only a weak reference and stops when the
    /// last cache handle drops; abort the returned handle to stop earlier.
    pub fn spawn_auto_trim(&self) -> JoinHandle<()> {
        let interval = self.shared.config.auto_trim_interval;
        info!("starting disk cache auto-trim task (interval={:?})", interval);

        let weak: Weak<DiskShared<V>> = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else { break };
                let cache = DiskCache { shared };
                let _ = tokio::task::spawn_blocking(move || cache.apply_limits()).await;
            }
        })
    }

    /// Async variant of [`get`](Self::get) on the blocking pool.
    pub async fn get_async(&self, key: &str) -> Option<V> {
        let cache = self.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || cache.get(&key))
            .await
            .unwrap_or(None)
    }

    /// Async variant of [`set`](Self::set) on the blocking pool.
    pub async fn set_async(&self, key: &str, value: V) -> bool {
        let cache = self.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || cache.set(&key, &value))
            .await
            .unwrap_or(false)
    }

    /// Async variant of [`contains`](Self::contains) on the blocking pool.
    pub async fn contains_async(&self, key: &str) -> bool {
        let cache = self.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || cache.contains(&key))
            .await
            .unwrap_or(false)
    }

    /// Async variant of [`remove`](Self::remove) on the blocking pool.
    pub async fn remove_async(&self, key: &str) -> bool {
        let cache = self.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || cache.remove(&key))
            .await
            .unwrap_or(false)
    }

    /// Async variant of [`remove_all`](Self::remove_all) on the blocking pool.
    pub async fn remove_all_async(&self) -> bool {
        let cache = self.clone();
        tokio::task::spawn_blocking(move || cache.remove_all())
            .await
            .unwrap_or(false)
    }

    /// Async variant of [`total_count`](Self::total_count).
    pub async fn total_count_async(&self) -> i64 {
        let cache = self.clone();
        tokio::task::spawn_blocking(move || cache.total_count())
            .await
            .unwrap_or(-1)
    }

    /// Async variant of [`total_cost`](Self::total_cost).
    pub async fn total_cost_async(&self) -> i64 {
        let cache = self.clone();
        tokio::task::spawn_blocking(move || cache.total_cost())
            .await
            .unwrap_or(-1)
    }

    /// Async variant of [`trim_to_count`](Self::trim_to_count).
    pub async fn trim_to_count_async(&self, count: u64) {
        let cache = self.clone();
        let _ = tokio::task::spawn_blocking(move || cache.trim_to_count(count)).await;
    }

    /// Async variant of [`trim_to_cost`](Self::trim_to_cost).
    pub async fn trim_to_cost_async(&self, cost: u64) {
        let cache = self.clone();
        let _ = tokio::task::spawn_blocking(move || cache.trim_to_cost(cost)).await;
    }

    /// Async variant of [`trim_to_age`](Self::trim_to_age).
    pub async fn trim_to_age_async(&self, max_age: Duration) {
        let cache = self.clone();
        let _ = tokio::task::spawn_blocking(move || cache.trim_to_age(max_age)).await;
    }
}
