use std::time::Duration;

/// Configuration for the in-memory LRU tier.
///
/// A `None` limit means unlimited: the auto-trim task skips that dimension
/// entirely and explicit `trim_to_*` calls are the only way to shrink it.
#[derive(Debug, Clone)]
pub struct MemoryCacheConfig {
    /// Maximum number of entries kept after a trim pass
    pub count_limit: Option<u64>,
    /// Maximum total cost kept after a trim pass
    pub cost_limit: Option<u64>,
    /// Maximum time since last access before an entry is trimmed
    pub age_limit: Option<Duration>,
    /// Interval between auto-trim passes
    pub auto_trim_interval: Duration,
    /// Drop every entry when a memory-pressure signal is delivered
    pub clear_on_memory_pressure: bool,
    /// Drop every entry when a backgrounding signal is delivered
    pub clear_on_backgrounding: bool,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            count_limit: None,
            cost_limit: None,
            age_limit: None,
            auto_trim_interval: Duration::from_secs(5),
            clear_on_memory_pressure: true,
            clear_on_backgrounding: true,
        }
    }
}

/// Configuration for the disk tier.
#[derive(Debug, Clone)]
pub struct DiskCacheConfig {
    /// Values of at most this many bytes are stored inline in the manifest;
    /// anything larger becomes a standalone file in the data directory
    pub inline_threshold: usize,
    /// Maximum number of stored items kept after a trim pass
    pub count_limit: Option<u64>,
    /// Maximum total value size in bytes kept after a trim pass
    pub cost_limit: Option<u64>,
    /// Maximum time since last access before an item is trimmed
    pub age_limit: Option<Duration>,
    /// Minimum free disk space in bytes the device should retain; when free
    /// space drops below this, the auto-trim pass shrinks the store by the
    /// deficit
    pub free_disk_space_limit: Option<u64>,
    /// Interval between auto-trim passes
    pub auto_trim_interval: Duration,
    /// Emit a `tracing` warning for every failed storage operation
    pub error_logs_enabled: bool,
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        Self {
            inline_threshold: 20 * 1024,
            count_limit: None,
            cost_limit: None,
            age_limit: None,
            free_disk_space_limit: None,
            auto_trim_interval: Duration::from_secs(60),
            error_logs_enabled: false,
        }
    }
}

/// Combined configuration for the two-tier [`Cache`](crate::cache::Cache)
/// facade.
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    pub memory: MemoryCacheConfig,
    pub disk: DiskCacheConfig,
}

/// Where `KvStorage` keeps value bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageKind {
    /// Every value is written to a standalone file; the manifest only holds
    /// metadata
    File,
    /// Every value is stored inline as a BLOB column
    Sqlite,
    /// File-backed when the caller supplies a filename, inline otherwise
    #[default]
    Hybrid,
}

/// One manifest row, plus the value bytes when loaded with `get`.
///
/// Exactly one of the inline BLOB column and the backing file holds the
/// actual bytes; `filename` is `Some` iff the value is file-backed.
#[derive(Debug, Clone, Default)]
pub struct StorageItem {
    pub key: String,
    /// Value bytes; `None` for metadata-only lookups (`get_info`)
    pub value: Option<Vec<u8>>,
    /// Backing file name relative to the data directory
    pub filename: Option<String>,
    /// Value size in bytes as recorded in the manifest
    pub size: i64,
    /// Last modification time, unix seconds
    pub mod_time: i64,
    /// Last access time, unix seconds; touched by every read
    pub access_time: i64,
    /// Opaque caller-defined side-channel metadata
    pub extended_data: Option<Vec<u8>>,
}
