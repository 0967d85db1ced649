pub mod cache;
pub mod config;
pub mod core;
pub mod storage;

// Re-export commonly used types
pub use cache::{Cache, CacheRegistry};
pub use config::{CacheSettings, DiskSettings, MemorySettings};
pub use core::{
    CacheConfig, CacheError, DiskCacheConfig, EvictionHook, MemoryCache, MemoryCacheConfig, Result,
    StorageItem, StorageKind,
};
pub use storage::{default_filename, ArchiveFn, DiskCache, FilenameFn, KvStorage, UnarchiveFn};
