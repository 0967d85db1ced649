pub mod error;
pub mod memory;
pub mod types;

pub use error::{CacheError, Result};
pub use memory::{EvictionHook, MemoryCache};
pub use types::{CacheConfig, DiskCacheConfig, MemoryCacheConfig, StorageItem, StorageKind};
