pub mod disk_cache;
pub mod kv_storage;

pub use disk_cache::{ArchiveFn, DiskCache, FilenameFn, UnarchiveFn};
pub use kv_storage::{default_filename, KvStorage};
