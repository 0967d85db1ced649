use std::path::PathBuf;
use thiserror::Error;

/// Main error type for cache construction.
///
/// Individual get/set/remove operations never surface these: a failed read
/// behaves like a miss and a failed write returns `false`. Only building a
/// store can fail hard.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("invalid cache path: {0}")]
    InvalidPath(String),
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
