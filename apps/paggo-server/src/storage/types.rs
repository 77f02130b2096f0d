//! Storage types

use std::path::PathBuf;

/// Storage-specific errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(PathBuf),

    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a successful write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Key relative to the storage root
    pub key: String,
    /// Absolute location on disk
    pub absolute_path: PathBuf,
    pub size: u64,
}
