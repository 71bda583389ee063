use std::path::{Path, PathBuf};

use thiserror::Error;

/// Keel error types
#[derive(Error, Debug)]
pub enum KeelError {
    /// On-disk cache contents violate the cache's own invariants.
    ///
    /// Never recovered from automatically: once any invariant is broken the
    /// whole cache directory is considered untrustworthy.
    #[error(
        "Cache corrupted: {message}. Delete the cache directory at {} and try again",
        cache_dir.display()
    )]
    CacheCorrupted { cache_dir: PathBuf, message: String },

    /// Malformed `sha256:<hex>` digest or bare hash
    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    /// Malformed image reference
    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    /// Layer entries or cached layer handles that cannot be built
    #[error("Layer build error: {0}")]
    LayerBuild(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl KeelError {
    /// Build a corruption error for the cache rooted at `cache_dir`.
    pub fn corrupted(cache_dir: &Path, message: impl Into<String>) -> Self {
        KeelError::CacheCorrupted {
            cache_dir: cache_dir.to_path_buf(),
            message: message.into(),
        }
    }

    /// Whether this error means the cache must be discarded rather than retried.
    pub fn is_corruption(&self) -> bool {
        matches!(self, KeelError::CacheCorrupted { .. })
    }
}

impl From<serde_json::Error> for KeelError {
    fn from(err: serde_json::Error) -> Self {
        KeelError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for KeelError {
    fn from(err: serde_yaml::Error) -> Self {
        KeelError::SerializationError(err.to_string())
    }
}

/// Result type alias for keel operations
pub type Result<T> = std::result::Result<T, KeelError>;
