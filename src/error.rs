//! Error types for the sprint cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors that can occur inside the cache subsystem.
///
/// Only operations with an explicit removal guarantee (`delete`,
/// `delete_pattern`, `clear`) hand these to callers. The read/write hot
/// path logs and counts them instead.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Shared tier unreachable or command failed
    #[error("Shared tier error during {operation}: {reason}")]
    Backend { operation: String, reason: String },

    /// Value could not be serialized for storage
    #[error("Failed to serialize value for key {key}: {reason}")]
    Serialization { key: String, reason: String },

    /// Stored payload could not be decoded
    #[error("Failed to deserialize value for key {key}: {reason}")]
    Deserialization { key: String, reason: String },

    /// Local tier is full
    #[error("Local tier capacity exceeded ({capacity} entries)")]
    CapacityExceeded { capacity: usize },

    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    /// Glob pattern rejected by the compiler
    #[error("Invalid glob pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A collaborator fetch or refresh callback failed
    #[error("Data source error: {0}")]
    Source(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Shorthand for a shared tier failure
    pub fn backend(operation: impl Into<String>, reason: impl ToString) -> Self {
        CacheError::Backend {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// True for failures that mean the shared tier itself is unavailable
    pub fn is_backend(&self) -> bool {
        matches!(self, CacheError::Backend { .. })
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::backend(err.category(), err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_display() {
        let err = CacheError::backend("scan", "connection refused");
        assert_eq!(
            err.to_string(),
            "Shared tier error during scan: connection refused"
        );
        assert!(err.is_backend());
    }

    #[test]
    fn test_capacity_error_is_not_backend() {
        let err = CacheError::CapacityExceeded { capacity: 10 };
        assert!(!err.is_backend());
        assert!(err.to_string().contains("10 entries"));
    }
}
