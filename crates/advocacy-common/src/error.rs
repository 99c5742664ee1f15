//! Error types shared across the advocacy workspace

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, AdvocacyError>;

/// Main error type for shared utilities
#[derive(Error, Debug)]
pub enum AdvocacyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}
