//! Error types shared across the recall workspace

use thiserror::Error;

/// Result type alias for shared recall operations
pub type Result<T> = std::result::Result<T, RecallError>;

/// Main error type for shared recall utilities
#[derive(Error, Debug)]
pub enum RecallError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}
