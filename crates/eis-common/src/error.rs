//! Error types for EIS

use thiserror::Error;

/// Result type alias for EIS operations
pub type Result<T> = std::result::Result<T, EisError>;

/// Main error type for EIS
#[derive(Error, Debug)]
pub enum EisError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Input resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}
