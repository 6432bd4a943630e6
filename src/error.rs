//! Error types for the insight cache
//!
//! Cache reads, writes and invalidations are infallible; only configuration
//! and construction can fail. These errors are meant to surface at startup.

use thiserror::Error;

/// Main error type for cache construction and configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Configuration rejected by validation
    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),

    /// Unknown analysis category name
    #[error("Unknown analysis category: {0}")]
    InvalidCategory(String),

    /// Environment variable present but not parseable
    #[error("Invalid value for {name}: {value:?}")]
    InvalidEnvVar { name: String, value: String },
}

/// Result type alias for cache operations that can fail
pub type Result<T> = std::result::Result<T, CacheError>;
