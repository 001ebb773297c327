//! Error types for Floodgate.

use thiserror::Error;

/// Main error type for Floodgate operations.
#[derive(Error, Debug)]
pub enum FloodgateError {
    /// The counter store could not be reached
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The counter store was reached but rejected the command
    #[error("Store error: {0}")]
    Store(String),

    /// A throttle was configured with a zero limit or window
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A throttle operation ran before any resource was configured
    #[error("Throttle used before a resource was configured")]
    NotConfigured,

    /// Configuration file errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redis::RedisError> for FloodgateError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_timeout()
        {
            FloodgateError::StoreUnavailable(err.to_string())
        } else {
            FloodgateError::Store(err.to_string())
        }
    }
}

/// Result type alias for Floodgate operations.
pub type Result<T> = std::result::Result<T, FloodgateError>;
