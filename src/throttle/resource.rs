//! Per-resource throttle configuration.

use serde::{Deserialize, Serialize};

use crate::error::{FloodgateError, Result};

/// Default number of hits allowed per window.
pub const DEFAULT_MAX_ATTEMPTS: u64 = 60;
/// Default window length in seconds.
pub const DEFAULT_DECAY_SECONDS: u64 = 60;

/// The limit applied to one throttled resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Store key for the resource's counter
    pub key: String,
    /// Maximum hits allowed within one window
    pub max_attempts: u64,
    /// Window length in seconds
    pub decay_seconds: u64,
}

impl ThrottleConfig {
    /// Create a configuration with the default limit and window.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            decay_seconds: DEFAULT_DECAY_SECONDS,
        }
    }

    /// Create a validated configuration.
    pub fn with_limits(
        key: impl Into<String>,
        max_attempts: u64,
        decay_seconds: u64,
    ) -> Result<Self> {
        let config = Self {
            key: key.into(),
            max_attempts,
            decay_seconds,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject limits that would deny everything or open zero-length windows.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(FloodgateError::InvalidConfiguration(format!(
                "max_attempts for '{}' must be greater than zero",
                self.key
            )));
        }
        if self.decay_seconds == 0 {
            return Err(FloodgateError::InvalidConfiguration(format!(
                "decay_seconds for '{}' must be greater than zero",
                self.key
            )));
        }
        Ok(())
    }

    /// The counter TTL set when a window opens.
    pub fn ttl_ms(&self) -> u64 {
        self.decay_seconds.saturating_mul(1000)
    }
}
