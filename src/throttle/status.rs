//! Quota snapshot reported to callers.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A point-in-time view of one resource's quota.
///
/// Carries what an HTTP layer needs for `X-RateLimit-*` and `Retry-After`
/// headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThrottleStatus {
    /// Store key of the resource
    pub key: String,
    /// Hits allowed per window
    pub limit: u64,
    /// Hits recorded in the current window
    pub count: u64,
    /// `limit - count`; negative once the limit has been exceeded
    pub remaining: i64,
    /// Whether the next attempt would be allowed
    pub allowed: bool,
    /// Seconds until the current window closes
    pub retry_after_seconds: u64,
    /// When the current window closes, if one is open
    pub resets_at: Option<DateTime<Utc>>,
}

impl ThrottleStatus {
    /// Remaining attempts clamped at zero, for header output.
    pub fn remaining_clamped(&self) -> u64 {
        u64::try_from(self.remaining).unwrap_or(0)
    }
}
