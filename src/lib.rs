//! Floodgate - Fixed-Window Request Throttling
//!
//! This crate implements a fixed-window rate limiter over a pluggable
//! key/value counter store with per-key expiration. The throttle holds no
//! counter state itself; any store implementing [`cache::Cache`] can back it.

pub mod cache;
pub mod config;
pub mod error;
pub mod throttle;

pub use cache::{Cache, MemoryCache, RedisCache};
pub use error::{FloodgateError, Result};
pub use throttle::{Throttle, ThrottleConfig, ThrottleStatus};
