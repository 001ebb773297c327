//! Throttling logic over a counter store.

mod limiter;
mod resource;
mod status;

pub use limiter::{Throttle, DEFAULT_PENALTY_SECONDS};
pub use resource::{ThrottleConfig, DEFAULT_DECAY_SECONDS, DEFAULT_MAX_ATTEMPTS};
pub use status::ThrottleStatus;
