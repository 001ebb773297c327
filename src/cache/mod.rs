//! Counter stores the throttle can run on.

mod backend;
mod memory;
mod redis_cache;

pub use self::backend::Cache;
pub use self::memory::MemoryCache;
pub use self::redis_cache::RedisCache;
