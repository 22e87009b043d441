//! Redis-backed implementations of the provider traits.
//!
//! - **Key/Value Store** - PKCE verifiers, sessions, blacklist, rotation locks
//! - **Rate Limiter** - Sliding-window login throttling
//!
//! Both share one `ConnectionManager`.

pub mod kv_redis;
pub mod rate_limiter_redis;

pub use kv_redis::RedisKeyValueStore;
pub use rate_limiter_redis::RedisRateLimiter;
