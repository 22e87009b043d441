//! Mock provider implementations for testing.
//!
//! In-memory implementations of every provider trait, for unit and
//! integration tests.

pub mod events;
pub mod identity;
pub mod kv;
pub mod rate_limiter;

pub use events::RecordingSecurityEventSink;
pub use identity::MockIdentityProvider;
pub use kv::MockKeyValueStore;
pub use rate_limiter::MockRateLimiter;
