//! Provider traits.
//!
//! This module defines traits for every external collaborator of the
//! session-security core. Services are generic over these traits, so the
//! same callback and rotation logic runs against Redis and a real IdP in
//! production and against in-memory mocks in tests.
//!
//! ```text
//! ┌──────────────────────┐     ┌──────────────────┐
//! │ CallbackExchange     │────▶│ IdentityProvider │
//! │ TokenRotationService │     └──────────────────┘
//! └──────────┬───────────┘     ┌──────────────────┐
//!            ├────────────────▶│ RateLimiter      │
//!            │                 └──────────────────┘
//!            ▼
//! ┌──────────────────────┐
//! │ KeyValueStore        │  verifiers, sessions, blacklist, locks
//! └──────────────────────┘
//! ```

pub mod http_idp;
pub mod identity;
pub mod kv;
pub mod rate_limiter;

pub use http_idp::HttpIdentityProvider;
pub use identity::{AccountClass, AccountProfile, IdentityProvider, TokenResponse};
pub use kv::KeyValueStore;
pub use rate_limiter::RateLimiter;
