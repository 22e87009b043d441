//! HTTP request handlers.
//!
//! - `oauth`: the IdP redirect target
//! - `session`: refresh and logout for an established session
//! - `health`: liveness

pub mod health;
pub mod oauth;
pub mod session;

// Re-export handlers for the router
pub use health::health_check;
pub use oauth::callback;
pub use session::{logout, refresh};
