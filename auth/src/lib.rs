//! # Sessionguard Authentication Core
//!
//! The session-security core of an OAuth2 login: the Authorization Code
//! with PKCE callback exchange and the refresh-token rotation subsystem.
//!
//! ## Features
//!
//! - **Single-use CSRF state**: verifiers are consumed atomically, so
//!   exactly one callback can ever use a given `state`
//! - **Refresh-token rotation**: every refresh consumes the presented token
//! - **Theft detection**: presenting a superseded token destroys the session
//!   and burns the whole token lineage
//! - **Testable**: every external system sits behind a trait with an
//!   in-memory mock
//!
//! ## Architecture
//!
//! ```text
//! Browser ──callback──▶ CallbackExchange ──▶ StateValidator ──▶ KeyValueStore
//!                              │                                    ▲
//!                              ├──────────▶ IdentityProvider        │
//!                              └──────────▶ SessionRepository ──────┤
//!                                                                   │
//! Caller ──refresh────▶ TokenRotationService ──▶ RotationLock ──────┤
//!                              └──────────────▶ TokenBlacklist ─────┘
//! ```
//!
//! ## Example: Callback
//!
//! ```rust,ignore
//! use sessionguard_auth::*;
//!
//! let exchange = CallbackExchange::new(store, idp, limiter, events, &config);
//! let ctx = RequestContext::new("203.0.113.7", None);
//!
//! match exchange.handle(params, &ctx).await {
//!     Ok(session) => set_cookies(session),
//!     Err(failure) => redirect_with_error(failure.code),
//! }
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

// Public modules
pub mod blacklist;
pub mod callback;
pub mod config;
pub mod error;
pub mod events;
pub mod lock;
pub mod pkce;
pub mod providers;
pub mod rotation;
pub mod sessions;
pub mod state;
pub mod stores;
pub mod utils;

// Mock implementations for testing
#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;

// Re-export main types for convenience
pub use blacklist::{RevocationReason, TokenBlacklist};
pub use callback::{
    AuthenticatedSession, CallbackErrorCode, CallbackExchange, CallbackFailure, CallbackParams,
};
pub use config::{
    CallbackConfig, IdentityProviderConfig, PkceConfig, ReusePolicy, RotationConfig,
    SecurityConfig,
};
pub use error::{AuthError, Result};
pub use events::{
    RequestContext, SecurityEvent, SecurityEventKind, SecurityEventSink, Severity,
    TracingSecurityEventSink,
};
pub use pkce::{PkceVerifierCache, StateValidator, ValidatedCallback};
pub use rotation::{RotationError, TokenRotationService};
pub use sessions::{SessionRepository, SessionVersion};
pub use state::{TokenPair, UserId, UserSession};
