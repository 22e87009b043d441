//! Axum shell for the sessionguard security core.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Imperative Shell (Axum)         │  ← HTTP, cookies, redirects
//! │  - Request parsing                      │  ← Client IP, User-Agent
//! │  - Cookie issuance                      │  ← Logging, metrics
//! ├─────────────────────────────────────────┤
//! │      sessionguard-auth                  │
//! │  - PKCE/CSRF validation                 │  ← Testable against mocks
//! │  - Callback exchange                    │
//! │  - Refresh-token rotation               │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use sessionguard_web::{AppState, build_router};
//!
//! let state = AppState::new(store, idp, limiter, events, &security, true);
//! let app = build_router(state);
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod cookies;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod redirect;
pub mod router;
pub mod state;

// Re-export key types for convenience
pub use config::Config;
pub use error::AppError;
pub use extractors::{ClientIp, TrustedProxies, UserAgent};
pub use router::build_router;
pub use state::{AppState, ProductionState};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
