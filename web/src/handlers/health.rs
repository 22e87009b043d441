//! Health check endpoint.
//!
//! Used by load balancers to verify the process is serving requests.

use axum::http::StatusCode;

/// Liveness check.
///
/// Does NOT check Redis or the IdP.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}
