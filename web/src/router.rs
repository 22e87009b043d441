//! Route table.

use crate::handlers::{callback, health_check, logout, refresh};
use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post};
use sessionguard_auth::SecurityEventSink;
use sessionguard_auth::providers::{IdentityProvider, KeyValueStore, RateLimiter};
use tower_http::trace::TraceLayer;

/// Build the application router.
///
/// ```text
/// GET  /health
/// GET  /api/auth/:provider/callback
/// POST /api/auth/session/refresh
/// POST /api/auth/logout
/// ```
pub fn build_router<K, I, R, E>(state: AppState<K, I, R, E>) -> Router
where
    K: KeyValueStore + 'static,
    I: IdentityProvider + 'static,
    R: RateLimiter + 'static,
    E: SecurityEventSink + 'static,
{
    Router::new()
        .route("/health", get(health_check))
        .route("/api/auth/:provider/callback", get(callback::<K, I, R, E>))
        .route("/api/auth/session/refresh", post(refresh::<K, I, R, E>))
        .route("/api/auth/logout", post(logout::<K, I, R, E>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
