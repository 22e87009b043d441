//! Session endpoints keyed by the `session_token` cookie.

use crate::cookies::{SESSION_COOKIE, cleared_cookies};
use crate::error::AppError;
use crate::extractors::{ClientIp, UserAgent, request_context};
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::CookieJar;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sessionguard_auth::providers::{IdentityProvider, KeyValueStore, RateLimiter};
use sessionguard_auth::{RotationError, SecurityEventSink};

/// Refresh response. IdP tokens never leave the server.
#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    /// Session owner.
    pub user_id: String,
    /// New access-token expiry.
    pub expires_at: DateTime<Utc>,
}

/// Rotate the session's refresh token.
///
/// # Endpoint
///
/// ```text
/// POST /api/auth/session/refresh
/// ```
///
/// # Errors
///
/// 401 without a live session or when rotation invalidated it (the session
/// cookies are cleared in that case), 409 while another refresh holds the
/// lock, 503 when the IdP is unreachable.
pub async fn refresh<K, I, R, E>(
    State(state): State<AppState<K, I, R, E>>,
    client_ip: ClientIp,
    user_agent: UserAgent,
    jar: CookieJar,
) -> Response
where
    K: KeyValueStore + 'static,
    I: IdentityProvider + 'static,
    R: RateLimiter + 'static,
    E: SecurityEventSink + 'static,
{
    let ctx = request_context(client_ip, user_agent);

    let session = match resolve(&state, &jar).await {
        Ok(Some(session)) => session,
        Ok(None) => return AppError::unauthorized("No active session").into_response(),
        Err(e) => return e.into_response(),
    };

    match state.rotation.rotate_stored(&session.user_id, &ctx).await {
        Ok(pair) => Json(RefreshResponse {
            user_id: session.user_id.to_string(),
            expires_at: pair.expires_at,
        })
        .into_response(),
        Err(
            e @ (RotationError::NoRefreshToken
            | RotationError::TheftDetected
            | RotationError::TokenAlreadyUsed),
        ) => (clear(jar), AppError::from(e)).into_response(),
        Err(e) => AppError::from(e).into_response(),
    }
}

/// Revoke the session and clear its cookies.
///
/// # Endpoint
///
/// ```text
/// POST /api/auth/logout
/// ```
///
/// Returns 204 whether or not a session existed.
///
/// # Errors
///
/// 409 while a refresh holds the lock, 500 on store failure.
pub async fn logout<K, I, R, E>(
    State(state): State<AppState<K, I, R, E>>,
    client_ip: ClientIp,
    user_agent: UserAgent,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode), AppError>
where
    K: KeyValueStore + 'static,
    I: IdentityProvider + 'static,
    R: RateLimiter + 'static,
    E: SecurityEventSink + 'static,
{
    let ctx = request_context(client_ip, user_agent);

    if let Some(session) = resolve(&state, &jar).await? {
        state
            .rotation
            .revoke_session(&session.user_id, &ctx)
            .await?;
        tracing::info!(user_id = %session.user_id, "User logged out");
    }

    Ok((clear(jar), StatusCode::NO_CONTENT))
}

async fn resolve<K, I, R, E>(
    state: &AppState<K, I, R, E>,
    jar: &CookieJar,
) -> Result<Option<sessionguard_auth::UserSession>, AppError>
where
    K: KeyValueStore,
    I: IdentityProvider,
    R: RateLimiter,
    E: SecurityEventSink,
{
    let Some(token) = jar.get(SESSION_COOKIE).map(|c| c.value().to_string()) else {
        return Ok(None);
    };
    Ok(state.rotation.sessions().resolve_session_token(&token).await?)
}

fn clear(jar: CookieJar) -> CookieJar {
    cleared_cookies().into_iter().fold(jar, CookieJar::add)
}
