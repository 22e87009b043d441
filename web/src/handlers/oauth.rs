//! OAuth callback endpoint.
//!
//! The only response is a `303 See Other` to the landing page, carrying
//! either `auth_success` or `auth_error`.

use crate::cookies::session_cookies;
use crate::extractors::{ClientIp, UserAgent, request_context};
use crate::redirect::{failure_url, success_url};
use crate::state::AppState;
use axum::extract::{Path, RawQuery, State};
use axum::response::Redirect;
use axum_extra::extract::CookieJar;
use sessionguard_auth::providers::{IdentityProvider, KeyValueStore, RateLimiter};
use sessionguard_auth::{CallbackErrorCode, CallbackFailure, CallbackParams, SecurityEventSink};
use std::sync::Arc;

/// Authorization-code callback.
///
/// # Endpoint
///
/// ```text
/// GET /api/auth/{provider}/callback?code=...&state=...[&error=...]
/// ```
///
/// The exchange runs in its own task: if the client disconnects, session
/// writes already in flight still complete.
pub async fn callback<K, I, R, E>(
    State(state): State<AppState<K, I, R, E>>,
    Path(provider): Path<String>,
    RawQuery(query): RawQuery,
    client_ip: ClientIp,
    user_agent: UserAgent,
    jar: CookieJar,
) -> (CookieJar, Redirect)
where
    K: KeyValueStore + 'static,
    I: IdentityProvider + 'static,
    R: RateLimiter + 'static,
    E: SecurityEventSink + 'static,
{
    // Unparseable queries are treated as missing parameters.
    let params: CallbackParams = query
        .as_deref()
        .and_then(|q| serde_urlencoded::from_str(q).ok())
        .unwrap_or_default();
    let ctx = request_context(client_ip, user_agent);

    tracing::debug!(provider = %provider, client_ip = %ctx.client_address, "OAuth callback received");

    let exchange = Arc::clone(&state.callback);
    let outcome = match tokio::spawn(async move { exchange.handle(params, &ctx).await }).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(error = %e, "Callback task failed");
            Err(CallbackFailure::new(CallbackErrorCode::UnexpectedError))
        }
    };

    let landing = &state.callback.config().landing_url;
    match outcome {
        Ok(session) => {
            let jar = session_cookies(&session, &state.cookies)
                .into_iter()
                .fold(jar, CookieJar::add);
            (jar, Redirect::to(&success_url(landing, &session.user_id)))
        }
        Err(failure) => (jar, Redirect::to(&failure_url(landing, &failure))),
    }
}
