//! Authorization-code callback exchange.
//!
//! Orchestrates the whole authorization-code grant for one inbound redirect.
//! Steps run in a fixed order and the first failure ends the request:
//!
//! 1. Rate limit by client address (before any store or IdP I/O)
//! 2. `code`/`state` presence
//! 3. Client credentials configured
//! 4. State validation; consumes the PKCE verifier
//! 5. Code exchange at the IdP (never retried, codes are single-use)
//! 6. Profile fetch; operator accounts are rejected
//! 7. Session write and session-token index, under the user's rotation lock
//! 8. Blacklist the refresh tokens of any session this login replaces
//!
//! Once step 4 has consumed the verifier, later failures do not touch the
//! state again. The user restarts the flow from the initiator.

use crate::blacklist::{RevocationReason, TokenBlacklist};
use crate::config::{CallbackConfig, SecurityConfig};
use crate::error::AuthError;
use crate::events::{RequestContext, SecurityEvent, SecurityEventKind, SecurityEventSink};
use crate::lock::RotationLock;
use crate::pkce::{PkceVerifierCache, StateValidator};
use crate::providers::{IdentityProvider, KeyValueStore, RateLimiter};
use crate::sessions::SessionRepository;
use crate::state::{TokenPair, UserId, UserSession};
use crate::utils::{generate_session_token, token_hash};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Redirect error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackErrorCode {
    /// `code` or `state` missing.
    MissingParams,
    /// `state` unknown, expired or already consumed.
    InvalidState,
    /// `state` has the wrong shape.
    MalformedState,
    /// Too many login attempts from this client.
    RateLimitExceeded,
    /// OAuth client credentials not configured.
    MissingCredentials,
    /// Code exchange failed.
    TokenExchangeFailed,
    /// Profile fetch failed.
    UserDataFailed,
    /// Operator accounts may not sign in.
    OperatorNotAllowed,
    /// Anything else.
    UnexpectedError,
}

impl CallbackErrorCode {
    /// Value used in the `auth_error` query parameter.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingParams => "missing_params",
            Self::InvalidState => "invalid_state",
            Self::MalformedState => "malformed_state",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::MissingCredentials => "missing_credentials",
            Self::TokenExchangeFailed => "token_exchange_failed",
            Self::UserDataFailed => "user_data_failed",
            Self::OperatorNotAllowed => "operator_not_allowed",
            Self::UnexpectedError => "unexpected_error",
        }
    }
}

impl fmt::Display for CallbackErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed callback: an error code and an optional user-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}")]
pub struct CallbackFailure {
    /// Error code.
    pub code: CallbackErrorCode,

    /// Explanation shown on the landing page.
    pub message: Option<String>,
}

impl CallbackFailure {
    /// Failure without a message.
    #[must_use]
    pub const fn new(code: CallbackErrorCode) -> Self {
        Self {
            code,
            message: None,
        }
    }

    /// Attach a user-facing message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Query parameters of the IdP redirect.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    /// Authorization code.
    pub code: Option<String>,

    /// CSRF `state`.
    pub state: Option<String>,

    /// IdP error code when the user denied consent or the request failed.
    pub error: Option<String>,

    /// IdP error text.
    pub error_description: Option<String>,
}

/// Outcome of a successful callback.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthenticatedSession {
    /// Signed-in user.
    pub user_id: UserId,

    /// New `session_token` cookie value.
    pub session_token: String,

    /// Account email, for the optional `user_email` cookie.
    pub email: Option<String>,

    /// Access token expiry.
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for AuthenticatedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatedSession")
            .field("user_id", &self.user_id)
            .field("session_token", &"<redacted>")
            .field("email", &self.email)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

const OPERATOR_MESSAGE: &str =
    "Operator accounts cannot administer this system. Sign in with the principal account.";

/// Runs the authorization-code callback.
pub struct CallbackExchange<K, I, R, E> {
    validator: StateValidator<K, E>,
    sessions: SessionRepository<K>,
    blacklist: TokenBlacklist<K>,
    lock: RotationLock<K>,
    idp: Arc<I>,
    limiter: Arc<R>,
    events: Arc<E>,
    config: CallbackConfig,
}

impl<K, I, R, E> CallbackExchange<K, I, R, E>
where
    K: KeyValueStore,
    I: IdentityProvider,
    R: RateLimiter,
    E: SecurityEventSink,
{
    /// Create a callback exchange.
    #[must_use]
    pub fn new(
        store: Arc<K>,
        idp: Arc<I>,
        limiter: Arc<R>,
        events: Arc<E>,
        config: &SecurityConfig,
    ) -> Self {
        let cache = PkceVerifierCache::new(Arc::clone(&store), config.pkce.clone());
        Self {
            validator: StateValidator::new(cache, Arc::clone(&events)),
            sessions: SessionRepository::new(
                Arc::clone(&store),
                config.rotation.refresh_token_max_lifetime,
                config.callback.session_cookie_ttl,
            ),
            blacklist: TokenBlacklist::new(
                Arc::clone(&store),
                config.rotation.refresh_token_max_lifetime,
            ),
            lock: RotationLock::new(
                store,
                config.rotation.lock_ttl,
                config.rotation.lock_wait,
                config.rotation.lock_retry_interval,
            ),
            idp,
            limiter,
            events,
            config: config.callback.clone(),
        }
    }

    /// Callback configuration.
    #[must_use]
    pub const fn config(&self) -> &CallbackConfig {
        &self.config
    }

    /// Handle one callback.
    ///
    /// # Errors
    ///
    /// Returns a [`CallbackFailure`] carrying the redirect error code.
    pub async fn handle(
        &self,
        params: CallbackParams,
        ctx: &RequestContext,
    ) -> Result<AuthenticatedSession, CallbackFailure> {
        let started = std::time::Instant::now();
        let result = self.run(params, ctx).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(failure) => failure.code.as_str(),
        };
        metrics::counter!("auth_callback_total", "outcome" => outcome).increment(1);
        metrics::histogram!("auth_callback_duration_seconds").record(started.elapsed().as_secs_f64());

        match &result {
            Ok(session) => tracing::info!(
                user_id = %session.user_id,
                client_ip = %ctx.client_address,
                "Login succeeded"
            ),
            Err(failure) => tracing::warn!(
                code = %failure.code,
                client_ip = %ctx.client_address,
                "Login failed"
            ),
        }

        result
    }

    async fn run(
        &self,
        params: CallbackParams,
        ctx: &RequestContext,
    ) -> Result<AuthenticatedSession, CallbackFailure> {
        let rate_key = format!("login:{}", ctx.client_address);
        self.check_rate_limit(&rate_key, ctx).await?;

        let code = params.code.as_deref().filter(|c| !c.is_empty());
        let state = params.state.as_deref().filter(|s| !s.is_empty());

        if code.is_none() {
            if let Some(error) = params.error.as_deref() {
                let text = params.error_description.as_deref().unwrap_or(error);
                tracing::info!(idp_error = %error, "IdP redirected with an error");
                return Err(CallbackFailure::new(CallbackErrorCode::MissingParams).with_message(text));
            }
        }
        if code.is_none() || state.is_none() {
            return Err(CallbackFailure::new(CallbackErrorCode::MissingParams));
        }

        if !self.idp.has_client_credentials() {
            tracing::error!("OAuth client credentials are not configured");
            return Err(CallbackFailure::new(CallbackErrorCode::MissingCredentials));
        }

        let validated = self.validator.validate(code, state, ctx).await?;

        let tokens = self
            .idp
            .exchange_code(&validated.code, &validated.verifier, &self.config.redirect_uri)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Authorization code exchange failed");
                match e {
                    AuthError::MissingClientCredentials => {
                        CallbackFailure::new(CallbackErrorCode::MissingCredentials)
                    }
                    _ => CallbackFailure::new(CallbackErrorCode::TokenExchangeFailed),
                }
            })?;

        let Some(refresh_token) = tokens.refresh_token.clone() else {
            tracing::warn!("IdP issued no refresh token on code exchange");
            return Err(CallbackFailure::new(CallbackErrorCode::TokenExchangeFailed));
        };

        let profile = match self.idp.fetch_profile(&tokens.access_token).await {
            Ok(profile) => profile,
            Err(AuthError::AccountForbidden) => {
                self.reject_operator(ctx, None).await;
                return Err(CallbackFailure::new(CallbackErrorCode::OperatorNotAllowed)
                    .with_message(OPERATOR_MESSAGE));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Profile fetch failed");
                return Err(CallbackFailure::new(CallbackErrorCode::UserDataFailed));
            }
        };

        if !profile.is_principal() {
            self.reject_operator(ctx, Some(&profile.user_id)).await;
            return Err(CallbackFailure::new(CallbackErrorCode::OperatorNotAllowed)
                .with_message(OPERATOR_MESSAGE));
        }

        let now = Utc::now();
        let user_id = UserId::new(profile.user_id);
        let session = UserSession::new(
            user_id.clone(),
            TokenPair {
                access_token: tokens.access_token.clone(),
                refresh_token,
                expires_at: tokens.expires_at(now),
            },
            generate_session_token(),
            profile.email,
            now,
        );

        self.persist_locked(&session).await?;

        if let Err(e) = self.limiter.reset(&rate_key).await {
            tracing::warn!(error = %e, "Failed to reset login rate limit");
        }

        Ok(AuthenticatedSession {
            user_id,
            session_token: session.session_token,
            email: session.email,
            expires_at: session.expires_at,
        })
    }

    async fn check_rate_limit(
        &self,
        key: &str,
        ctx: &RequestContext,
    ) -> Result<(), CallbackFailure> {
        let limit = self.config.login_rate_limit;
        match self
            .limiter
            .check_and_record(key, limit.max_attempts, limit.window)
            .await
        {
            Ok(()) => Ok(()),
            Err(AuthError::TooManyAttempts { retry_after }) => {
                self.events
                    .record(
                        SecurityEvent::new(SecurityEventKind::RateLimitExceeded, ctx)
                            .with_detail("max_attempts", limit.max_attempts.to_string())
                            .with_detail("window_seconds", limit.window.as_secs().to_string()),
                    )
                    .await;
                Err(CallbackFailure::new(CallbackErrorCode::RateLimitExceeded).with_message(
                    format!(
                        "Too many login attempts. Try again in {} seconds.",
                        retry_after.as_secs().max(1)
                    ),
                ))
            }
            Err(e) => {
                // Limiter unavailable: deny.
                tracing::error!(error = %e, "Rate limiter failed");
                Err(CallbackFailure::new(CallbackErrorCode::UnexpectedError))
            }
        }
    }

    async fn reject_operator(&self, ctx: &RequestContext, user_id: Option<&str>) {
        let mut event = SecurityEvent::new(SecurityEventKind::OperatorAccountRejected, ctx);
        if let Some(user_id) = user_id {
            event = event.with_detail("user_id", user_id);
        }
        self.events.record(event).await;
    }

    /// Run [`Self::persist`] under the user's rotation lock, so a rotation
    /// in flight cannot write its copy of the old session over this one.
    async fn persist_locked(&self, session: &UserSession) -> Result<(), CallbackFailure> {
        let user_id = &session.user_id;
        let guard = match self.lock.acquire(user_id).await {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                tracing::error!(user_id = %user_id, "Rotation lock still held, login not persisted");
                return Err(CallbackFailure::new(CallbackErrorCode::UnexpectedError));
            }
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Failed to take rotation lock");
                return Err(CallbackFailure::new(CallbackErrorCode::UnexpectedError));
            }
        };

        let result = self.persist(session).await;

        if let Err(e) = self.lock.release(guard).await {
            tracing::warn!(user_id = %user_id, error = %e, "Failed to release rotation lock");
        }

        result.map_err(|e| {
            tracing::error!(user_id = %user_id, error = %e, "Failed to persist session");
            CallbackFailure::new(CallbackErrorCode::UnexpectedError)
        })
    }

    /// Session write, then retire whatever session it replaces.
    async fn persist(&self, session: &UserSession) -> crate::error::Result<()> {
        let previous = self.sessions.load(&session.user_id).await?;

        self.sessions.create(session).await?;

        if let Some(previous) = previous {
            let current = token_hash(&session.refresh_token);
            let retired: Vec<String> = previous
                .token_lineage()
                .into_iter()
                .filter(|hash| *hash != current)
                .collect();
            self.blacklist
                .revoke_all(&retired, RevocationReason::Superseded)
                .await?;
            self.sessions.remove_index(&previous.session_token).await?;

            tracing::info!(
                user_id = %session.user_id,
                retired_tokens = retired.len(),
                "Replaced existing session"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use crate::config::PkceConfig;
    use crate::mocks::{
        MockIdentityProvider, MockKeyValueStore, MockRateLimiter, RecordingSecurityEventSink,
    };
    use crate::providers::AccountProfile;

    const STATE: &str = "abcdef0123456789abcdef0123456789";

    struct Harness {
        exchange: CallbackExchange<
            MockKeyValueStore,
            MockIdentityProvider,
            MockRateLimiter,
            RecordingSecurityEventSink,
        >,
        store: Arc<MockKeyValueStore>,
        idp: Arc<MockIdentityProvider>,
        events: Arc<RecordingSecurityEventSink>,
        cache: PkceVerifierCache<MockKeyValueStore>,
    }

    fn harness(config: SecurityConfig) -> Harness {
        let store = Arc::new(MockKeyValueStore::new());
        let idp = Arc::new(MockIdentityProvider::new());
        let events = Arc::new(RecordingSecurityEventSink::new());
        let exchange = CallbackExchange::new(
            Arc::clone(&store),
            Arc::clone(&idp),
            Arc::new(MockRateLimiter::new()),
            Arc::clone(&events),
            &config,
        );
        let cache = PkceVerifierCache::new(Arc::clone(&store), PkceConfig::default());
        Harness {
            exchange,
            store,
            idp,
            events,
            cache,
        }
    }

    fn params(code: &str, state: &str) -> CallbackParams {
        CallbackParams {
            code: Some(code.into()),
            state: Some(state.into()),
            ..CallbackParams::default()
        }
    }

    #[tokio::test]
    async fn test_success_creates_session() {
        let h = harness(SecurityConfig::default());
        h.cache.store(STATE, "V1").await.unwrap();
        h.idp.set_profile(AccountProfile::principal("u1").with_email("owner@example.com"));

        let session = h
            .exchange
            .handle(params("C1", STATE), &RequestContext::default())
            .await
            .unwrap();

        assert_eq!(session.user_id, UserId::new("u1"));
        assert_eq!(session.email.as_deref(), Some("owner@example.com"));
        assert_eq!(h.idp.last_exchange(), Some(("C1".into(), "V1".into())));
        assert!(h.store.exists("auth:session:u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_idp_error_param_becomes_missing_params_with_message() {
        let h = harness(SecurityConfig::default());
        let failure = h
            .exchange
            .handle(
                CallbackParams {
                    error: Some("access_denied".into()),
                    error_description: Some("User declined".into()),
                    ..CallbackParams::default()
                },
                &RequestContext::default(),
            )
            .await
            .unwrap_err();

        assert_eq!(failure.code, CallbackErrorCode::MissingParams);
        assert_eq!(failure.message.as_deref(), Some("User declined"));
        assert_eq!(h.idp.exchange_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_credentials_keeps_state() {
        let h = harness(SecurityConfig::default());
        h.cache.store(STATE, "V1").await.unwrap();
        h.idp.set_has_credentials(false);

        let failure = h
            .exchange
            .handle(params("C1", STATE), &RequestContext::default())
            .await
            .unwrap_err();

        assert_eq!(failure.code, CallbackErrorCode::MissingCredentials);
        assert!(h.store.exists(&format!("auth:pkce:{STATE}")).await.unwrap());
    }

    #[tokio::test]
    async fn test_exchange_failure_is_not_retried() {
        let h = harness(SecurityConfig::default());
        h.cache.store(STATE, "V1").await.unwrap();
        h.idp.fail_transport_times(1);

        let failure = h
            .exchange
            .handle(params("C1", STATE), &RequestContext::default())
            .await
            .unwrap_err();

        assert_eq!(failure.code, CallbackErrorCode::TokenExchangeFailed);
        assert_eq!(h.idp.exchange_calls(), 1);
        assert!(!h.store.exists(&format!("auth:pkce:{STATE}")).await.unwrap());
    }

    #[tokio::test]
    async fn test_operator_account_rejected() {
        let h = harness(SecurityConfig::default());
        h.cache.store(STATE, "V1").await.unwrap();
        h.idp.set_profile(AccountProfile::operator("op1"));

        let failure = h
            .exchange
            .handle(params("C1", STATE), &RequestContext::default())
            .await
            .unwrap_err();

        assert_eq!(failure.code, CallbackErrorCode::OperatorNotAllowed);
        assert!(failure.message.is_some());
        assert!(!h.store.exists("auth:session:op1").await.unwrap());
        assert_eq!(
            h.events.kinds(),
            vec![SecurityEventKind::OperatorAccountRejected]
        );
    }

    #[tokio::test]
    async fn test_profile_forbidden_is_operator_rejection() {
        let h = harness(SecurityConfig::default());
        h.cache.store(STATE, "V1").await.unwrap();
        h.idp.set_profile_error(AuthError::AccountForbidden);

        let failure = h
            .exchange
            .handle(params("C1", STATE), &RequestContext::default())
            .await
            .unwrap_err();
        assert_eq!(failure.code, CallbackErrorCode::OperatorNotAllowed);
    }

    #[tokio::test]
    async fn test_profile_failure_is_user_data_failed() {
        let h = harness(SecurityConfig::default());
        h.cache.store(STATE, "V1").await.unwrap();
        h.idp.set_profile_error(AuthError::ProviderRejected { status: 500 });

        let failure = h
            .exchange
            .handle(params("C1", STATE), &RequestContext::default())
            .await
            .unwrap_err();
        assert_eq!(failure.code, CallbackErrorCode::UserDataFailed);
    }

    #[tokio::test]
    async fn test_rate_limit_short_circuits_before_store() {
        let mut config = SecurityConfig::default();
        config.callback = config
            .callback
            .with_login_rate_limit(1, std::time::Duration::from_secs(60));
        let h = harness(config);
        let ctx = RequestContext::new("192.0.2.1", None);

        let _ = h.exchange.handle(CallbackParams::default(), &ctx).await;
        let ops_before = h.store.operation_count();

        let failure = h
            .exchange
            .handle(params("C1", STATE), &ctx)
            .await
            .unwrap_err();

        assert_eq!(failure.code, CallbackErrorCode::RateLimitExceeded);
        assert_eq!(h.store.operation_count(), ops_before);
        assert_eq!(h.events.kinds(), vec![SecurityEventKind::RateLimitExceeded]);
        assert_eq!(
            h.events.events()[0].severity,
            crate::events::Severity::Medium
        );
    }

    #[tokio::test]
    async fn test_new_login_retires_previous_refresh_tokens() {
        let h = harness(SecurityConfig::default());
        let ctx = RequestContext::default();

        h.cache.store(STATE, "V1").await.unwrap();
        h.idp.push_token_response("a1", Some("r-first"), Some(3600));
        h.exchange.handle(params("C1", STATE), &ctx).await.unwrap();

        let second_state = "zyxwvu9876543210zyxwvu9876543210";
        h.cache.store(second_state, "V2").await.unwrap();
        h.idp.push_token_response("a2", Some("r-second"), Some(3600));
        h.exchange.handle(params("C2", second_state), &ctx).await.unwrap();

        let blacklist = TokenBlacklist::new(Arc::clone(&h.store), std::time::Duration::from_secs(60));
        assert!(blacklist.is_revoked("r-first").await.unwrap());
        assert!(!blacklist.is_revoked("r-second").await.unwrap());
    }

    #[tokio::test]
    async fn test_login_waits_for_rotation_in_flight() {
        let config = SecurityConfig::default();
        let store = Arc::new(MockKeyValueStore::new());
        let idp = Arc::new(MockIdentityProvider::new());
        let events = Arc::new(RecordingSecurityEventSink::new());
        let exchange = Arc::new(CallbackExchange::new(
            Arc::clone(&store),
            Arc::clone(&idp),
            Arc::new(MockRateLimiter::new()),
            Arc::clone(&events),
            &config,
        ));
        let rotation = Arc::new(crate::rotation::TokenRotationService::new(
            Arc::clone(&store),
            Arc::clone(&idp),
            events,
            &config,
        ));
        let cache = PkceVerifierCache::new(Arc::clone(&store), PkceConfig::default());
        let ctx = RequestContext::default();
        let user = UserId::new("u1");
        idp.set_profile(AccountProfile::principal("u1"));

        cache.store(STATE, "V1").await.unwrap();
        idp.push_token_response("a1", Some("r-first"), Some(3600));
        exchange.handle(params("C1", STATE), &ctx).await.unwrap();

        idp.set_refresh_delay(std::time::Duration::from_millis(100));
        let rotating = {
            let rotation = Arc::clone(&rotation);
            let user = user.clone();
            tokio::spawn(async move {
                rotation
                    .rotate(&user, "r-first", &RequestContext::default())
                    .await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let second_state = "zyxwvu9876543210zyxwvu9876543210";
        cache.store(second_state, "V2").await.unwrap();
        idp.push_token_response("a2", Some("r-second"), Some(3600));
        let login = exchange.handle(params("C2", second_state), &ctx).await.unwrap();

        assert!(rotating.await.unwrap().is_ok());

        let resolved = rotation
            .sessions()
            .resolve_session_token(&login.session_token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.refresh_token, "r-second");
        assert!(store.keys_with_prefix("auth:rotation_lock:").is_empty());
    }

    #[tokio::test]
    async fn test_login_fails_closed_while_lock_is_held() {
        let mut config = SecurityConfig::default();
        config.rotation = config
            .rotation
            .with_lock(std::time::Duration::from_secs(30), std::time::Duration::from_millis(20));
        let h = harness(config);
        h.cache.store(STATE, "V1").await.unwrap();
        h.idp.set_profile(AccountProfile::principal("u1"));
        h.store
            .set_ex("auth:rotation_lock:u1", b"rotation", std::time::Duration::from_secs(30))
            .await
            .unwrap();

        let failure = h
            .exchange
            .handle(params("C1", STATE), &RequestContext::default())
            .await
            .unwrap_err();

        assert_eq!(failure.code, CallbackErrorCode::UnexpectedError);
        assert!(!h.store.exists("auth:session:u1").await.unwrap());
    }
}
