//! Refresh-token rotation with theft detection.
//!
//! Per user:
//!
//! ```text
//! {session} ── rotate(R) ──┬─▶ {new session, R blacklisted}
//!                          ├─▶ {theft: session deleted, lineage blacklisted}
//!                          └─▶ {IdP failure: unchanged}
//! ```
//!
//! A refresh token is only ever known to the holder of the latest session
//! and to whoever captured an older one, so presenting anything other than
//! the current token is treated as theft. The one exception is
//! [`ReusePolicy::GraceWindow`]: the immediately-prior token, presented
//! shortly after the rotation that retired it, returns the current pair.
//!
//! Every rotation for a user runs under [`RotationLock`], so two callers
//! holding the same valid token cannot both reach the IdP. The write-back is
//! also fenced on the record the rotation started from: if the lock ran out
//! and someone else wrote the session in the meantime, the rotation fails
//! with [`RotationError::ConcurrentUpdate`] instead of overwriting it.

use crate::blacklist::{RevocationReason, TokenBlacklist};
use crate::config::{ReusePolicy, RotationConfig, SecurityConfig};
use crate::error::AuthError;
use crate::events::{RequestContext, SecurityEvent, SecurityEventKind, SecurityEventSink};
use crate::lock::{LockGuard, RotationLock};
use crate::providers::{IdentityProvider, KeyValueStore, TokenResponse};
use crate::sessions::SessionRepository;
use crate::state::{TokenPair, UserId, UserSession};
use crate::utils::{token_fingerprint, token_hash};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;

/// Rotation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RotationError {
    /// No session, or no refresh token, for this user.
    #[error("No refresh token for this user")]
    NoRefreshToken,

    /// The presented token was already consumed.
    #[error("Refresh token has already been used")]
    TokenAlreadyUsed,

    /// The presented token is not the current one. The session is gone.
    #[error("Refresh token reuse detected; session invalidated")]
    TheftDetected,

    /// The IdP refused the refresh grant.
    #[error("Identity provider rejected the refresh: {0}")]
    ProviderRejected(String),

    /// The IdP could not be reached, retries included.
    #[error("Identity provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Another rotation for this user did not finish within the wait budget.
    #[error("Another rotation is in progress")]
    RotationInProgress,

    /// The session was replaced while the IdP call was in flight. The
    /// tokens it returned were discarded.
    #[error("Session changed during rotation")]
    ConcurrentUpdate,

    /// Session store failure.
    #[error("Storage error: {0}")]
    Storage(AuthError),
}

impl RotationError {
    /// Snake-case code for responses and metrics.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NoRefreshToken => "no_refresh_token",
            Self::TokenAlreadyUsed => "token_already_used",
            Self::TheftDetected => "theft_detected",
            Self::ProviderRejected(_) => "provider_rejected",
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::RotationInProgress => "rotation_in_progress",
            Self::ConcurrentUpdate => "concurrent_update",
            Self::Storage(_) => "storage_error",
        }
    }
}

impl From<AuthError> for RotationError {
    fn from(err: AuthError) -> Self {
        Self::Storage(err)
    }
}

/// Rotates refresh tokens and revokes sessions.
pub struct TokenRotationService<K, I, E> {
    sessions: SessionRepository<K>,
    blacklist: TokenBlacklist<K>,
    lock: RotationLock<K>,
    idp: Arc<I>,
    events: Arc<E>,
    config: RotationConfig,
}

impl<K, I, E> TokenRotationService<K, I, E>
where
    K: KeyValueStore,
    I: IdentityProvider,
    E: SecurityEventSink,
{
    /// Create a rotation service.
    #[must_use]
    pub fn new(store: Arc<K>, idp: Arc<I>, events: Arc<E>, config: &SecurityConfig) -> Self {
        let rotation = config.rotation.clone();
        Self {
            sessions: SessionRepository::new(
                Arc::clone(&store),
                rotation.refresh_token_max_lifetime,
                config.callback.session_cookie_ttl,
            ),
            blacklist: TokenBlacklist::new(Arc::clone(&store), rotation.refresh_token_max_lifetime),
            lock: RotationLock::new(
                store,
                rotation.lock_ttl,
                rotation.lock_wait,
                rotation.lock_retry_interval,
            ),
            idp,
            events,
            config: rotation,
        }
    }

    /// Session repository shared with this service.
    #[must_use]
    pub const fn sessions(&self) -> &SessionRepository<K> {
        &self.sessions
    }

    /// Exchange `presented` for a new token pair.
    ///
    /// # Errors
    ///
    /// - `NoRefreshToken` if the user has no session
    /// - `TheftDetected` if `presented` is not the current token (outside
    ///   the grace window); the session has been deleted
    /// - `TokenAlreadyUsed` if `presented` is blacklisted
    /// - `ProviderRejected` / `ProviderUnavailable` on IdP failure; nothing
    ///   was changed
    /// - `RotationInProgress` if the user's lock could not be taken
    /// - `ConcurrentUpdate` if the session changed before the write-back
    /// - `Storage` on store failure
    pub async fn rotate(
        &self,
        user_id: &UserId,
        presented: &str,
        ctx: &RequestContext,
    ) -> Result<TokenPair, RotationError> {
        let guard = self.acquire(user_id).await?;
        let result = self.rotate_locked(user_id, presented, ctx).await;
        self.release(guard).await;

        record_outcome(&result);
        result
    }

    /// Rotate using whatever refresh token is currently stored.
    ///
    /// For server-side callers that hold no token of their own. The stored
    /// token is read under the lock, so it cannot be stale.
    ///
    /// # Errors
    ///
    /// Same as [`Self::rotate`].
    pub async fn rotate_stored(
        &self,
        user_id: &UserId,
        ctx: &RequestContext,
    ) -> Result<TokenPair, RotationError> {
        let guard = self.acquire(user_id).await?;
        let result = match self.sessions.load(user_id).await {
            Ok(Some(session)) => {
                self.rotate_locked(user_id, &session.refresh_token, ctx)
                    .await
            }
            Ok(None) => Err(RotationError::NoRefreshToken),
            Err(e) => Err(RotationError::Storage(e)),
        };
        self.release(guard).await;

        record_outcome(&result);
        result
    }

    /// Current token pair, rotated first if the access token is about to
    /// expire.
    ///
    /// # Errors
    ///
    /// Same as [`Self::rotate`].
    pub async fn access_token_for(
        &self,
        user_id: &UserId,
        ctx: &RequestContext,
    ) -> Result<TokenPair, RotationError> {
        let session = self
            .sessions
            .load(user_id)
            .await?
            .ok_or(RotationError::NoRefreshToken)?;

        if session.expires_within(Utc::now(), self.config.refresh_skew) {
            tracing::debug!(user_id = %user_id, "Access token near expiry, rotating");
            self.rotate_stored(user_id, ctx).await
        } else {
            Ok(session.token_pair())
        }
    }

    /// Explicit logout: delete the session and blacklist its refresh-token
    /// lineage.
    ///
    /// Returns `false` if there was no session.
    ///
    /// # Errors
    ///
    /// - `RotationInProgress` if the user's lock could not be taken
    /// - `Storage` on store failure
    pub async fn revoke_session(
        &self,
        user_id: &UserId,
        ctx: &RequestContext,
    ) -> Result<bool, RotationError> {
        let guard = self.acquire(user_id).await?;
        let result = self.revoke_locked(user_id, ctx).await;
        self.release(guard).await;
        result
    }

    async fn revoke_locked(
        &self,
        user_id: &UserId,
        ctx: &RequestContext,
    ) -> Result<bool, RotationError> {
        let Some(session) = self.sessions.delete(user_id).await? else {
            return Ok(false);
        };

        self.blacklist
            .revoke_all(&session.token_lineage(), RevocationReason::Logout)
            .await?;

        self.events
            .record(
                SecurityEvent::new(SecurityEventKind::SessionRevoked, ctx)
                    .with_detail("user_id", user_id.as_str()),
            )
            .await;

        Ok(true)
    }

    async fn acquire(&self, user_id: &UserId) -> Result<LockGuard, RotationError> {
        self.lock
            .acquire(user_id)
            .await?
            .ok_or(RotationError::RotationInProgress)
    }

    async fn release(&self, guard: LockGuard) {
        if let Err(e) = self.lock.release(guard).await {
            // The lock TTL bounds the damage.
            tracing::warn!(error = %e, "Failed to release rotation lock");
        }
    }

    async fn rotate_locked(
        &self,
        user_id: &UserId,
        presented: &str,
        ctx: &RequestContext,
    ) -> Result<TokenPair, RotationError> {
        let (mut session, version) = match self.sessions.load_versioned(user_id).await? {
            Some((session, version)) if !session.refresh_token.is_empty() => (session, version),
            _ => return Err(RotationError::NoRefreshToken),
        };

        if !constant_time_eq::constant_time_eq(
            presented.as_bytes(),
            session.refresh_token.as_bytes(),
        ) {
            if self.within_grace(&session, presented) {
                self.events
                    .record(
                        SecurityEvent::new(SecurityEventKind::RefreshRetryWithinGrace, ctx)
                            .with_detail("user_id", user_id.as_str())
                            .with_detail("presented", token_fingerprint(presented)),
                    )
                    .await;
                tracing::info!(user_id = %user_id, "Prior refresh token accepted within grace window");
                return Ok(session.token_pair());
            }

            return Err(self.invalidate_for_theft(session, presented, ctx).await);
        }

        if self.blacklist.is_revoked(presented).await? {
            // Current token blacklisted: an earlier write was lost or raced.
            tracing::error!(
                user_id = %user_id,
                token_hash = %token_fingerprint(presented),
                "Current refresh token found in blacklist"
            );
            self.events
                .record(
                    SecurityEvent::new(SecurityEventKind::TokenReplayRejected, ctx)
                        .with_detail("user_id", user_id.as_str())
                        .with_detail("presented", token_fingerprint(presented)),
                )
                .await;
            return Err(RotationError::TokenAlreadyUsed);
        }

        let response = self.refresh_with_retry(user_id, presented).await?;
        let now = Utc::now();
        let expires_at = response.expires_at(now);

        let rotated_to = response
            .refresh_token
            .filter(|r| !r.is_empty() && r.as_str() != presented);

        match rotated_to {
            Some(new_refresh) => {
                session.record_rotation(
                    TokenPair {
                        access_token: response.access_token,
                        refresh_token: new_refresh,
                        expires_at,
                    },
                    now,
                    self.config.history_limit,
                );

                // Session first: the current token must never be blacklisted,
                // even if the second write fails.
                if !self.sessions.replace(&session, &version).await? {
                    return Err(Self::superseded(user_id));
                }
                self.blacklist
                    .revoke(presented, RevocationReason::Rotated)
                    .await?;

                tracing::info!(
                    user_id = %user_id,
                    consumed = %token_fingerprint(presented),
                    issued = %token_fingerprint(&session.refresh_token),
                    "Refresh token rotated"
                );
            }
            None => {
                // The IdP kept the refresh token; it stays valid.
                session.access_token = response.access_token;
                session.expires_at = expires_at;
                session.last_sync_at = now;
                if !self.sessions.replace(&session, &version).await? {
                    return Err(Self::superseded(user_id));
                }

                tracing::info!(user_id = %user_id, "Access token refreshed without rotation");
            }
        }

        Ok(session.token_pair())
    }

    fn superseded(user_id: &UserId) -> RotationError {
        tracing::error!(
            user_id = %user_id,
            "Session changed while the refresh grant was in flight, discarding new tokens"
        );
        metrics::counter!("auth_rotation_write_conflict_total").increment(1);
        RotationError::ConcurrentUpdate
    }

    fn within_grace(&self, session: &UserSession, presented: &str) -> bool {
        let ReusePolicy::GraceWindow(window) = self.config.reuse_policy else {
            return false;
        };
        let Some(last) = session.rotation_history.back() else {
            return false;
        };
        let Ok(window) = chrono::Duration::from_std(window) else {
            return false;
        };

        constant_time_eq::constant_time_eq(
            last.previous_token_hash.as_bytes(),
            token_hash(presented).as_bytes(),
        ) && Utc::now() - last.rotated_at <= window
    }

    async fn invalidate_for_theft(
        &self,
        session: UserSession,
        presented: &str,
        ctx: &RequestContext,
    ) -> RotationError {
        let user_id = session.user_id.clone();
        let presented_hash = token_hash(presented);
        let mut lineage = session.token_lineage();
        if !lineage.contains(&presented_hash) {
            lineage.push(presented_hash);
        }

        self.events
            .record(
                SecurityEvent::new(SecurityEventKind::TokenTheftDetected, ctx)
                    .with_detail("user_id", user_id.as_str())
                    .with_detail("presented", token_fingerprint(presented))
                    .with_detail("revoked_tokens", lineage.len().to_string()),
            )
            .await;
        metrics::counter!("auth_token_theft_detected_total").increment(1);

        if let Err(e) = self.sessions.delete(&user_id).await {
            tracing::error!(user_id = %user_id, error = %e, "Failed to delete session after theft detection");
        }
        if let Err(e) = self
            .blacklist
            .revoke_all(&lineage, RevocationReason::TheftDetected)
            .await
        {
            tracing::error!(user_id = %user_id, error = %e, "Failed to blacklist token lineage");
        }

        tracing::error!(
            user_id = %user_id,
            revoked_tokens = lineage.len(),
            "Refresh token mismatch, session invalidated"
        );

        RotationError::TheftDetected
    }

    async fn refresh_with_retry(
        &self,
        user_id: &UserId,
        refresh_token: &str,
    ) -> Result<TokenResponse, RotationError> {
        let mut attempt = 0;
        loop {
            match self.idp.refresh(refresh_token).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt < self.config.transport_retries => {
                    attempt += 1;
                    tracing::warn!(
                        user_id = %user_id,
                        attempt = attempt,
                        error = %e,
                        "Refresh grant failed at transport level, retrying"
                    );
                }
                Err(e) if e.is_transient() => {
                    return Err(RotationError::ProviderUnavailable(e.to_string()));
                }
                Err(e) => {
                    tracing::warn!(user_id = %user_id, error = %e, "Refresh grant rejected");
                    return Err(RotationError::ProviderRejected(e.to_string()));
                }
            }
        }
    }
}

fn record_outcome(result: &Result<TokenPair, RotationError>) {
    let outcome = match result {
        Ok(_) => "success",
        Err(e) => e.code(),
    };
    metrics::counter!("auth_rotation_total", "outcome" => outcome).increment(1);
}
