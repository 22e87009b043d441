//! PKCE verifier cache and CSRF `state` validation.
//!
//! Before redirecting to the IdP, the authorization initiator stores
//! `state → verifier`. When the IdP redirects back, [`StateValidator`]
//! consumes that entry exactly once:
//!
//! ```text
//! code/state present? ──no──▶ missing_params
//!        │
//! state well-formed?  ──no──▶ delete entry, CRITICAL event, malformed_state
//!        │
//! GETDEL auth:pkce:{state}
//!        │
//! entry found?        ──no──▶ CRITICAL event, invalid_state
//!        │
//!        ▼
//!   ValidatedCallback { code, verifier }
//! ```
//!
//! The entry is gone after the lookup whatever the outcome, so a retried or
//! replayed callback always fails with `invalid_state`.

use crate::callback::{CallbackErrorCode, CallbackFailure};
use crate::config::PkceConfig;
use crate::error::{AuthError, Result};
use crate::events::{RequestContext, SecurityEvent, SecurityEventKind, SecurityEventSink};
use crate::providers::KeyValueStore;
use crate::utils::{random_urlsafe, token_hash, truncate_secret};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Generate a `state` value (32 random bytes, 43 URL-safe characters).
#[must_use]
pub fn generate_state() -> String {
    random_urlsafe(32)
}

/// Generate a PKCE code verifier (48 random bytes, 64 URL-safe characters).
#[must_use]
pub fn generate_verifier() -> String {
    random_urlsafe(48)
}

/// S256 code challenge: `BASE64URL(SHA256(verifier))`.
#[must_use]
pub fn code_challenge(verifier: &str) -> String {
    token_hash(verifier)
}

/// Whether `state` has the shape of a value the initiator could have issued.
///
/// At least `min_len` characters from `[A-Za-z0-9_-]`.
///
/// # Examples
///
/// ```
/// use sessionguard_auth::pkce::is_well_formed_state;
///
/// assert!(is_well_formed_state("abcdef0123456789abcdef0123456789", 32));
/// assert!(!is_well_formed_state("abcdef0123456789abcdef012345678", 32));
/// assert!(!is_well_formed_state("abcdef0123456789abcdef0123456789=", 32));
/// ```
#[must_use]
pub fn is_well_formed_state(state: &str, min_len: usize) -> bool {
    state.len() >= min_len
        && state
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Stored `state → verifier` binding.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkceVerifierEntry {
    /// The `state` this verifier is bound to.
    pub state: String,

    /// PKCE code verifier.
    pub verifier: String,

    /// When the binding was created.
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for PkceVerifierEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkceVerifierEntry")
            .field("state", &truncate_secret(&self.state, 8))
            .field("verifier", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Single-use PKCE verifier storage.
///
/// Key: `auth:pkce:{state}`, JSON value, TTL from [`PkceConfig`].
pub struct PkceVerifierCache<K> {
    store: Arc<K>,
    config: PkceConfig,
}

impl<K> Clone for PkceVerifierCache<K> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

impl<K: KeyValueStore> PkceVerifierCache<K> {
    /// Create a verifier cache.
    #[must_use]
    pub const fn new(store: Arc<K>, config: PkceConfig) -> Self {
        Self { store, config }
    }

    fn key(state: &str) -> String {
        format!("auth:pkce:{state}")
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &PkceConfig {
        &self.config
    }

    /// Bind `verifier` to `state`.
    ///
    /// # Errors
    ///
    /// - `AuthError::MalformedState` if `state` is not well-formed
    /// - `AuthError::StateCollision` if `state` is already bound
    /// - `AuthError::StoreError` if the store fails
    pub async fn store(&self, state: &str, verifier: &str) -> Result<()> {
        if !is_well_formed_state(state, self.config.min_state_len) {
            return Err(AuthError::MalformedState);
        }

        let entry = PkceVerifierEntry {
            state: state.to_string(),
            verifier: verifier.to_string(),
            created_at: Utc::now(),
        };
        let bytes = serde_json::to_vec(&entry)?;

        let written = self
            .store
            .set_nx_ex(&Self::key(state), &bytes, self.config.verifier_ttl)
            .await?;
        if !written {
            return Err(AuthError::StateCollision);
        }

        tracing::debug!(
            state_prefix = %truncate_secret(state, 8),
            ttl_seconds = self.config.verifier_ttl.as_secs(),
            "Stored PKCE verifier"
        );
        Ok(())
    }

    /// Atomically take the entry bound to `state`.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails or the entry cannot be decoded. The
    /// entry is deleted in both cases.
    pub async fn consume(&self, state: &str) -> Result<Option<PkceVerifierEntry>> {
        let Some(bytes) = self.store.get_del(&Self::key(state)).await? else {
            return Ok(None);
        };
        let entry: PkceVerifierEntry = serde_json::from_slice(&bytes)?;
        Ok(Some(entry))
    }

    /// Delete any entry bound to `state`.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn discard(&self, state: &str) -> Result<bool> {
        self.store.delete(&Self::key(state)).await
    }
}

/// A callback whose `state` was valid and has been consumed.
#[derive(Clone, PartialEq, Eq)]
pub struct ValidatedCallback {
    /// Authorization code from the IdP.
    pub code: String,

    /// Consumed `state`.
    pub state: String,

    /// PKCE verifier bound to `state`.
    pub verifier: String,
}

impl std::fmt::Debug for ValidatedCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatedCallback")
            .field("code", &"<redacted>")
            .field("state", &truncate_secret(&self.state, 8))
            .field("verifier", &"<redacted>")
            .finish()
    }
}

/// Validates the `code`/`state` pair of an inbound callback.
pub struct StateValidator<K, E> {
    cache: PkceVerifierCache<K>,
    events: Arc<E>,
}

impl<K, E> Clone for StateValidator<K, E> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            events: Arc::clone(&self.events),
        }
    }
}

impl<K: KeyValueStore, E: SecurityEventSink> StateValidator<K, E> {
    /// Create a validator.
    #[must_use]
    pub const fn new(cache: PkceVerifierCache<K>, events: Arc<E>) -> Self {
        Self { cache, events }
    }

    /// Validate and consume a callback's `state`.
    ///
    /// Empty strings count as absent.
    ///
    /// # Errors
    ///
    /// - `missing_params` if `code` or `state` is absent (no I/O)
    /// - `malformed_state` if `state` has the wrong shape
    /// - `invalid_state` if no verifier is bound to `state`
    /// - `unexpected_error` if the store fails
    pub async fn validate(
        &self,
        code: Option<&str>,
        state: Option<&str>,
        ctx: &RequestContext,
    ) -> std::result::Result<ValidatedCallback, CallbackFailure> {
        let code = code.filter(|c| !c.is_empty());
        let state = state.filter(|s| !s.is_empty());
        let (Some(code), Some(state)) = (code, state) else {
            return Err(CallbackFailure::new(CallbackErrorCode::MissingParams));
        };

        if !is_well_formed_state(state, self.cache.config().min_state_len) {
            if let Err(e) = self.cache.discard(state).await {
                tracing::warn!(error = %e, "Failed to discard malformed state entry");
            }

            self.events
                .record(
                    SecurityEvent::new(SecurityEventKind::MalformedState, ctx)
                        .with_detail("state_prefix", truncate_secret(state, 16))
                        .with_detail("state_len", state.len().to_string()),
                )
                .await;

            return Err(CallbackFailure::new(CallbackErrorCode::MalformedState));
        }

        let entry = match self.cache.consume(state).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::error!(error = %e, "PKCE verifier lookup failed");
                return Err(CallbackFailure::new(CallbackErrorCode::UnexpectedError));
            }
        };

        let Some(entry) = entry else {
            self.events
                .record(
                    SecurityEvent::new(SecurityEventKind::InvalidState, ctx)
                        .with_detail("state_prefix", truncate_secret(state, 8)),
                )
                .await;

            return Err(CallbackFailure::new(CallbackErrorCode::InvalidState));
        };

        tracing::debug!(
            state_prefix = %truncate_secret(state, 8),
            "PKCE state consumed"
        );

        Ok(ValidatedCallback {
            code: code.to_string(),
            state: entry.state,
            verifier: entry.verifier,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use crate::mocks::{MockKeyValueStore, RecordingSecurityEventSink};

    const STATE: &str = "abcdef0123456789abcdef0123456789";

    fn validator() -> (
        StateValidator<MockKeyValueStore, RecordingSecurityEventSink>,
        PkceVerifierCache<MockKeyValueStore>,
        Arc<MockKeyValueStore>,
        Arc<RecordingSecurityEventSink>,
    ) {
        let store = Arc::new(MockKeyValueStore::new());
        let events = Arc::new(RecordingSecurityEventSink::new());
        let cache = PkceVerifierCache::new(Arc::clone(&store), PkceConfig::default());
        let validator = StateValidator::new(cache.clone(), Arc::clone(&events));
        (validator, cache, store, events)
    }

    #[test]
    fn test_code_challenge_matches_rfc7636_vector() {
        // RFC 7636 appendix B
        let verifier = "dBjftJeZ4CVP-mJ92K9fyUWHJaw9b5Qpxr_vSSHp74";
        assert_eq!(
            code_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_generated_values_are_well_formed() {
        assert!(is_well_formed_state(&generate_state(), 32));
        let verifier = generate_verifier();
        assert!((43..=128).contains(&verifier.len()));
    }

    #[tokio::test]
    async fn test_store_rejects_collision() {
        let (_, cache, _, _) = validator();
        cache.store(STATE, "V1").await.unwrap();
        assert_eq!(
            cache.store(STATE, "V2").await.unwrap_err(),
            AuthError::StateCollision
        );
    }

    #[tokio::test]
    async fn test_store_rejects_malformed_state() {
        let (_, cache, _, _) = validator();
        assert_eq!(
            cache.store("short", "V1").await.unwrap_err(),
            AuthError::MalformedState
        );
    }

    #[tokio::test]
    async fn test_missing_params_performs_no_io() {
        let (validator, _, store, events) = validator();
        let ctx = RequestContext::default();

        for (code, state) in [(None, Some(STATE)), (Some("C1"), None), (Some(""), Some(STATE))] {
            let failure = validator.validate(code, state, &ctx).await.unwrap_err();
            assert_eq!(failure.code, CallbackErrorCode::MissingParams);
        }

        assert_eq!(store.operation_count(), 0);
        assert!(events.events().is_empty());
    }

    #[tokio::test]
    async fn test_valid_state_is_consumed_once() {
        let (validator, cache, _, events) = validator();
        let ctx = RequestContext::default();
        cache.store(STATE, "V1").await.unwrap();

        let validated = validator.validate(Some("C1"), Some(STATE), &ctx).await.unwrap();
        assert_eq!(validated.verifier, "V1");
        assert_eq!(validated.code, "C1");

        let failure = validator
            .validate(Some("C1"), Some(STATE), &ctx)
            .await
            .unwrap_err();
        assert_eq!(failure.code, CallbackErrorCode::InvalidState);
        assert_eq!(
            events.kinds(),
            vec![SecurityEventKind::InvalidState]
        );
    }

    #[tokio::test]
    async fn test_malformed_state_clears_entry_and_reports() {
        let (validator, _, store, events) = validator();
        let ctx = RequestContext::new("198.51.100.4", None);
        let bad_state = "abc+def/0123456789abcdef0123456789";
        store
            .set_ex(&format!("auth:pkce:{bad_state}"), b"{}", std::time::Duration::from_secs(60))
            .await
            .unwrap();

        let failure = validator
            .validate(Some("C1"), Some(bad_state), &ctx)
            .await
            .unwrap_err();

        assert_eq!(failure.code, CallbackErrorCode::MalformedState);
        assert!(!store.exists(&format!("auth:pkce:{bad_state}")).await.unwrap());
        let recorded = events.events();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].severity, crate::events::Severity::Critical);
        assert_eq!(recorded[0].client_address, "198.51.100.4");
    }

    #[tokio::test]
    async fn test_concurrent_validation_admits_one_caller() {
        let (validator, cache, _, _) = validator();
        cache.store(STATE, "V1").await.unwrap();

        let mut handles = vec![];
        for _ in 0..8 {
            let validator = validator.clone();
            handles.push(tokio::spawn(async move {
                validator
                    .validate(Some("C1"), Some(STATE), &RequestContext::default())
                    .await
                    .is_ok()
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }
}
