//! Mock identity provider for testing.

use crate::error::{AuthError, Result};
use crate::providers::{AccountProfile, IdentityProvider, TokenResponse};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Scripted identity provider.
///
/// Token calls (`exchange_code` and `refresh`) take their result from a
/// queue; when the queue is empty a fresh, unique token pair is issued.
/// `fail_transport_times(n)` makes the next `n` token calls fail with
/// `AuthError::ProviderUnavailable` before the queue is consulted.
/// `set_refresh_delay` makes every `refresh` call take that long.
#[derive(Debug)]
pub struct MockIdentityProvider {
    has_credentials: AtomicBool,
    token_responses: Mutex<VecDeque<Result<TokenResponse>>>,
    transport_failures: AtomicU32,
    refresh_delay: Mutex<Duration>,
    profile: Mutex<Result<AccountProfile>>,
    issued: AtomicUsize,
    exchange_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    profile_calls: AtomicUsize,
    last_exchange: Mutex<Option<(String, String)>>,
    last_refresh: Mutex<Option<String>>,
}

impl MockIdentityProvider {
    /// Create a provider that succeeds for principal account `user-123`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            has_credentials: AtomicBool::new(true),
            token_responses: Mutex::new(VecDeque::new()),
            transport_failures: AtomicU32::new(0),
            refresh_delay: Mutex::new(Duration::ZERO),
            profile: Mutex::new(Ok(
                AccountProfile::principal("user-123").with_email("owner@example.com")
            )),
            issued: AtomicUsize::new(0),
            exchange_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            profile_calls: AtomicUsize::new(0),
            last_exchange: Mutex::new(None),
            last_refresh: Mutex::new(None),
        }
    }

    /// Toggle configured client credentials.
    pub fn set_has_credentials(&self, present: bool) {
        self.has_credentials.store(present, Ordering::SeqCst);
    }

    /// Queue a token response.
    pub fn push_token_response(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_in: Option<u64>,
    ) {
        self.queue().push_back(Ok(TokenResponse {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.map(str::to_string),
            expires_in,
        }));
    }

    /// Queue a token-endpoint error.
    pub fn push_token_error(&self, error: AuthError) {
        self.queue().push_back(Err(error));
    }

    /// Fail the next `times` token calls at transport level.
    pub fn fail_transport_times(&self, times: u32) {
        self.transport_failures.store(times, Ordering::SeqCst);
    }

    /// Latency of every subsequent `refresh` call.
    pub fn set_refresh_delay(&self, delay: Duration) {
        *self
            .refresh_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Profile returned by `fetch_profile`.
    pub fn set_profile(&self, profile: AccountProfile) {
        *self.profile.lock().unwrap_or_else(PoisonError::into_inner) = Ok(profile);
    }

    /// Error returned by `fetch_profile`.
    pub fn set_profile_error(&self, error: AuthError) {
        *self.profile.lock().unwrap_or_else(PoisonError::into_inner) = Err(error);
    }

    /// Number of `exchange_code` calls.
    #[must_use]
    pub fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    /// Number of `refresh` calls.
    #[must_use]
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Number of `fetch_profile` calls.
    #[must_use]
    pub fn profile_calls(&self) -> usize {
        self.profile_calls.load(Ordering::SeqCst)
    }

    /// `(code, verifier)` of the last code exchange.
    #[must_use]
    pub fn last_exchange(&self) -> Option<(String, String)> {
        self.last_exchange
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Refresh token presented in the last refresh call.
    #[must_use]
    pub fn last_refresh(&self) -> Option<String> {
        self.last_refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<TokenResponse>>> {
        self.token_responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn next_token_response(&self) -> Result<TokenResponse> {
        let injected = self
            .transport_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(AuthError::ProviderUnavailable(
                "connection reset (injected)".to_string(),
            ));
        }

        if let Some(scripted) = self.queue().pop_front() {
            return scripted;
        }

        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TokenResponse {
            access_token: format!("mock-access-{n}"),
            refresh_token: Some(format!("mock-refresh-{n}")),
            expires_in: Some(3600),
        })
    }
}

impl Default for MockIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityProvider for MockIdentityProvider {
    fn has_client_credentials(&self) -> bool {
        self.has_credentials.load(Ordering::SeqCst)
    }

    fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        _redirect_uri: &str,
    ) -> impl Future<Output = Result<TokenResponse>> + Send {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        *self
            .last_exchange
            .lock()
            .unwrap_or_else(PoisonError::into_inner) =
            Some((code.to_string(), code_verifier.to_string()));

        let result = self.next_token_response();
        async move { result }
    }

    fn refresh(&self, refresh_token: &str) -> impl Future<Output = Result<TokenResponse>> + Send {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        *self
            .last_refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(refresh_token.to_string());

        let result = self.next_token_response();
        let delay = *self
            .refresh_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            result
        }
    }

    fn fetch_profile(&self, _access_token: &str) -> impl Future<Output = Result<AccountProfile>> + Send {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        let result = self
            .profile
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        async move { result }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_then_generated() {
        let idp = MockIdentityProvider::new();
        idp.push_token_response("a", Some("r"), None);

        let first = idp.refresh("r0").await.unwrap();
        assert_eq!(first.refresh_token.as_deref(), Some("r"));

        let second = idp.refresh("r").await.unwrap();
        let third = idp.refresh("r").await.unwrap();
        assert_ne!(second.refresh_token, third.refresh_token);
        assert_eq!(idp.refresh_calls(), 3);
    }

    #[tokio::test]
    async fn test_transport_failures_are_consumed() {
        let idp = MockIdentityProvider::new();
        idp.fail_transport_times(1);

        assert!(idp.refresh("r0").await.unwrap_err().is_transient());
        assert!(idp.refresh("r0").await.is_ok());
    }
}
