//! Session-security configuration.
//!
//! Configuration values should be provided by the application, not hardcoded.
//! Every struct has sensible defaults and `with_*` builder setters.

use crate::error::{AuthError, Result};
use std::time::Duration;

/// Headroom between the longest possible IdP refresh and the rotation lock
/// TTL, covering the store writes that follow it.
pub const LOCK_TTL_MARGIN: Duration = Duration::from_secs(5);

/// PKCE verifier cache and state validation configuration.
#[derive(Debug, Clone)]
pub struct PkceConfig {
    /// Minimum accepted length of a `state` value.
    ///
    /// Default: 32 characters
    pub min_state_len: usize,

    /// Lifetime of a `state → verifier` entry.
    ///
    /// Default: 10 minutes
    pub verifier_ttl: Duration,
}

impl PkceConfig {
    /// Set minimum state length.
    #[must_use]
    pub const fn with_min_state_len(mut self, len: usize) -> Self {
        self.min_state_len = len;
        self
    }

    /// Set verifier time-to-live.
    #[must_use]
    pub const fn with_verifier_ttl(mut self, ttl: Duration) -> Self {
        self.verifier_ttl = ttl;
        self
    }
}

impl Default for PkceConfig {
    fn default() -> Self {
        Self {
            min_state_len: 32,
            verifier_ttl: Duration::from_secs(10 * 60),
        }
    }
}

/// Login rate limit, applied per client address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginRateLimit {
    /// Attempts allowed per window.
    pub max_attempts: u32,

    /// Sliding window length.
    pub window: Duration,
}

impl Default for LoginRateLimit {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            window: Duration::from_secs(60),
        }
    }
}

/// Authorization-code callback configuration.
#[derive(Debug, Clone)]
pub struct CallbackConfig {
    /// Redirect URI registered with the IdP (sent again on code exchange).
    pub redirect_uri: String,

    /// Administrative landing page that receives the outcome redirect.
    pub landing_url: String,

    /// Lifetime of the `session_token` cookie and its server-side index.
    ///
    /// Default: 24 hours
    pub session_cookie_ttl: Duration,

    /// Also issue a `user_email` cookie when the profile has an email.
    ///
    /// Default: true
    pub issue_email_cookie: bool,

    /// Per-client login rate limit.
    pub login_rate_limit: LoginRateLimit,
}

impl CallbackConfig {
    /// Create new callback configuration.
    ///
    /// # Arguments
    ///
    /// * `redirect_uri` - Callback URL registered with the IdP
    /// * `landing_url` - Page that receives `auth_success` / `auth_error`
    #[must_use]
    pub fn new(redirect_uri: impl Into<String>, landing_url: impl Into<String>) -> Self {
        Self {
            redirect_uri: redirect_uri.into(),
            landing_url: landing_url.into(),
            ..Self::default()
        }
    }

    /// Set session cookie lifetime.
    #[must_use]
    pub const fn with_session_cookie_ttl(mut self, ttl: Duration) -> Self {
        self.session_cookie_ttl = ttl;
        self
    }

    /// Enable or disable the `user_email` cookie.
    #[must_use]
    pub const fn with_email_cookie(mut self, issue: bool) -> Self {
        self.issue_email_cookie = issue;
        self
    }

    /// Set the login rate limit.
    #[must_use]
    pub const fn with_login_rate_limit(mut self, max_attempts: u32, window: Duration) -> Self {
        self.login_rate_limit = LoginRateLimit {
            max_attempts,
            window,
        };
        self
    }
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            redirect_uri: "http://localhost:8080/api/auth/idp/callback".to_string(),
            landing_url: "http://localhost:3000/admin".to_string(),
            session_cookie_ttl: Duration::from_secs(24 * 60 * 60),
            issue_email_cookie: true,
            login_rate_limit: LoginRateLimit::default(),
        }
    }
}

/// What to do when the refresh token immediately preceding the current one
/// is presented again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReusePolicy {
    /// Any token other than the current one is theft.
    Strict,

    /// The immediately-prior token is accepted for this long after the
    /// rotation that retired it; the caller receives the current pair
    /// without a new IdP exchange. Older tokens are still theft.
    GraceWindow(Duration),
}

/// Refresh-token rotation configuration.
#[derive(Debug, Clone)]
pub struct RotationConfig {
    /// Number of rotation records kept per session.
    ///
    /// Default: 10
    pub history_limit: usize,

    /// Longest lifetime the IdP grants a refresh token.
    ///
    /// Used as the TTL of blacklist entries and session records.
    /// Default: 30 days
    pub refresh_token_max_lifetime: Duration,

    /// TTL of the per-user rotation lock.
    ///
    /// Must outlast the slowest refresh: every transport attempt timing out,
    /// plus [`LOCK_TTL_MARGIN`]. See [`SecurityConfig::validate`].
    /// Default: 30 seconds (two 10-second IdP attempts plus margin)
    pub lock_ttl: Duration,

    /// How long a caller waits for a concurrent rotation to finish.
    ///
    /// Default: 5 seconds
    pub lock_wait: Duration,

    /// Poll interval while waiting for the lock.
    ///
    /// Default: 50 milliseconds
    pub lock_retry_interval: Duration,

    /// Handling of the immediately-prior token.
    ///
    /// Default: [`ReusePolicy::Strict`]
    pub reuse_policy: ReusePolicy,

    /// Extra attempts for the refresh grant on transport failure.
    ///
    /// Default: 1
    pub transport_retries: u32,

    /// Access tokens expiring sooner than this are refreshed proactively.
    ///
    /// Default: 60 seconds
    pub refresh_skew: Duration,
}

impl RotationConfig {
    /// Set history size.
    #[must_use]
    pub const fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Set the refresh token maximum lifetime.
    #[must_use]
    pub const fn with_refresh_token_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.refresh_token_max_lifetime = lifetime;
        self
    }

    /// Set the lock TTL and wait budget.
    #[must_use]
    pub const fn with_lock(mut self, ttl: Duration, wait: Duration) -> Self {
        self.lock_ttl = ttl;
        self.lock_wait = wait;
        self
    }

    /// Set the reuse policy.
    #[must_use]
    pub const fn with_reuse_policy(mut self, policy: ReusePolicy) -> Self {
        self.reuse_policy = policy;
        self
    }

    /// Set the number of transport-level retries.
    #[must_use]
    pub const fn with_transport_retries(mut self, retries: u32) -> Self {
        self.transport_retries = retries;
        self
    }

    /// Longest a rotation can spend waiting on the IdP: every attempt
    /// running into `request_timeout`.
    #[must_use]
    pub const fn worst_case_refresh(&self, request_timeout: Duration) -> Duration {
        request_timeout.saturating_mul(self.transport_retries.saturating_add(1))
    }

    /// Size the lock TTL for an IdP client with `request_timeout`.
    ///
    /// Never shortens an already longer TTL.
    #[must_use]
    pub fn with_lock_ttl_for(mut self, request_timeout: Duration) -> Self {
        let required = self
            .worst_case_refresh(request_timeout)
            .saturating_add(LOCK_TTL_MARGIN);
        self.lock_ttl = self.lock_ttl.max(required);
        self
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            history_limit: 10,
            refresh_token_max_lifetime: Duration::from_secs(30 * 24 * 60 * 60),
            lock_ttl: Duration::from_secs(30),
            lock_wait: Duration::from_secs(5),
            lock_retry_interval: Duration::from_millis(50),
            reuse_policy: ReusePolicy::Strict,
            transport_retries: 1,
            refresh_skew: Duration::from_secs(60),
        }
    }
}

/// Remote identity provider endpoints and client credentials.
#[derive(Clone)]
pub struct IdentityProviderConfig {
    /// OAuth token endpoint (authorization-code and refresh grants).
    pub token_url: String,

    /// "Who am I" profile endpoint.
    pub profile_url: String,

    /// OAuth client id.
    pub client_id: String,

    /// OAuth client secret (keep confidential).
    pub client_secret: String,

    /// Timeout applied to every outbound request.
    ///
    /// Default: 10 seconds
    pub request_timeout: Duration,

    /// `account_type` values that mark an operator (non-principal) account.
    ///
    /// Default: `["operator"]`
    pub operator_account_types: Vec<String>,
}

impl IdentityProviderConfig {
    /// Create new IdP configuration.
    #[must_use]
    pub fn new(
        token_url: impl Into<String>,
        profile_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            token_url: token_url.into(),
            profile_url: profile_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            request_timeout: Duration::from_secs(10),
            operator_account_types: vec!["operator".to_string()],
        }
    }

    /// Set request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the account types treated as operator accounts.
    #[must_use]
    pub fn with_operator_account_types(mut self, types: Vec<String>) -> Self {
        self.operator_account_types = types;
        self
    }

    /// Whether both client id and secret are present.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret.trim().is_empty()
    }
}

impl std::fmt::Debug for IdentityProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityProviderConfig")
            .field("token_url", &self.token_url)
            .field("profile_url", &self.profile_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .field("operator_account_types", &self.operator_account_types)
            .finish()
    }
}

/// All session-security settings, as handed to the services.
#[derive(Debug, Clone, Default)]
pub struct SecurityConfig {
    /// PKCE verifier cache and state validation.
    pub pkce: PkceConfig,

    /// Callback exchange.
    pub callback: CallbackConfig,

    /// Refresh-token rotation.
    pub rotation: RotationConfig,
}

impl SecurityConfig {
    /// Create from parts.
    #[must_use]
    pub const fn new(pkce: PkceConfig, callback: CallbackConfig, rotation: RotationConfig) -> Self {
        Self {
            pkce,
            callback,
            rotation,
        }
    }

    /// Check that the rotation lock cannot expire while its holder is still
    /// waiting on an IdP client with `request_timeout`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidConfig` if `lock_ttl` does not exceed the
    /// worst-case refresh by at least [`LOCK_TTL_MARGIN`].
    pub fn validate(&self, request_timeout: Duration) -> Result<()> {
        let worst = self.rotation.worst_case_refresh(request_timeout);
        let required = worst.saturating_add(LOCK_TTL_MARGIN);

        if self.rotation.lock_ttl < required {
            return Err(AuthError::InvalidConfig(format!(
                "rotation lock TTL {:?} must be at least {:?} ({} IdP attempts of {:?} plus {:?})",
                self.rotation.lock_ttl,
                required,
                self.rotation.transport_retries.saturating_add(1),
                request_timeout,
                LOCK_TTL_MARGIN,
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;

    #[test]
    fn test_callback_config_builder() {
        let config = CallbackConfig::new("https://api.example.com/cb", "https://admin.example.com")
            .with_session_cookie_ttl(Duration::from_secs(3600))
            .with_email_cookie(false)
            .with_login_rate_limit(3, Duration::from_secs(30));

        assert_eq!(config.redirect_uri, "https://api.example.com/cb");
        assert_eq!(config.landing_url, "https://admin.example.com");
        assert_eq!(config.session_cookie_ttl, Duration::from_secs(3600));
        assert!(!config.issue_email_cookie);
        assert_eq!(config.login_rate_limit.max_attempts, 3);
    }

    #[test]
    fn test_rotation_defaults() {
        let config = RotationConfig::default();
        assert_eq!(config.history_limit, 10);
        assert_eq!(config.reuse_policy, ReusePolicy::Strict);
        assert_eq!(config.transport_retries, 1);
    }

    #[test]
    fn test_default_lock_outlasts_worst_case_refresh() {
        let idp = IdentityProviderConfig::new("https://idp/token", "https://idp/me", "id", "s");
        let config = SecurityConfig::default();

        assert!(
            config.rotation.lock_ttl
                > config.rotation.worst_case_refresh(idp.request_timeout)
        );
        assert!(config.validate(idp.request_timeout).is_ok());
    }

    #[test]
    fn test_lock_shorter_than_refresh_is_rejected() {
        let config = SecurityConfig {
            rotation: RotationConfig::default()
                .with_lock(Duration::from_secs(10), Duration::from_secs(5)),
            ..SecurityConfig::default()
        };

        let err = config.validate(Duration::from_secs(10)).unwrap_err();
        assert!(matches!(err, AuthError::InvalidConfig(_)));
    }

    #[test]
    fn test_lock_ttl_sized_for_slow_idp() {
        let rotation = RotationConfig::default()
            .with_transport_retries(2)
            .with_lock_ttl_for(Duration::from_secs(20));

        assert_eq!(rotation.lock_ttl, Duration::from_secs(65));
        let config = SecurityConfig {
            rotation,
            ..SecurityConfig::default()
        };
        assert!(config.validate(Duration::from_secs(20)).is_ok());
    }

    #[test]
    fn test_pkce_defaults() {
        let config = PkceConfig::default();
        assert_eq!(config.min_state_len, 32);
    }

    #[test]
    fn test_idp_credentials_check() {
        let config = IdentityProviderConfig::new("https://idp/token", "https://idp/me", "id", "");
        assert!(!config.has_credentials());

        let config = IdentityProviderConfig::new("https://idp/token", "https://idp/me", "id", "s");
        assert!(config.has_credentials());
    }

    #[test]
    fn test_idp_debug_redacts_secret() {
        let config =
            IdentityProviderConfig::new("https://idp/token", "https://idp/me", "id", "hunter2");
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
