//! Remote identity provider trait.

use crate::error::Result;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Remote OAuth2 identity provider.
///
/// Covers the three outbound calls the session-security core makes: the
/// authorization-code grant, the refresh-token grant and the profile
/// ("who am I") lookup.
///
/// # Error classification
///
/// Implementations must map failures so callers can tell an outage from an
/// answer:
/// - transport failure or timeout → `AuthError::ProviderUnavailable`
/// - non-success status → `AuthError::ProviderRejected`
/// - profile endpoint `403` → `AuthError::AccountForbidden`
/// - undecodable body → `AuthError::ProviderResponseInvalid`
pub trait IdentityProvider: Send + Sync {
    /// Whether client id and secret are configured.
    fn has_client_credentials(&self) -> bool;

    /// Exchange an authorization code and PKCE verifier for tokens.
    ///
    /// Never retried: the code is single-use at the IdP.
    ///
    /// # Errors
    ///
    /// See the trait-level error classification.
    fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> impl std::future::Future<Output = Result<TokenResponse>> + Send;

    /// Exchange a refresh token for a new token pair.
    ///
    /// # Errors
    ///
    /// See the trait-level error classification.
    fn refresh(
        &self,
        refresh_token: &str,
    ) -> impl std::future::Future<Output = Result<TokenResponse>> + Send;

    /// Fetch the account profile for an access token.
    ///
    /// # Errors
    ///
    /// See the trait-level error classification.
    fn fetch_profile(
        &self,
        access_token: &str,
    ) -> impl std::future::Future<Output = Result<AccountProfile>> + Send;
}

/// Token endpoint response.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct TokenResponse {
    /// Access token for API requests.
    pub access_token: String,

    /// Refresh token. Absent when the IdP does not rotate on refresh.
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Access token lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl TokenResponse {
    /// Absolute access-token expiry, relative to `now`.
    ///
    /// Falls back to one hour when the IdP omits `expires_in`. Values above
    /// [`MAX_EXPIRES_IN_SECS`] are clamped, so any IdP answer yields a
    /// representable instant.
    #[must_use]
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let seconds = self
            .expires_in
            .map_or(DEFAULT_EXPIRES_IN_SECS, |s| s.min(MAX_EXPIRES_IN_SECS));

        i64::try_from(seconds)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .unwrap_or(now)
    }
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// Longest access-token lifetime taken from an IdP answer (90 days).
pub const MAX_EXPIRES_IN_SECS: u64 = 90 * 24 * 60 * 60;

/// The two account classes the IdP exposes.
///
/// Only principal accounts may administer this system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountClass {
    /// Account owner.
    Principal,

    /// Delegated operator acting on behalf of a principal.
    Operator,
}

/// Account profile returned by the IdP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountProfile {
    /// Stable account identifier.
    pub user_id: String,

    /// Email address, if the IdP shares it.
    pub email: Option<String>,

    /// Display name.
    pub display_name: Option<String>,

    /// Account class.
    pub account_class: AccountClass,
}

impl AccountProfile {
    /// Create a principal-account profile.
    #[must_use]
    pub fn principal(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
            display_name: None,
            account_class: AccountClass::Principal,
        }
    }

    /// Create an operator-account profile.
    #[must_use]
    pub fn operator(user_id: impl Into<String>) -> Self {
        Self {
            account_class: AccountClass::Operator,
            ..Self::principal(user_id)
        }
    }

    /// Set email.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Whether this account may sign in.
    #[must_use]
    pub const fn is_principal(&self) -> bool {
        matches!(self.account_class, AccountClass::Principal)
    }
}
