//! Error types for the session-security core.

use thiserror::Error;

/// Result type alias for session-security operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Error taxonomy for storage, identity-provider and internal failures.
///
/// Flow-level outcomes (CSRF rejection, theft detection, ...) are not
/// represented here: they are typed values returned by the callback and
/// rotation services. `AuthError` covers the infrastructure those services
/// depend on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    // ═══════════════════════════════════════════════════════════
    // Identity Provider Errors
    // ═══════════════════════════════════════════════════════════

    /// The IdP could not be reached (connect error, timeout, reset).
    #[error("Identity provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The IdP answered with a non-success status.
    #[error("Identity provider rejected the request with status {status}")]
    ProviderRejected {
        /// HTTP status returned by the IdP
        status: u16,
    },

    /// The IdP answered 2xx but the body could not be decoded.
    #[error("Identity provider returned an invalid response: {0}")]
    ProviderResponseInvalid(String),

    /// The profile endpoint refused the account (HTTP 403).
    #[error("Account is not allowed to access this system")]
    AccountForbidden,

    /// Client id or secret is not configured.
    #[error("OAuth client credentials are not configured")]
    MissingClientCredentials,

    // ═══════════════════════════════════════════════════════════
    // Storage Errors
    // ═══════════════════════════════════════════════════════════

    /// Key/value store operation failed.
    #[error("Store error: {0}")]
    StoreError(String),

    /// A stored record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A PKCE verifier is already bound to this state.
    #[error("State is already bound to a verifier")]
    StateCollision,

    /// The state value does not have the required format.
    #[error("State parameter is malformed")]
    MalformedState,

    // ═══════════════════════════════════════════════════════════
    // Rate Limiting
    // ═══════════════════════════════════════════════════════════

    /// Too many attempts from the same key.
    #[error("Too many attempts, please retry after {retry_after:?}")]
    TooManyAttempts {
        /// Duration to wait before retrying
        retry_after: std::time::Duration,
    },

    // ═══════════════════════════════════════════════════════════
    // System Errors
    // ═══════════════════════════════════════════════════════════

    /// Settings that cannot work together.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal error (should not be exposed to users).
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl AuthError {
    /// Returns `true` for failures that may succeed on an identical retry.
    ///
    /// Only transport-level IdP failures qualify; an HTTP-level rejection is
    /// an answer, not an outage.
    ///
    /// # Examples
    ///
    /// ```
    /// # use sessionguard_auth::AuthError;
    /// assert!(AuthError::ProviderUnavailable("timeout".into()).is_transient());
    /// assert!(!AuthError::ProviderRejected { status: 400 }.is_transient());
    /// ```
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::ProviderUnavailable(_))
    }

    /// Returns `true` if this error indicates a security issue.
    ///
    /// # Examples
    ///
    /// ```
    /// # use sessionguard_auth::AuthError;
    /// assert!(AuthError::MalformedState.is_security_issue());
    /// assert!(!AuthError::StoreError("down".into()).is_security_issue());
    /// ```
    #[must_use]
    pub const fn is_security_issue(&self) -> bool {
        matches!(
            self,
            Self::MalformedState | Self::StateCollision | Self::TooManyAttempts { .. }
        )
    }
}

impl From<redis::RedisError> for AuthError {
    fn from(err: redis::RedisError) -> Self {
        Self::StoreError(err.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<bincode::Error> for AuthError {
    fn from(err: bincode::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(AuthError::ProviderUnavailable("reset".into()).is_transient());
        assert!(!AuthError::ProviderRejected { status: 503 }.is_transient());
        assert!(!AuthError::AccountForbidden.is_transient());
        assert!(!AuthError::StoreError("x".into()).is_transient());
    }

    #[test]
    fn test_display_hides_nothing_sensitive() {
        let err = AuthError::ProviderRejected { status: 401 };
        assert_eq!(
            err.to_string(),
            "Identity provider rejected the request with status 401"
        );
    }
}
