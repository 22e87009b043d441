//! Error types for the JSON session endpoints.
//!
//! The callback endpoint never produces these: it always redirects. The
//! refresh and logout endpoints map [`RotationError`] and [`AuthError`]
//! onto status codes here.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use sessionguard_auth::{AuthError, RotationError};
use std::fmt;

/// Application error type for web handlers.
///
/// # Examples
///
/// ```ignore
/// async fn handler() -> Result<Json<Data>, AppError> {
///     let session = resolve(cookie).await?
///         .ok_or_else(|| AppError::unauthorized("No active session"))?;
///     Ok(Json(session.into()))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: String,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: String) -> Self {
        Self {
            status,
            message,
            code,
            source: None,
        }
    }

    /// Create a new error with a source error.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// HTTP status of this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code of this error.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Create a 401 Unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            message.into(),
            "UNAUTHORIZED".to_string(),
        )
    }

    /// Create a 409 Conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::CONFLICT,
            message.into(),
            "CONFLICT".to_string(),
        )
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message.into(),
            "INTERNAL_SERVER_ERROR".to_string(),
        )
    }

    /// Create a 503 Service Unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            message.into(),
            "SERVICE_UNAVAILABLE".to_string(),
        )
    }

    fn with_code(mut self, code: &str) -> Self {
        self.code = code.to_uppercase();
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    /// Error code (for client error handling).
    code: String,
    /// Human-readable error message.
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    error = %source,
                    "Internal server error"
                );
            } else {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    "Internal server error"
                );
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<RotationError> for AppError {
    fn from(err: RotationError) -> Self {
        let code = err.code();
        match err {
            RotationError::NoRefreshToken
            | RotationError::TokenAlreadyUsed
            | RotationError::TheftDetected
            | RotationError::ProviderRejected(_) => {
                Self::unauthorized("Session is no longer valid. Sign in again.").with_code(code)
            }
            RotationError::ProviderUnavailable(_) => {
                Self::unavailable("Identity provider unavailable. Try again shortly.")
                    .with_code(code)
            }
            RotationError::RotationInProgress => {
                Self::conflict("Session refresh already in progress.").with_code(code)
            }
            RotationError::ConcurrentUpdate => {
                Self::conflict("Session changed during refresh. Retry with the current session.")
                    .with_code(code)
            }
            RotationError::Storage(e) => Self::from(e),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        Self::internal("An internal error occurred").with_source(anyhow::Error::new(err))
    }
}

/// Convert `anyhow::Error` to `AppError`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AppError::unauthorized("No session");
        assert_eq!(err.to_string(), "[UNAUTHORIZED] No session");
    }

    #[test]
    fn test_theft_maps_to_unauthorized() {
        let err = AppError::from(RotationError::TheftDetected);
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.code(), "THEFT_DETECTED");
    }

    #[test]
    fn test_provider_outage_maps_to_unavailable() {
        let err = AppError::from(RotationError::ProviderUnavailable("timeout".into()));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_storage_error_hides_details() {
        let err = AppError::from(RotationError::Storage(AuthError::StoreError(
            "redis down".into(),
        )));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "[INTERNAL_SERVER_ERROR] An internal error occurred");
    }

    #[test]
    fn test_lock_contention_is_conflict() {
        let err = AppError::from(RotationError::RotationInProgress);
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_write_conflict_is_conflict() {
        let err = AppError::from(RotationError::ConcurrentUpdate);
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "CONCURRENT_UPDATE");
    }
}
