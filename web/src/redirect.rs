//! Landing-page redirect URLs for the callback outcome.

use sessionguard_auth::{CallbackErrorCode, CallbackFailure, UserId};

/// `{landing}?auth_success=true&user_id=<id>`
#[must_use]
pub fn success_url(landing_url: &str, user_id: &UserId) -> String {
    with_query(
        landing_url,
        &[("auth_success", "true"), ("user_id", user_id.as_str())],
    )
}

/// `{landing}?auth_error=<code>[&message=<text>]`
#[must_use]
pub fn failure_url(landing_url: &str, failure: &CallbackFailure) -> String {
    let code = failure.code.as_str();
    match failure.message.as_deref() {
        Some(message) => with_query(landing_url, &[("auth_error", code), ("message", message)]),
        None => with_query(landing_url, &[("auth_error", code)]),
    }
}

fn with_query(landing_url: &str, pairs: &[(&str, &str)]) -> String {
    let query = serde_urlencoded::to_string(pairs).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to encode redirect query");
        format!("auth_error={}", CallbackErrorCode::UnexpectedError.as_str())
    });
    let separator = if landing_url.contains('?') { '&' } else { '?' };
    format!("{landing_url}{separator}{query}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_url() {
        assert_eq!(
            success_url("https://app.example.com/admin", &UserId::new("user-123")),
            "https://app.example.com/admin?auth_success=true&user_id=user-123"
        );
    }

    #[test]
    fn test_failure_url_encodes_message() {
        let failure = CallbackFailure::new(CallbackErrorCode::RateLimitExceeded)
            .with_message("Try again in 60 seconds.");

        assert_eq!(
            failure_url("/admin", &failure),
            "/admin?auth_error=rate_limit_exceeded&message=Try+again+in+60+seconds."
        );
    }

    #[test]
    fn test_existing_query_is_preserved() {
        let failure = CallbackFailure::new(CallbackErrorCode::InvalidState);
        assert_eq!(
            failure_url("/admin?tab=security", &failure),
            "/admin?tab=security&auth_error=invalid_state"
        );
    }
}
