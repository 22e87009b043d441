//! Session cookies.
//!
//! The browser only ever sees these three values; IdP tokens stay server
//! side.

use axum_extra::extract::cookie::{Cookie, SameSite};
use sessionguard_auth::AuthenticatedSession;
use time::Duration;

/// Opaque session token cookie.
pub const SESSION_COOKIE: &str = "session_token";

/// Companion user id cookie.
pub const USER_ID_COOKIE: &str = "user_id";

/// Optional email cookie.
pub const EMAIL_COOKIE: &str = "user_email";

/// Cookie attributes shared by every session cookie.
#[derive(Debug, Clone, Copy)]
pub struct CookieSettings {
    /// `Secure` attribute. Only disabled for local HTTP development.
    pub secure: bool,
    /// `Max-Age`.
    pub max_age: std::time::Duration,
    /// Issue the email cookie when the profile has an email.
    pub issue_email: bool,
}

impl CookieSettings {
    fn build(&self, name: &'static str, value: String) -> Cookie<'static> {
        let max_age = i64::try_from(self.max_age.as_secs()).unwrap_or(i64::MAX);
        Cookie::build((name, value))
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(Duration::seconds(max_age))
            .build()
    }
}

/// Cookies issued after a successful login.
#[must_use]
pub fn session_cookies(
    session: &AuthenticatedSession,
    settings: &CookieSettings,
) -> Vec<Cookie<'static>> {
    let mut cookies = vec![
        settings.build(SESSION_COOKIE, session.session_token.clone()),
        settings.build(USER_ID_COOKIE, session.user_id.to_string()),
    ];
    if settings.issue_email {
        if let Some(email) = &session.email {
            cookies.push(settings.build(EMAIL_COOKIE, email.clone()));
        }
    }
    cookies
}

/// Removal cookies for every session cookie.
#[must_use]
pub fn cleared_cookies() -> [Cookie<'static>; 3] {
    [SESSION_COOKIE, USER_ID_COOKIE, EMAIL_COOKIE].map(|name| {
        Cookie::build((name, ""))
            .path("/")
            .max_age(Duration::ZERO)
            .build()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sessionguard_auth::UserId;

    fn session(email: Option<&str>) -> AuthenticatedSession {
        AuthenticatedSession {
            user_id: UserId::new("user-123"),
            session_token: "opaque".into(),
            email: email.map(str::to_string),
            expires_at: Utc::now(),
        }
    }

    const SETTINGS: CookieSettings = CookieSettings {
        secure: true,
        max_age: std::time::Duration::from_secs(24 * 60 * 60),
        issue_email: true,
    };

    #[test]
    fn test_session_cookie_attributes() {
        let cookies = session_cookies(&session(Some("owner@example.com")), &SETTINGS);

        assert_eq!(cookies.len(), 3);
        for cookie in &cookies {
            assert_eq!(cookie.http_only(), Some(true));
            assert_eq!(cookie.secure(), Some(true));
            assert_eq!(cookie.same_site(), Some(SameSite::Lax));
            assert_eq!(cookie.path(), Some("/"));
            assert_eq!(cookie.max_age(), Some(Duration::hours(24)));
        }
    }

    #[test]
    fn test_email_cookie_is_optional() {
        assert_eq!(session_cookies(&session(None), &SETTINGS).len(), 2);

        let no_email = CookieSettings {
            issue_email: false,
            ..SETTINGS
        };
        assert_eq!(
            session_cookies(&session(Some("owner@example.com")), &no_email).len(),
            2
        );
    }

    #[test]
    fn test_cleared_cookies_expire_immediately() {
        for cookie in cleared_cookies() {
            assert_eq!(cookie.max_age(), Some(Duration::ZERO));
            assert_eq!(cookie.value(), "");
        }
    }
}
