//! Configuration management for the sessionguard server.
//!
//! Loads configuration from environment variables with sensible defaults.
//! A `.env` file is read first when present.

use sessionguard_auth::{
    CallbackConfig, IdentityProviderConfig, PkceConfig, ReusePolicy, RotationConfig,
    SecurityConfig,
};
use std::env;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Redis configuration (verifiers, sessions, blacklist, locks)
    pub redis: RedisConfig,
    /// Identity provider configuration
    pub idp: IdentityProviderConfig,
    /// Login and rotation policy
    pub auth: AuthConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Prometheus exporter port (0 disables the exporter)
    pub metrics_port: u16,
    /// Reverse proxies in front of the server that append to
    /// `X-Forwarded-For` (0 ignores proxy headers)
    pub trusted_proxy_hops: usize,
}

/// Redis configuration
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,
}

/// Login and rotation policy.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Registered OAuth redirect URI
    pub redirect_uri: String,
    /// Administrative landing page the callback redirects to
    pub landing_url: String,
    /// Callback attempts allowed per client IP per window
    pub rate_limit_attempts: u32,
    /// Rate-limit window in seconds
    pub rate_limit_window: u64,
    /// IdP maximum refresh-token lifetime in days
    pub refresh_max_lifetime_days: u64,
    /// Grace window for the prior refresh token in seconds (0 = strict)
    pub refresh_grace_secs: u64,
    /// Issue the `user_email` cookie on login
    pub issue_email_cookie: bool,
    /// Set the `Secure` cookie attribute (disable only for local HTTP)
    pub cookie_secure: bool,
}

fn parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Load configuration from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        // Missing .env is the normal production case.
        let _ = dotenvy::dotenv();

        Self {
            server: ServerConfig {
                host: string("HOST", "0.0.0.0"),
                port: parsed("PORT", 8080),
                metrics_port: parsed("METRICS_PORT", 9090),
                trusted_proxy_hops: parsed("TRUSTED_PROXY_HOPS", 1),
            },
            redis: RedisConfig {
                url: string("REDIS_URL", "redis://localhost:6379"),
            },
            idp: IdentityProviderConfig::new(
                string("IDP_TOKEN_URL", "https://idp.example.com/oauth/token"),
                string("IDP_PROFILE_URL", "https://idp.example.com/api/me"),
                string("IDP_CLIENT_ID", ""),
                string("IDP_CLIENT_SECRET", ""),
            )
            .with_request_timeout(Duration::from_secs(parsed("IDP_TIMEOUT_SECS", 10)))
            .with_operator_account_types(
                string("IDP_OPERATOR_ACCOUNT_TYPES", "operator")
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            auth: AuthConfig {
                redirect_uri: string(
                    "AUTH_REDIRECT_URI",
                    "http://localhost:8080/api/auth/idp/callback",
                ),
                landing_url: string("AUTH_LANDING_URL", "/admin"),
                rate_limit_attempts: parsed("AUTH_RATE_LIMIT_ATTEMPTS", 10),
                rate_limit_window: parsed("AUTH_RATE_LIMIT_WINDOW", 60),
                refresh_max_lifetime_days: parsed("AUTH_REFRESH_MAX_LIFETIME_DAYS", 30),
                refresh_grace_secs: parsed("AUTH_REFRESH_GRACE_SECS", 0),
                issue_email_cookie: parsed("AUTH_ISSUE_EMAIL_COOKIE", true),
                cookie_secure: parsed("AUTH_COOKIE_SECURE", true),
            },
        }
    }

    /// Security core configuration derived from the auth settings.
    #[must_use]
    pub fn security_config(&self) -> SecurityConfig {
        let auth = &self.auth;

        let callback = CallbackConfig::new(auth.redirect_uri.clone(), auth.landing_url.clone())
            .with_email_cookie(auth.issue_email_cookie)
            .with_login_rate_limit(
                auth.rate_limit_attempts,
                Duration::from_secs(auth.rate_limit_window),
            );

        let reuse_policy = if auth.refresh_grace_secs == 0 {
            ReusePolicy::Strict
        } else {
            ReusePolicy::GraceWindow(Duration::from_secs(auth.refresh_grace_secs))
        };
        let rotation = RotationConfig::default()
            .with_refresh_token_max_lifetime(Duration::from_secs(
                auth.refresh_max_lifetime_days.saturating_mul(24 * 60 * 60),
            ))
            .with_reuse_policy(reuse_policy)
            .with_lock_ttl_for(self.idp.request_timeout);

        SecurityConfig::new(PkceConfig::default(), callback, rotation)
    }
}
