//! Application state for Axum handlers.
//!
//! Generic over the security core's providers so tests can run the router
//! against the in-memory mocks. Production uses [`ProductionState`].

use crate::cookies::CookieSettings;
use crate::extractors::TrustedProxies;
use axum::extract::FromRef;
use sessionguard_auth::providers::{
    HttpIdentityProvider, IdentityProvider, KeyValueStore, RateLimiter,
};
use sessionguard_auth::stores::{RedisKeyValueStore, RedisRateLimiter};
use sessionguard_auth::{
    CallbackExchange, SecurityConfig, SecurityEventSink, TokenRotationService,
    TracingSecurityEventSink,
};
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
pub struct AppState<K, I, R, E> {
    /// Authorization-code callback.
    pub callback: Arc<CallbackExchange<K, I, R, E>>,
    /// Refresh-token rotation and logout.
    pub rotation: Arc<TokenRotationService<K, I, E>>,
    /// Session cookie attributes.
    pub cookies: CookieSettings,
    /// Proxies whose `X-Forwarded-For` entries are believed.
    pub trusted_proxies: TrustedProxies,
}

/// State wired to Redis, the HTTP IdP client and the tracing event sink.
pub type ProductionState =
    AppState<RedisKeyValueStore, HttpIdentityProvider, RedisRateLimiter, TracingSecurityEventSink>;

impl<K, I, R, E> Clone for AppState<K, I, R, E> {
    fn clone(&self) -> Self {
        Self {
            callback: Arc::clone(&self.callback),
            rotation: Arc::clone(&self.rotation),
            cookies: self.cookies,
            trusted_proxies: self.trusted_proxies,
        }
    }
}

impl<K, I, R, E> AppState<K, I, R, E>
where
    K: KeyValueStore,
    I: IdentityProvider,
    R: RateLimiter,
    E: SecurityEventSink,
{
    /// Wire the security core services over shared providers.
    #[must_use]
    pub fn new(
        store: Arc<K>,
        idp: Arc<I>,
        limiter: Arc<R>,
        events: Arc<E>,
        config: &SecurityConfig,
        cookie_secure: bool,
    ) -> Self {
        let cookies = CookieSettings {
            secure: cookie_secure,
            max_age: config.callback.session_cookie_ttl,
            issue_email: config.callback.issue_email_cookie,
        };
        Self {
            callback: Arc::new(CallbackExchange::new(
                Arc::clone(&store),
                Arc::clone(&idp),
                limiter,
                Arc::clone(&events),
                config,
            )),
            rotation: Arc::new(TokenRotationService::new(store, idp, events, config)),
            cookies,
            trusted_proxies: TrustedProxies::default(),
        }
    }

    /// Set how many reverse proxies sit in front of the server.
    #[must_use]
    pub fn with_trusted_proxies(mut self, trusted: TrustedProxies) -> Self {
        self.trusted_proxies = trusted;
        self
    }
}

impl<K, I, R, E> FromRef<AppState<K, I, R, E>> for TrustedProxies {
    fn from_ref(state: &AppState<K, I, R, E>) -> Self {
        state.trusted_proxies
    }
}
