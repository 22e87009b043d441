//! Custom Axum extractors.
//!
//! - `ClientIp`: client IP address from proxy headers or the connection,
//!   trusting only as many `X-Forwarded-For` hops as [`TrustedProxies`] says
//! - `UserAgent`: the `User-Agent` header, if any
//!
//! Both feed the [`RequestContext`] that accompanies every security event.
//!
//! # Examples
//!
//! ```ignore
//! async fn handler(client_ip: ClientIp, user_agent: UserAgent) -> StatusCode {
//!     let ctx = request_context(client_ip, user_agent);
//!     tracing::info!(client_ip = %ctx.client_address, "Processing request");
//!     StatusCode::OK
//! }
//! ```

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRef, FromRequestParts},
    http::{HeaderMap, request::Parts},
};
use sessionguard_auth::RequestContext;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Number of reverse proxies in front of the server that append the peer
/// address to `X-Forwarded-For`.
///
/// With `n` trusted proxies the client is the `n`-th entry from the right;
/// anything further left was written by the client and is ignored. `0`
/// ignores the proxy headers and uses the connection address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustedProxies(pub usize);

impl TrustedProxies {
    /// Directly exposed: proxy headers are ignored.
    pub const NONE: Self = Self(0);
}

impl Default for TrustedProxies {
    fn default() -> Self {
        Self(1)
    }
}

/// Client IP address.
///
/// # Priority
///
/// With at least one trusted proxy:
///
/// 1. `X-Forwarded-For`, the entry appended by the outermost trusted proxy
/// 2. `X-Real-IP`
///
/// Then, or always when no proxy is trusted:
///
/// 3. Connection IP (when served with `ConnectInfo`)
/// 4. `127.0.0.1`
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub IpAddr);

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    TrustedProxies: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let trusted = TrustedProxies::from_ref(state);
        let ip = extract_client_ip(&parts.headers, parts.extensions.get(), trusted);

        Ok(Self(ip))
    }
}

/// Extract client IP from headers or connection info.
fn extract_client_ip(
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
    trusted: TrustedProxies,
) -> IpAddr {
    if trusted.0 > 0 {
        if let Some(ip) = forwarded_client(headers, trusted.0) {
            return ip;
        }

        if let Some(ip) = headers
            .get("X-Real-IP")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<IpAddr>().ok())
        {
            return ip;
        }
    }

    connect_info.map_or(IpAddr::V4(Ipv4Addr::LOCALHOST), |info| info.0.ip())
}

/// The `X-Forwarded-For` entry written by the outermost of `hops` proxies.
///
/// Repeated headers are read as one list. A list shorter than `hops` was
/// written entirely by trusted proxies, so its leftmost entry is used.
fn forwarded_client(headers: &HeaderMap, hops: usize) -> Option<IpAddr> {
    let entries: Vec<&str> = headers
        .get_all("X-Forwarded-For")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    let index = entries.len().saturating_sub(hops);
    entries.get(index).and_then(|entry| entry.parse().ok())
}

/// User-Agent header, if present and valid UTF-8.
#[derive(Debug, Clone)]
pub struct UserAgent(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for UserAgent
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_agent = parts
            .headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(Self(user_agent))
    }
}

/// Build the security-event context for a request.
#[must_use]
pub fn request_context(client_ip: ClientIp, user_agent: UserAgent) -> RequestContext {
    RequestContext::new(client_ip.0.to_string(), user_agent.0)
}
