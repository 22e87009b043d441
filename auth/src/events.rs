//! Security events.
//!
//! Every security-relevant incident the core detects is reported to a
//! [`SecurityEventSink`] as a structured [`SecurityEvent`]. Event details
//! carry only hashed or truncated token material.
//!
//! The production sink, [`TracingSecurityEventSink`], writes events on the
//! `security` tracing target so they can be routed separately from
//! application logs:
//!
//! ```text
//! RUST_LOG=security=info,sessionguard_auth=warn
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Severity of a security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Worth recording, no action needed.
    Low,
    /// Possible abuse.
    Medium,
    /// Likely abuse.
    High,
    /// Attack or compromise.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Kind of security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    /// Login attempts from one client address exceeded the limit.
    RateLimitExceeded,
    /// A callback carried a syntactically invalid `state`.
    MalformedState,
    /// A callback carried an unknown, expired or already-consumed `state`.
    InvalidState,
    /// A refresh token other than the current one was presented.
    TokenTheftDetected,
    /// A blacklisted refresh token was presented.
    TokenReplayRejected,
    /// An operator-class account tried to sign in.
    OperatorAccountRejected,
    /// The immediately-prior refresh token was presented within the grace window.
    RefreshRetryWithinGrace,
    /// A session was revoked by explicit logout.
    SessionRevoked,
}

impl SecurityEventKind {
    /// Wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::MalformedState => "malformed_state",
            Self::InvalidState => "invalid_state",
            Self::TokenTheftDetected => "token_theft_detected",
            Self::TokenReplayRejected => "token_replay_rejected",
            Self::OperatorAccountRejected => "operator_account_rejected",
            Self::RefreshRetryWithinGrace => "refresh_retry_within_grace",
            Self::SessionRevoked => "session_revoked",
        }
    }

    /// Default severity for this kind.
    #[must_use]
    pub const fn default_severity(self) -> Severity {
        match self {
            Self::MalformedState
            | Self::InvalidState
            | Self::TokenTheftDetected
            | Self::TokenReplayRejected => Severity::Critical,
            Self::RateLimitExceeded | Self::OperatorAccountRejected => Severity::Medium,
            Self::RefreshRetryWithinGrace | Self::SessionRevoked => Severity::Low,
        }
    }
}

impl fmt::Display for SecurityEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client information attached to every operation that can emit events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Client IP address.
    pub client_address: String,

    /// `User-Agent` header, if present.
    pub user_agent: Option<String>,
}

impl RequestContext {
    /// Create a new request context.
    #[must_use]
    pub fn new(client_address: impl Into<String>, user_agent: Option<String>) -> Self {
        Self {
            client_address: client_address.into(),
            user_agent,
        }
    }
}

/// A recorded security incident.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// Event kind.
    pub kind: SecurityEventKind,

    /// Severity.
    pub severity: Severity,

    /// When the event was detected.
    pub timestamp: DateTime<Utc>,

    /// Client IP address.
    pub client_address: String,

    /// `User-Agent` header, if present.
    pub user_agent: Option<String>,

    /// Free-form details. Never contains raw secrets.
    pub details: BTreeMap<String, String>,
}

impl SecurityEvent {
    /// Create an event with the kind's default severity.
    #[must_use]
    pub fn new(kind: SecurityEventKind, ctx: &RequestContext) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            timestamp: Utc::now(),
            client_address: ctx.client_address.clone(),
            user_agent: ctx.user_agent.clone(),
            details: BTreeMap::new(),
        }
    }

    /// Override severity.
    #[must_use]
    pub const fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Add a detail.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Destination for security events.
///
/// Recording is infallible from the caller's point of view: a failing sink
/// logs its own error and never changes the outcome of the operation that
/// reported the event.
pub trait SecurityEventSink: Send + Sync {
    /// Record an event.
    fn record(&self, event: SecurityEvent) -> impl std::future::Future<Output = ()> + Send;
}

/// Sink that writes events to `tracing` on the `security` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSecurityEventSink;

impl TracingSecurityEventSink {
    /// Create a new tracing sink.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl SecurityEventSink for TracingSecurityEventSink {
    async fn record(&self, event: SecurityEvent) {
        metrics::counter!(
            "auth_security_events_total",
            "kind" => event.kind.as_str(),
            "severity" => event.severity.to_string()
        )
        .increment(1);

        let details = serde_json::to_string(&event.details).unwrap_or_default();

        match event.severity {
            Severity::Critical | Severity::High => tracing::error!(
                target: "security",
                kind = %event.kind,
                severity = %event.severity,
                client_ip = %event.client_address,
                user_agent = event.user_agent.as_deref().unwrap_or("-"),
                details = %details,
                "Security event"
            ),
            Severity::Medium => tracing::warn!(
                target: "security",
                kind = %event.kind,
                severity = %event.severity,
                client_ip = %event.client_address,
                user_agent = event.user_agent.as_deref().unwrap_or("-"),
                details = %details,
                "Security event"
            ),
            Severity::Low => tracing::info!(
                target: "security",
                kind = %event.kind,
                severity = %event.severity,
                client_ip = %event.client_address,
                user_agent = event.user_agent.as_deref().unwrap_or("-"),
                details = %details,
                "Security event"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_csrf_and_theft_are_critical() {
        for kind in [
            SecurityEventKind::MalformedState,
            SecurityEventKind::InvalidState,
            SecurityEventKind::TokenTheftDetected,
        ] {
            assert_eq!(kind.default_severity(), Severity::Critical);
        }
        assert_eq!(
            SecurityEventKind::RateLimitExceeded.default_severity(),
            Severity::Medium
        );
    }

    #[test]
    fn test_event_builder() {
        let ctx = RequestContext::new("203.0.113.7", Some("curl/8".into()));
        let event = SecurityEvent::new(SecurityEventKind::InvalidState, &ctx)
            .with_detail("state_prefix", "abcdef01…");

        assert_eq!(event.severity, Severity::Critical);
        assert_eq!(event.client_address, "203.0.113.7");
        assert_eq!(event.details.get("state_prefix").map(String::as_str), Some("abcdef01…"));
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&SecurityEventKind::TokenTheftDetected).unwrap_or_default();
        assert_eq!(json, "\"token_theft_detected\"");
    }

    #[tokio::test]
    async fn test_tracing_sink_accepts_every_severity() {
        let sink = TracingSecurityEventSink::new();
        let ctx = RequestContext::default();
        for severity in [Severity::Low, Severity::Medium, Severity::High, Severity::Critical] {
            sink.record(SecurityEvent::new(SecurityEventKind::SessionRevoked, &ctx).with_severity(severity))
                .await;
        }
    }
}
