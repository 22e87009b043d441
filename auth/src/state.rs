//! Session records and identifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// User identifier as issued by the IdP.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    /// Create a new user id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One refresh-token rotation, recorded by hash only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationRecord {
    /// Hash of the refresh token that was consumed.
    pub previous_token_hash: String,

    /// Hash of the refresh token that replaced it.
    pub new_token_hash: String,

    /// When the rotation happened.
    pub rotated_at: DateTime<Utc>,
}

/// Server-side session for one user.
///
/// One record per user id. IdP tokens live only here; the browser holds the
/// unrelated `session_token`.
///
/// # Invariant
///
/// The current `refresh_token` is never present in the token blacklist.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSession {
    /// Owner.
    pub user_id: UserId,

    /// Current IdP access token.
    pub access_token: String,

    /// Current IdP refresh token.
    pub refresh_token: String,

    /// Access token expiry.
    pub expires_at: DateTime<Utc>,

    /// Random cookie value, unrelated to any IdP token.
    pub session_token: String,

    /// Account email, if the IdP shared it.
    pub email: Option<String>,

    /// Most recent rotations, oldest first.
    pub rotation_history: VecDeque<RotationRecord>,

    /// When the session was created by a callback exchange.
    pub issued_at: DateTime<Utc>,

    /// Last successful IdP exchange (callback or rotation).
    pub last_sync_at: DateTime<Utc>,
}

impl UserSession {
    /// Create a fresh session with empty rotation history.
    #[must_use]
    pub fn new(
        user_id: UserId,
        tokens: TokenPair,
        session_token: String,
        email: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at: tokens.expires_at,
            session_token,
            email,
            rotation_history: VecDeque::new(),
            issued_at: now,
            last_sync_at: now,
        }
    }

    /// Replace the tokens after a rotation and append an audit record,
    /// keeping at most `limit` records.
    pub fn record_rotation(&mut self, tokens: TokenPair, now: DateTime<Utc>, limit: usize) {
        let record = RotationRecord {
            previous_token_hash: crate::utils::token_hash(&self.refresh_token),
            new_token_hash: crate::utils::token_hash(&tokens.refresh_token),
            rotated_at: now,
        };

        self.rotation_history.push_back(record);
        while self.rotation_history.len() > limit {
            self.rotation_history.pop_front();
        }

        self.access_token = tokens.access_token;
        self.refresh_token = tokens.refresh_token;
        self.expires_at = tokens.expires_at;
        self.last_sync_at = now;
    }

    /// Hashes of every refresh token this session has held, current last.
    ///
    /// Used to blacklist the whole lineage on theft or logout.
    #[must_use]
    pub fn token_lineage(&self) -> Vec<String> {
        let mut hashes: Vec<String> = self
            .rotation_history
            .iter()
            .flat_map(|r| [r.previous_token_hash.clone(), r.new_token_hash.clone()])
            .collect();
        hashes.push(crate::utils::token_hash(&self.refresh_token));
        hashes.sort_unstable();
        hashes.dedup();
        hashes
    }

    /// The current token pair.
    #[must_use]
    pub fn token_pair(&self) -> TokenPair {
        TokenPair {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            expires_at: self.expires_at,
        }
    }

    /// Whether the access token expires within `skew` of `now`.
    #[must_use]
    pub fn expires_within(&self, now: DateTime<Utc>, skew: std::time::Duration) -> bool {
        let skew = chrono::Duration::from_std(skew).unwrap_or(chrono::Duration::zero());
        now.checked_add_signed(skew)
            .is_none_or(|limit| self.expires_at <= limit)
    }
}

impl std::fmt::Debug for UserSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserSession")
            .field("user_id", &self.user_id)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("session_token", &"<redacted>")
            .field("email", &self.email)
            .field("rotation_history", &self.rotation_history.len())
            .field("issued_at", &self.issued_at)
            .field("last_sync_at", &self.last_sync_at)
            .finish()
    }
}

/// Access/refresh token pair with access-token expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    /// IdP access token.
    pub access_token: String,

    /// IdP refresh token.
    pub refresh_token: String,

    /// Access token expiry.
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::token_hash;

    fn pair(refresh: &str, now: DateTime<Utc>) -> TokenPair {
        TokenPair {
            access_token: format!("access-{refresh}"),
            refresh_token: refresh.to_string(),
            expires_at: now + chrono::Duration::hours(1),
        }
    }

    #[test]
    fn test_rotation_history_is_bounded() {
        let now = Utc::now();
        let mut session = UserSession::new(
            UserId::new("u1"),
            pair("r0", now),
            "st".into(),
            None,
            now,
        );

        for i in 1..=15 {
            session.record_rotation(pair(&format!("r{i}"), now), now, 10);
        }

        assert_eq!(session.rotation_history.len(), 10);
        assert_eq!(session.refresh_token, "r15");
        let newest = session.rotation_history.back().map(|r| r.new_token_hash.clone());
        assert_eq!(newest, Some(token_hash("r15")));
        let oldest = session.rotation_history.front().map(|r| r.previous_token_hash.clone());
        assert_eq!(oldest, Some(token_hash("r5")));
    }

    #[test]
    fn test_token_lineage_contains_current_and_history() {
        let now = Utc::now();
        let mut session = UserSession::new(
            UserId::new("u1"),
            pair("r0", now),
            "st".into(),
            None,
            now,
        );
        session.record_rotation(pair("r1", now), now, 10);
        session.record_rotation(pair("r2", now), now, 10);

        let lineage = session.token_lineage();
        assert_eq!(lineage.len(), 3);
        for token in ["r0", "r1", "r2"] {
            assert!(lineage.contains(&token_hash(token)));
        }
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let now = Utc::now();
        let session = UserSession::new(
            UserId::new("u1"),
            pair("refresh-secret", now),
            "cookie-secret".into(),
            None,
            now,
        );
        let debug = format!("{session:?}");
        assert!(!debug.contains("refresh-secret"));
        assert!(!debug.contains("cookie-secret"));
    }
}
