//! Revoked refresh-token blacklist.
//!
//! Entries are keyed by token hash (`auth:blacklist:{hash}`) and expire after
//! the IdP's maximum refresh-token lifetime: past that point the IdP itself
//! would reject the token, so the entry has nothing left to guard.

use crate::error::Result;
use crate::providers::KeyValueStore;
use crate::utils::token_hash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Why a token was blacklisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    /// Consumed by a successful rotation.
    Rotated,
    /// Part of a lineage invalidated after theft detection.
    TheftDetected,
    /// Replaced by a new login for the same user.
    Superseded,
    /// Explicit logout.
    Logout,
}

/// Stored blacklist entry. Contains no raw token material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBlacklistEntry {
    /// Hash of the revoked token.
    pub token_hash: String,

    /// When it was revoked.
    pub revoked_at: DateTime<Utc>,

    /// Why it was revoked.
    pub reason: RevocationReason,
}

/// TTL-bounded set of revoked refresh-token hashes.
pub struct TokenBlacklist<K> {
    store: Arc<K>,
    ttl: Duration,
}

impl<K> Clone for TokenBlacklist<K> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            ttl: self.ttl,
        }
    }
}

impl<K: KeyValueStore> TokenBlacklist<K> {
    /// Create a blacklist whose entries live for `ttl`.
    #[must_use]
    pub const fn new(store: Arc<K>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn key(hash: &str) -> String {
        format!("auth:blacklist:{hash}")
    }

    /// Blacklist a raw token.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn revoke(&self, token: &str, reason: RevocationReason) -> Result<()> {
        self.revoke_hash(&token_hash(token), reason).await
    }

    /// Blacklist a token by hash.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn revoke_hash(&self, hash: &str, reason: RevocationReason) -> Result<()> {
        let entry = TokenBlacklistEntry {
            token_hash: hash.to_string(),
            revoked_at: Utc::now(),
            reason,
        };
        let bytes = serde_json::to_vec(&entry)?;
        self.store.set_ex(&Self::key(hash), &bytes, self.ttl).await?;

        metrics::counter!("auth_blacklist_writes_total").increment(1);
        tracing::debug!(token_hash = %hash, ?reason, "Blacklisted refresh token");
        Ok(())
    }

    /// Blacklist every hash in `hashes`.
    ///
    /// Attempts all of them; the first error, if any, is returned afterwards.
    ///
    /// # Errors
    ///
    /// Returns the first store error encountered.
    pub async fn revoke_all(&self, hashes: &[String], reason: RevocationReason) -> Result<()> {
        let mut first_error = None;
        for hash in hashes {
            if let Err(e) = self.revoke_hash(hash, reason).await {
                tracing::error!(token_hash = %hash, error = %e, "Failed to blacklist token");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Whether a raw token is blacklisted.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn is_revoked(&self, token: &str) -> Result<bool> {
        self.store.exists(&Self::key(&token_hash(token))).await
    }

    /// Look up the entry for a raw token.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails or the entry cannot be decoded.
    pub async fn entry(&self, token: &str) -> Result<Option<TokenBlacklistEntry>> {
        match self.store.get(&Self::key(&token_hash(token))).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use crate::mocks::MockKeyValueStore;

    fn blacklist() -> (TokenBlacklist<MockKeyValueStore>, Arc<MockKeyValueStore>) {
        let store = Arc::new(MockKeyValueStore::new());
        (
            TokenBlacklist::new(Arc::clone(&store), Duration::from_secs(3600)),
            store,
        )
    }

    #[tokio::test]
    async fn test_revoke_and_lookup() {
        let (blacklist, _) = blacklist();
        assert!(!blacklist.is_revoked("r0").await.unwrap());

        blacklist.revoke("r0", RevocationReason::Rotated).await.unwrap();

        assert!(blacklist.is_revoked("r0").await.unwrap());
        assert!(!blacklist.is_revoked("r1").await.unwrap());
        let entry = blacklist.entry("r0").await.unwrap().unwrap();
        assert_eq!(entry.reason, RevocationReason::Rotated);
        assert_eq!(entry.token_hash, token_hash("r0"));
    }

    #[tokio::test]
    async fn test_raw_token_never_stored() {
        let (blacklist, store) = blacklist();
        blacklist
            .revoke("raw-refresh-secret", RevocationReason::Logout)
            .await
            .unwrap();

        for (key, value) in store.snapshot() {
            assert!(!key.contains("raw-refresh-secret"));
            assert!(!String::from_utf8_lossy(&value).contains("raw-refresh-secret"));
        }
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let store = Arc::new(MockKeyValueStore::new());
        let blacklist = TokenBlacklist::new(Arc::clone(&store), Duration::from_millis(20));
        blacklist.revoke("r0", RevocationReason::Rotated).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!blacklist.is_revoked("r0").await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_all() {
        let (blacklist, _) = blacklist();
        let hashes = vec![token_hash("a"), token_hash("b")];
        blacklist
            .revoke_all(&hashes, RevocationReason::TheftDetected)
            .await
            .unwrap();
        assert!(blacklist.is_revoked("a").await.unwrap());
        assert!(blacklist.is_revoked("b").await.unwrap());
    }
}
