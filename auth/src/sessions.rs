//! Session repository.
//!
//! # Key layout
//!
//! - `auth:session:{user_id}` → bincode `UserSession`, TTL = refresh-token
//!   maximum lifetime
//! - `auth:session_token:{hash(session_token)}` → user id, TTL = session
//!   cookie lifetime
//!
//! The index lets a `session_token` cookie find its session without the
//! cookie carrying anything that identifies the IdP tokens.
//!
//! Rotation writes back with [`SessionRepository::replace`], which only
//! succeeds if the record still holds the bytes it was loaded from. A writer
//! whose view is stale (its lock expired, or a login replaced the session)
//! cannot overwrite the newer record.

use crate::error::Result;
use crate::providers::KeyValueStore;
use crate::state::{UserId, UserSession};
use crate::utils::{token_fingerprint, token_hash};
use std::sync::Arc;
use std::time::Duration;

/// The stored encoding a session was loaded from.
///
/// Opaque; only [`SessionRepository::replace`] compares it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionVersion(Vec<u8>);

/// Store for [`UserSession`] records, one per user.
pub struct SessionRepository<K> {
    store: Arc<K>,
    record_ttl: Duration,
    index_ttl: Duration,
}

impl<K> Clone for SessionRepository<K> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            record_ttl: self.record_ttl,
            index_ttl: self.index_ttl,
        }
    }
}

impl<K: KeyValueStore> SessionRepository<K> {
    /// Create a repository.
    ///
    /// # Arguments
    ///
    /// * `record_ttl` - Lifetime of session records
    /// * `index_ttl` - Lifetime of the session-token index (cookie lifetime)
    #[must_use]
    pub const fn new(store: Arc<K>, record_ttl: Duration, index_ttl: Duration) -> Self {
        Self {
            store,
            record_ttl,
            index_ttl,
        }
    }

    fn session_key(user_id: &UserId) -> String {
        format!("auth:session:{}", user_id.0)
    }

    fn index_key(session_token: &str) -> String {
        format!("auth:session_token:{}", token_hash(session_token))
    }

    /// Write a newly created session and its session-token index.
    ///
    /// # Errors
    ///
    /// Returns error if encoding or the store fails.
    pub async fn create(&self, session: &UserSession) -> Result<()> {
        self.save(session).await?;
        self.store
            .set_ex(
                &Self::index_key(&session.session_token),
                session.user_id.0.as_bytes(),
                self.index_ttl,
            )
            .await?;

        tracing::info!(
            user_id = %session.user_id,
            session_fingerprint = %token_fingerprint(&session.session_token),
            "Session created"
        );
        Ok(())
    }

    /// Overwrite the session record in a single write.
    ///
    /// # Errors
    ///
    /// Returns error if encoding or the store fails.
    pub async fn save(&self, session: &UserSession) -> Result<()> {
        let bytes = bincode::serialize(session)?;
        self.store
            .set_ex(&Self::session_key(&session.user_id), &bytes, self.record_ttl)
            .await
    }

    /// Load the session for a user.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails or the record cannot be decoded.
    pub async fn load(&self, user_id: &UserId) -> Result<Option<UserSession>> {
        match self.store.get(&Self::session_key(user_id)).await? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Load the session for a user together with its [`SessionVersion`].
    ///
    /// # Errors
    ///
    /// Returns error if the store fails or the record cannot be decoded.
    pub async fn load_versioned(
        &self,
        user_id: &UserId,
    ) -> Result<Option<(UserSession, SessionVersion)>> {
        match self.store.get(&Self::session_key(user_id)).await? {
            Some(bytes) => {
                let session = bincode::deserialize(&bytes)?;
                Ok(Some((session, SessionVersion(bytes))))
            }
            None => Ok(None),
        }
    }

    /// Overwrite the session record only if it is still at `version`.
    ///
    /// Returns `false`, writing nothing, if the record changed or
    /// disappeared since it was loaded.
    ///
    /// # Errors
    ///
    /// Returns error if encoding or the store fails.
    pub async fn replace(&self, session: &UserSession, version: &SessionVersion) -> Result<bool> {
        let bytes = bincode::serialize(session)?;
        self.store
            .compare_and_swap(
                &Self::session_key(&session.user_id),
                &version.0,
                &bytes,
                self.record_ttl,
            )
            .await
    }

    /// Delete a user's session and its session-token index.
    ///
    /// Returns the deleted session, if there was one.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn delete(&self, user_id: &UserId) -> Result<Option<UserSession>> {
        // An undecodable record is still deleted.
        let existing = self.load(user_id).await.unwrap_or_else(|e| {
            tracing::warn!(user_id = %user_id, error = %e, "Deleting unreadable session record");
            None
        });

        if let Some(session) = &existing {
            self.store
                .delete(&Self::index_key(&session.session_token))
                .await?;
        }
        self.store.delete(&Self::session_key(user_id)).await?;

        tracing::info!(user_id = %user_id, "Session deleted");
        Ok(existing)
    }

    /// Remove the index entry of a replaced `session_token`.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn remove_index(&self, session_token: &str) -> Result<()> {
        self.store.delete(&Self::index_key(session_token)).await?;
        Ok(())
    }

    /// Find the session a `session_token` cookie belongs to.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn resolve_session_token(&self, session_token: &str) -> Result<Option<UserSession>> {
        let Some(user_id) = self.store.get(&Self::index_key(session_token)).await? else {
            return Ok(None);
        };
        let user_id = UserId(String::from_utf8_lossy(&user_id).into_owned());

        let Some(session) = self.load(&user_id).await? else {
            return Ok(None);
        };

        // The index may outlive a session replaced by a newer login.
        if constant_time_eq::constant_time_eq(
            session.session_token.as_bytes(),
            session_token.as_bytes(),
        ) {
            Ok(Some(session))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use crate::mocks::MockKeyValueStore;
    use crate::state::TokenPair;
    use chrono::Utc;

    fn repo() -> SessionRepository<MockKeyValueStore> {
        SessionRepository::new(
            Arc::new(MockKeyValueStore::new()),
            Duration::from_secs(3600),
            Duration::from_secs(600),
        )
    }

    fn session(user: &str, session_token: &str) -> UserSession {
        let now = Utc::now();
        UserSession::new(
            UserId::new(user),
            TokenPair {
                access_token: "a0".into(),
                refresh_token: "r0".into(),
                expires_at: now + chrono::Duration::hours(1),
            },
            session_token.into(),
            Some("owner@example.com".into()),
            now,
        )
    }

    #[tokio::test]
    async fn test_create_load_resolve() {
        let repo = repo();
        let s = session("u1", "st-1");
        repo.create(&s).await.unwrap();

        assert_eq!(repo.load(&UserId::new("u1")).await.unwrap(), Some(s.clone()));
        assert_eq!(repo.resolve_session_token("st-1").await.unwrap(), Some(s));
        assert_eq!(repo.resolve_session_token("st-2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stale_index_does_not_resolve() {
        let repo = repo();
        repo.create(&session("u1", "st-old")).await.unwrap();
        repo.create(&session("u1", "st-new")).await.unwrap();

        assert!(repo.resolve_session_token("st-old").await.unwrap().is_none());
        assert!(repo.resolve_session_token("st-new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_replace_refuses_stale_version() {
        let repo = repo();
        let user = UserId::new("u1");
        repo.create(&session("u1", "st-1")).await.unwrap();

        let (mut loaded, version) = repo.load_versioned(&user).await.unwrap().unwrap();

        // A newer login lands between load and write-back.
        repo.create(&session("u1", "st-2")).await.unwrap();

        loaded.refresh_token = "r1".into();
        assert!(!repo.replace(&loaded, &version).await.unwrap());

        let stored = repo.load(&user).await.unwrap().unwrap();
        assert_eq!(stored.session_token, "st-2");
        assert_eq!(stored.refresh_token, "r0");
    }

    #[tokio::test]
    async fn test_replace_writes_unchanged_record() {
        let repo = repo();
        let user = UserId::new("u1");
        repo.create(&session("u1", "st-1")).await.unwrap();

        let (mut loaded, version) = repo.load_versioned(&user).await.unwrap().unwrap();
        loaded.refresh_token = "r1".into();

        assert!(repo.replace(&loaded, &version).await.unwrap());
        assert_eq!(repo.load(&user).await.unwrap().unwrap().refresh_token, "r1");
        assert!(!repo.replace(&loaded, &version).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_removes_index() {
        let repo = repo();
        repo.create(&session("u1", "st-1")).await.unwrap();

        let deleted = repo.delete(&UserId::new("u1")).await.unwrap();
        assert!(deleted.is_some());
        assert!(repo.load(&UserId::new("u1")).await.unwrap().is_none());
        assert!(repo.resolve_session_token("st-1").await.unwrap().is_none());
    }
}
