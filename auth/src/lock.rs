//! Per-user distributed rotation lock.
//!
//! Rotation is a read-compare-write sequence around an IdP call. Two
//! concurrent rotations with the same valid token would both pass the
//! comparison and the second write would silently discard the first
//! caller's new token, so rotation for a given user is serialized behind
//! `auth:rotation_lock:{user_id}`. Logout and the session write of a new
//! login take the same lock.
//!
//! The TTL must outlast the slowest IdP refresh (see
//! `SecurityConfig::validate`). Rotation additionally fences its final write
//! on the record it loaded, so a holder whose lock lapsed anyway cannot
//! overwrite a newer session.
//!
//! The lock value is a random owner token; release deletes the key only if
//! it still holds that token, so a holder whose lock already expired cannot
//! release someone else's.

use crate::error::Result;
use crate::providers::KeyValueStore;
use crate::state::UserId;
use crate::utils::random_urlsafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Acquires per-user rotation locks.
pub struct RotationLock<K> {
    store: Arc<K>,
    ttl: Duration,
    wait: Duration,
    retry_interval: Duration,
}

impl<K> Clone for RotationLock<K> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            ttl: self.ttl,
            wait: self.wait,
            retry_interval: self.retry_interval,
        }
    }
}

/// A held lock. Must be passed back to [`RotationLock::release`].
#[derive(Debug)]
#[must_use = "a held lock must be released"]
pub struct LockGuard {
    key: String,
    owner: String,
}

impl<K: KeyValueStore> RotationLock<K> {
    /// Create a lock manager.
    ///
    /// # Arguments
    ///
    /// * `ttl` - Lock expiry, so a crashed holder cannot block a user forever
    /// * `wait` - How long `acquire` keeps trying
    /// * `retry_interval` - Delay between attempts
    #[must_use]
    pub const fn new(store: Arc<K>, ttl: Duration, wait: Duration, retry_interval: Duration) -> Self {
        Self {
            store,
            ttl,
            wait,
            retry_interval,
        }
    }

    fn key(user_id: &UserId) -> String {
        format!("auth:rotation_lock:{}", user_id.0)
    }

    /// Try to take the lock once.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn try_acquire(&self, user_id: &UserId) -> Result<Option<LockGuard>> {
        let key = Self::key(user_id);
        let owner = random_urlsafe(16);

        if self.store.set_nx_ex(&key, owner.as_bytes(), self.ttl).await? {
            Ok(Some(LockGuard { key, owner }))
        } else {
            Ok(None)
        }
    }

    /// Take the lock, waiting up to the configured budget.
    ///
    /// Returns `None` if the lock is still held when the budget runs out.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn acquire(&self, user_id: &UserId) -> Result<Option<LockGuard>> {
        let deadline = Instant::now() + self.wait;

        loop {
            if let Some(guard) = self.try_acquire(user_id).await? {
                return Ok(Some(guard));
            }

            if Instant::now() + self.retry_interval > deadline {
                tracing::warn!(user_id = %user_id, "Rotation lock wait budget exhausted");
                return Ok(None);
            }

            tracing::trace!(user_id = %user_id, "Rotation lock busy, retrying");
            tokio::time::sleep(self.retry_interval).await;
        }
    }

    /// Release a held lock.
    ///
    /// Returns `false` if the lock had already expired or been taken over.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn release(&self, guard: LockGuard) -> Result<bool> {
        let released = self
            .store
            .compare_and_delete(&guard.key, guard.owner.as_bytes())
            .await?;
        if !released {
            tracing::warn!(key = %guard.key, "Rotation lock expired before release");
        }
        Ok(released)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use crate::mocks::MockKeyValueStore;

    fn lock(ttl_ms: u64, wait_ms: u64) -> RotationLock<MockKeyValueStore> {
        RotationLock::new(
            Arc::new(MockKeyValueStore::new()),
            Duration::from_millis(ttl_ms),
            Duration::from_millis(wait_ms),
            Duration::from_millis(5),
        )
    }

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let lock = lock(10_000, 30);
        let user = UserId::new("u1");

        let guard = lock.acquire(&user).await.unwrap().unwrap();
        assert!(lock.acquire(&user).await.unwrap().is_none());

        assert!(lock.release(guard).await.unwrap());
        assert!(lock.try_acquire(&user).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_locks_are_per_user() {
        let lock = lock(10_000, 30);
        let _a = lock.acquire(&UserId::new("a")).await.unwrap().unwrap();
        assert!(lock.acquire(&UserId::new("b")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_holder_cannot_release_new_owner() {
        let lock = lock(20, 200);
        let user = UserId::new("u1");

        let stale = lock.acquire(&user).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        let fresh = lock.acquire(&user).await.unwrap().unwrap();

        assert!(!lock.release(stale).await.unwrap());
        assert!(lock.try_acquire(&user).await.unwrap().is_none());
        assert!(lock.release(fresh).await.unwrap());
    }
}
