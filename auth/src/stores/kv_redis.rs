//! Redis-based key/value store implementation.
//!
//! # Atomic primitives
//!
//! - `set_nx_ex` → `SET key value NX PX ttl`
//! - `get_del` → `GETDEL key` (Redis ≥ 6.2)
//! - `compare_and_delete` / `compare_and_swap` → Lua scripts, so the read
//!   and the write run as one server-side step
//!
//! # Example
//!
//! ```no_run
//! use sessionguard_auth::stores::RedisKeyValueStore;
//! use sessionguard_auth::providers::KeyValueStore;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisKeyValueStore::new("redis://127.0.0.1:6379").await?;
//! store.set_ex("auth:pkce:abc", b"verifier", Duration::from_secs(600)).await?;
//! let value = store.get_del("auth:pkce:abc").await?;
//! assert_eq!(value.as_deref(), Some(&b"verifier"[..]));
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use crate::providers::KeyValueStore;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, ExistenceCheck, SetExpiry, SetOptions};
use std::time::Duration;

const COMPARE_AND_DELETE: &str = r"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    end
    return 0
";

const COMPARE_AND_SWAP: &str = r"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
        return 1
    end
    return 0
";

/// `Redis`-backed [`KeyValueStore`].
///
/// This type is `Clone`; clones share one `ConnectionManager`.
#[derive(Clone)]
pub struct RedisKeyValueStore {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,
}

impl RedisKeyValueStore {
    /// Create a new `Redis` key/value store.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - `Redis` connection URL (e.g., "<redis://127.0.0.1:6379>")
    ///
    /// # Errors
    ///
    /// Returns error if the URL is malformed or the connection fails.
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            AuthError::InternalError(format!("Failed to create Redis client: {e}"))
        })?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            AuthError::InternalError(format!("Failed to create Redis connection manager: {e}"))
        })?;

        tracing::info!("RedisKeyValueStore initialized successfully");

        Ok(Self { conn_manager })
    }

    /// Clone of the underlying connection manager.
    ///
    /// Lets other Redis-backed components share this connection pool.
    #[must_use]
    pub fn connection(&self) -> ConnectionManager {
        self.conn_manager.clone()
    }
}

/// TTL in milliseconds, never zero (Redis rejects `PX 0`).
#[allow(clippy::cast_possible_truncation)] // Safe: TTLs are days at most
fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

impl KeyValueStore for RedisKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn_manager.clone();
        let value: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| AuthError::StoreError(format!("GET failed: {e}")))?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let () = conn
            .pset_ex(key, value, ttl_millis(ttl))
            .await
            .map_err(|e| AuthError::StoreError(format!("PSETEX failed: {e}")))?;
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let options = SetOptions::default()
            .conditional_set(ExistenceCheck::NX)
            .with_expiration(SetExpiry::PX(ttl_millis(ttl)));

        // `OK` when written, nil when the key already existed.
        let written: Option<String> = conn
            .set_options(key, value, options)
            .await
            .map_err(|e| AuthError::StoreError(format!("SET NX failed: {e}")))?;
        Ok(written.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let removed: usize = conn
            .del(key)
            .await
            .map_err(|e| AuthError::StoreError(format!("DEL failed: {e}")))?;
        Ok(removed > 0)
    }

    async fn get_del(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn_manager.clone();
        let value: Option<Vec<u8>> = conn
            .get_del(key)
            .await
            .map_err(|e| AuthError::StoreError(format!("GETDEL failed: {e}")))?;
        Ok(value)
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let removed: usize = redis::Script::new(COMPARE_AND_DELETE)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| AuthError::StoreError(format!("compare-and-delete failed: {e}")))?;
        Ok(removed > 0)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let written: usize = redis::Script::new(COMPARE_AND_SWAP)
            .key(key)
            .arg(expected)
            .arg(value)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| AuthError::StoreError(format!("compare-and-swap failed: {e}")))?;
        Ok(written > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let exists: bool = conn
            .exists(key)
            .await
            .map_err(|e| AuthError::StoreError(format!("EXISTS failed: {e}")))?;
        Ok(exists)
    }
}
