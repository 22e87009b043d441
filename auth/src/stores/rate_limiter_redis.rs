//! Redis-based rate limiter implementation.
//!
//! Sliding window over a sorted set of attempt timestamps:
//! 1. Drop entries older than the window (`ZREMRANGEBYSCORE`)
//! 2. Count what is left (`ZCARD`)
//! 3. Record this attempt (`ZADD`)
//! 4. Refresh the key TTL (`PEXPIRE`)
//!
//! All four run in one `MULTI`/`EXEC` pipeline.

use crate::error::{AuthError, Result};
use crate::providers::RateLimiter;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// `Redis`-based rate limiter using a sliding window.
///
/// # Example
///
/// ```no_run
/// use sessionguard_auth::stores::{RedisKeyValueStore, RedisRateLimiter};
/// use sessionguard_auth::providers::RateLimiter;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = RedisKeyValueStore::new("redis://127.0.0.1:6379").await?;
/// let limiter = RedisRateLimiter::from_connection(store.connection());
///
/// limiter.check_and_record("login:203.0.113.7", 10, Duration::from_secs(60)).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisRateLimiter {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,
}

impl RedisRateLimiter {
    /// Create a rate limiter on an existing connection manager.
    #[must_use]
    pub const fn from_connection(conn_manager: ConnectionManager) -> Self {
        Self { conn_manager }
    }

    fn rate_limit_key(key: &str) -> String {
        format!("auth:rate_limit:{key}")
    }

    #[allow(clippy::cast_possible_truncation)] // Safe: timestamps fit in u64 until year 2554
    fn current_timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64
    }
}

impl RateLimiter for RedisRateLimiter {
    async fn check_and_record(&self, key: &str, max_attempts: u32, window: Duration) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let rate_key = Self::rate_limit_key(key);
        let now_ms = Self::current_timestamp_ms();
        #[allow(clippy::cast_possible_truncation)] // Safe: rate limit windows are small durations
        let window_ms = window.as_millis() as u64;
        let window_start = now_ms.saturating_sub(window_ms);
        // Unique member so two attempts in the same millisecond both count.
        let member = format!("{now_ms}-{}", crate::utils::random_urlsafe(6));

        // Count is taken BEFORE this attempt is added.
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .zrembyscore(&rate_key, 0, window_start)
            .ignore()
            .zcard(&rate_key)
            .zadd(&rate_key, &member, now_ms)
            .ignore()
            .pexpire(&rate_key, i64::try_from(window_ms).unwrap_or(i64::MAX))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    key = %key,
                    "Redis pipeline failed during rate limit check (safe default: deny)"
                );
                AuthError::StoreError(format!("Failed to check and record rate limit: {e}"))
            })?;

        if count >= u64::from(max_attempts) {
            tracing::warn!(
                rate_limit_exceeded = true,
                key = %key,
                attempts = count + 1,
                max_attempts = max_attempts,
                window_ms = window_ms,
                "Rate limit exceeded"
            );

            return Err(AuthError::TooManyAttempts {
                retry_after: Duration::from_millis(window_ms),
            });
        }

        tracing::debug!(
            key = %key,
            attempts = count + 1,
            max_attempts = max_attempts,
            "Rate limit check passed"
        );

        Ok(())
    }

    async fn reset(&self, key: &str) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let rate_key = Self::rate_limit_key(key);

        let () = conn
            .del(&rate_key)
            .await
            .map_err(|e| AuthError::StoreError(format!("Failed to reset rate limit: {e}")))?;

        tracing::debug!(key = %key, "Reset rate limit");

        Ok(())
    }

    async fn get_attempts(&self, key: &str) -> Result<u32> {
        let mut conn = self.conn_manager.clone();
        let rate_key = Self::rate_limit_key(key);

        let count: u64 = conn
            .zcard(&rate_key)
            .await
            .map_err(|e| AuthError::StoreError(format!("Failed to get rate limit attempts: {e}")))?;

        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;

    // Note: These tests require a running Redis instance
    // Run with: docker run -d -p 6379:6379 redis:7-alpine

    async fn limiter() -> RedisRateLimiter {
        let store = crate::stores::RedisKeyValueStore::new("redis://127.0.0.1:6379")
            .await
            .unwrap();
        RedisRateLimiter::from_connection(store.connection())
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_blocks_over_limit_and_resets() {
        let limiter = limiter().await;
        let key = "login:test-blocks";
        limiter.reset(key).await.unwrap();

        for _ in 0..3 {
            limiter
                .check_and_record(key, 3, Duration::from_secs(60))
                .await
                .unwrap();
        }

        let result = limiter.check_and_record(key, 3, Duration::from_secs(60)).await;
        assert!(matches!(result, Err(AuthError::TooManyAttempts { .. })));

        limiter.reset(key).await.unwrap();
        assert_eq!(limiter.get_attempts(key).await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_same_millisecond_attempts_all_count() {
        let limiter = limiter().await;
        let key = "login:test-burst";
        limiter.reset(key).await.unwrap();

        let mut handles = vec![];
        for _ in 0..5 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.check_and_record(key, 100, Duration::from_secs(60)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(limiter.get_attempts(key).await.unwrap(), 5);
        limiter.reset(key).await.unwrap();
    }
}
