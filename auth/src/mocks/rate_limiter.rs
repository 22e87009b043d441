//! Mock rate limiter for testing.

use crate::error::{AuthError, Result};
use crate::providers::RateLimiter;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// In-memory sliding-window rate limiter.
///
/// Old entries are only pruned when their key is checked again. Production
/// code uses `RedisRateLimiter`, whose keys expire on their own.
#[derive(Debug, Default)]
pub struct MockRateLimiter {
    /// Map of key -> attempt instants
    attempts: Mutex<HashMap<String, Vec<Instant>>>,
}

impl MockRateLimiter {
    /// Create a new mock rate limiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimiter for MockRateLimiter {
    fn check_and_record(
        &self,
        key: &str,
        max_attempts: u32,
        window: Duration,
    ) -> impl Future<Output = Result<()>> + Send {
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();

        let timestamps = attempts.entry(key.to_string()).or_default();
        timestamps.retain(|at| now.duration_since(*at) < window);

        let result = if timestamps.len() >= max_attempts as usize {
            tracing::warn!(
                rate_limit_exceeded = true,
                key = %key,
                attempts = timestamps.len() + 1,
                max_attempts = max_attempts,
                "Mock rate limit exceeded"
            );
            Err(AuthError::TooManyAttempts {
                retry_after: window,
            })
        } else {
            timestamps.push(now);
            Ok(())
        };
        drop(attempts);

        async move { result }
    }

    fn reset(&self, key: &str) -> impl Future<Output = Result<()>> + Send {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        async move { Ok(()) }
    }

    fn get_attempts(&self, key: &str) -> impl Future<Output = Result<u32>> + Send {
        let count = self
            .attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map_or(0, Vec::len);
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        async move { Ok(count) }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_rate_limit_blocks_over_limit() {
        let limiter = MockRateLimiter::new();

        for _ in 0..5 {
            limiter
                .check_and_record("login:192.0.2.1", 5, Duration::from_secs(60))
                .await
                .unwrap();
        }

        let result = limiter
            .check_and_record("login:192.0.2.1", 5, Duration::from_secs(60))
            .await;
        assert!(
            matches!(result, Err(AuthError::TooManyAttempts { .. })),
            "6th attempt should be rate limited"
        );

        // Other clients are unaffected
        assert!(
            limiter
                .check_and_record("login:192.0.2.2", 5, Duration::from_secs(60))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_mock_rate_limit_reset() {
        let limiter = MockRateLimiter::new();
        for _ in 0..3 {
            limiter
                .check_and_record("k", 3, Duration::from_secs(60))
                .await
                .unwrap();
        }
        assert_eq!(limiter.get_attempts("k").await.unwrap(), 3);

        limiter.reset("k").await.unwrap();

        assert_eq!(limiter.get_attempts("k").await.unwrap(), 0);
        assert!(limiter.check_and_record("k", 3, Duration::from_secs(60)).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_rate_limit_sliding_window() {
        let limiter = MockRateLimiter::new();
        for _ in 0..3 {
            limiter
                .check_and_record("k", 3, Duration::from_millis(100))
                .await
                .unwrap();
        }
        assert!(limiter.check_and_record("k", 3, Duration::from_millis(100)).await.is_err());

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(
            limiter.check_and_record("k", 3, Duration::from_millis(100)).await.is_ok(),
            "Should be allowed after window expires"
        );
    }
}
