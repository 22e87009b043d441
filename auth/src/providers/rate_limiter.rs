//! Rate limiter trait for login attempts.
//!
//! The callback exchange gates every inbound redirect on a per-client-address
//! key before touching any other collaborator. Implementations use a sliding
//! window so a burst at a window boundary cannot double the allowance.

use crate::error::Result;
use std::time::Duration;

/// Sliding-window rate limiter.
///
/// # Example
///
/// ```no_run
/// use sessionguard_auth::providers::RateLimiter;
/// use std::time::Duration;
///
/// # async fn example(limiter: impl RateLimiter) -> Result<(), Box<dyn std::error::Error>> {
/// limiter
///     .check_and_record("login:203.0.113.7", 10, Duration::from_secs(60))
///     .await?;
/// # Ok(())
/// # }
/// ```
pub trait RateLimiter: Send + Sync {
    /// Check the limit and record this attempt in one atomic operation.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Request allowed and recorded
    /// * `Err(AuthError::TooManyAttempts)` - Rate limit exceeded
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Rate limit exceeded → `AuthError::TooManyAttempts`
    /// - Store failure → `AuthError::StoreError`
    fn check_and_record(
        &self,
        key: &str,
        max_attempts: u32,
        window: Duration,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Reset the counter for a key (used after a successful login).
    ///
    /// # Errors
    ///
    /// Returns error if the store operation fails.
    fn reset(&self, key: &str) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Number of attempts currently recorded for a key.
    ///
    /// # Errors
    ///
    /// Returns error if the store operation fails.
    fn get_attempts(&self, key: &str) -> impl std::future::Future<Output = Result<u32>> + Send;
}
