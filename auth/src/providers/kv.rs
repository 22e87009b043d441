//! Key/value store trait.
//!
//! Every piece of mutable shared state in the session-security core lives
//! behind this trait: PKCE verifiers, session records, the session-token
//! index, blacklist entries and rotation locks. Services never hold a
//! concrete client, so tests swap in `mocks::MockKeyValueStore`.
//!
//! # Atomicity
//!
//! `set_nx_ex`, `get_del`, `compare_and_delete` and `compare_and_swap` must
//! each be a single atomic operation in the backing store. The single-use
//! guarantee of a PKCE `state`, the ownership check of a rotation lock and
//! the fenced session write after a rotation depend on it.

use crate::error::Result;
use std::time::Duration;

/// Byte-oriented key/value store with per-key TTL.
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::StoreError` if the store is unreachable.
    fn get(&self, key: &str) -> impl std::future::Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Write a value with a TTL, overwriting any existing value.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::StoreError` if the store is unreachable.
    fn set_ex(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Write a value with a TTL only if the key does not exist.
    ///
    /// Returns `true` if the value was written.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::StoreError` if the store is unreachable.
    fn set_nx_ex(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// Delete a key. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::StoreError` if the store is unreachable.
    fn delete(&self, key: &str) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// Atomically read and delete a key.
    ///
    /// Exactly one of any number of concurrent callers observes the value.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::StoreError` if the store is unreachable.
    fn get_del(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Atomically delete a key only if it currently holds `expected`.
    ///
    /// Returns `true` if the key was deleted.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::StoreError` if the store is unreachable.
    fn compare_and_delete(
        &self,
        key: &str,
        expected: &[u8],
    ) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// Atomically overwrite a key only if it currently holds `expected`.
    ///
    /// Returns `true` if `value` was written. The TTL is reset to `ttl`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::StoreError` if the store is unreachable.
    fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        value: &[u8],
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// Whether a key exists.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::StoreError` if the store is unreachable.
    fn exists(&self, key: &str) -> impl std::future::Future<Output = Result<bool>> + Send;
}
