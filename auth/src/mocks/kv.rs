//! Mock key/value store for testing.

use crate::error::Result;
use crate::providers::KeyValueStore;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// In-memory key/value store.
///
/// Every operation runs under one mutex, so the conditional operations are
/// atomic exactly like their Redis counterparts.
/// Expired entries are dropped lazily on access.
///
/// `operation_count()` counts trait calls, which lets tests assert that a
/// request was rejected without touching the store.
#[derive(Debug, Default)]
pub struct MockKeyValueStore {
    entries: Mutex<HashMap<String, Entry>>,
    operations: AtomicUsize,
}

impl MockKeyValueStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        let mut entries = self.entries();
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
        entries
    }

    /// Number of trait operations performed so far.
    #[must_use]
    pub fn operation_count(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    /// Live entries, for assertions.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, Vec<u8>)> {
        let now = Instant::now();
        self.entries()
            .iter()
            .filter(|(_, entry)| entry.expires_at > now)
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }

    /// Live keys starting with `prefix`.
    #[must_use]
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .snapshot()
            .into_iter()
            .map(|(key, _)| key)
            .filter(|key| key.starts_with(prefix))
            .collect();
        keys.sort();
        keys
    }

    /// Remaining TTL of a key.
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries()
            .get(key)
            .and_then(|entry| entry.expires_at.checked_duration_since(now))
    }
}

impl KeyValueStore for MockKeyValueStore {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send {
        let value = self.begin().get(key).map(|entry| entry.value.clone());
        async move { Ok(value) }
    }

    fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> impl Future<Output = Result<()>> + Send {
        self.begin().insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        async move { Ok(()) }
    }

    fn set_nx_ex(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> impl Future<Output = Result<bool>> + Send {
        let mut entries = self.begin();
        let written = if entries.contains_key(key) {
            false
        } else {
            entries.insert(
                key.to_string(),
                Entry {
                    value: value.to_vec(),
                    expires_at: Instant::now() + ttl,
                },
            );
            true
        };
        drop(entries);
        async move { Ok(written) }
    }

    fn delete(&self, key: &str) -> impl Future<Output = Result<bool>> + Send {
        let removed = self.begin().remove(key).is_some();
        async move { Ok(removed) }
    }

    fn get_del(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send {
        let value = self.begin().remove(key).map(|entry| entry.value);
        async move { Ok(value) }
    }

    fn compare_and_delete(
        &self,
        key: &str,
        expected: &[u8],
    ) -> impl Future<Output = Result<bool>> + Send {
        let mut entries = self.begin();
        let matches = entries
            .get(key)
            .is_some_and(|entry| entry.value.as_slice() == expected);
        if matches {
            entries.remove(key);
        }
        drop(entries);
        async move { Ok(matches) }
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        value: &[u8],
        ttl: Duration,
    ) -> impl Future<Output = Result<bool>> + Send {
        let mut entries = self.begin();
        let matches = entries
            .get(key)
            .is_some_and(|entry| entry.value.as_slice() == expected);
        if matches {
            entries.insert(
                key.to_string(),
                Entry {
                    value: value.to_vec(),
                    expires_at: Instant::now() + ttl,
                },
            );
        }
        drop(entries);
        async move { Ok(matches) }
    }

    fn exists(&self, key: &str) -> impl Future<Output = Result<bool>> + Send {
        let exists = self.begin().contains_key(key);
        async move { Ok(exists) }
    }
}
