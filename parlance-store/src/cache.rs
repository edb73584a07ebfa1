//! Key-value cache with TTL and conditional writes.
//!
//! The conditional operations (`set_if_absent`, `compare_and_swap`,
//! `compare_and_delete`) are the primitive the lease layer is built on, so
//! every backend must implement them atomically.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Process-external (or in-memory) key-value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get a value; expired entries read as absent.
    async fn get(&self, key: &str) -> Option<String>;

    /// Set a value with an optional TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>);

    /// Set only when the key is absent. Returns true when the write won.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> bool;

    /// Replace the value only when the current value equals `expected`.
    /// Returns true when the swap happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> bool;

    /// Delete only when the current value equals `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> bool;

    /// Delete unconditionally.
    async fn delete(&self, key: &str);
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory key-value store with lazy expiry.
#[derive(Default)]
pub struct MemoryKeyValue {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryKeyValue {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(value: &str, ttl: Option<Duration>) -> Entry {
        Entry {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValue {
    async fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone())
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), Self::entry(value, ttl));
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(existing) if !existing.is_expired(now) => false,
            _ => {
                entries.insert(key.to_string(), Self::entry(value, ttl));
                true
            }
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(existing) if !existing.is_expired(now) && existing.value == expected => {
                entries.insert(key.to_string(), Self::entry(value, ttl));
                true
            }
            _ => false,
        }
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(existing) if !existing.is_expired(now) && existing.value == expected => {
                entries.remove(key);
                true
            }
            _ => false,
        }
    }

    async fn delete(&self, key: &str) {
        let mut entries = self.entries.write().await;
        entries.remove(key);
    }
}
