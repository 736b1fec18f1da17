//! Process-local cache backend.
//!
//! Entries live in a `DashMap` so concurrent requests for different keys
//! never contend on a single lock. Expiry is checked lazily on read;
//! [`MemoryCacheStore::purge_expired`] reclaims entries nobody reads again.
//!
//! Uses `tokio::time::Instant` so paused-clock tests can advance TTLs.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use sandgate_types::error::CacheError;
use tokio::time::Instant;

use super::CacheStore;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    inserted_at: Instant,
    ttl: Duration,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) > self.ttl
    }
}

/// In-memory TTL store. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStore {
    entries: Arc<DashMap<String, Entry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn live_value(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        // Clone out of the guard before touching the map again.
        let entry = self.entries.get(key).map(|r| r.value().clone())?;
        if entry.is_expired(now) {
            self.entries.remove_if(key, |_, e| e.is_expired(now));
            return None;
        }
        Some(entry.value)
    }
}

impl CacheStore for MemoryCacheStore {
    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.live_value(key).is_some())
    }

    async fn get(&self, key: &str) -> Result<String, CacheError> {
        self.live_value(key).ok_or(CacheError::Miss)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                inserted_at: Instant::now(),
                ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }
}
