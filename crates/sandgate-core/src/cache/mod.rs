//! TTL key-value cache abstraction.
//!
//! `CacheStore` is the storage port: string values with a per-entry TTL.
//! Implementations: [`memory::MemoryCacheStore`] (process-local) and the
//! Redis store in `sandgate-infra`. The backend is chosen at startup and
//! wrapped in a [`BoxCacheStore`] so every component shares one instance.
//!
//! [`Cache<T>`] layers a key namespace and JSON encoding on top, giving each
//! caching concern (runner info, sandbox state, auth decisions, ...) its own
//! typed view of the shared store.
//!
//! Call sites treat every `get` error as a miss and never let a failed `set`
//! abort the surrounding operation.

pub mod box_store;
pub mod memory;

use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use sandgate_types::error::CacheError;

pub use box_store::BoxCacheStore;

/// Storage port for TTL-bound string values.
///
/// Must be safe for concurrent use from arbitrary tasks.
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait CacheStore: Send + Sync {
    /// Whether a live (non-expired) entry exists for `key`.
    fn has(&self, key: &str) -> impl Future<Output = Result<bool, CacheError>> + Send;

    /// The stored value, or `CacheError::Miss` if absent or expired.
    fn get(&self, key: &str) -> impl Future<Output = Result<String, CacheError>> + Send;

    /// Insert or overwrite `key`, expiring after `ttl`.
    fn set(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;

    /// Remove `key`. No-op if absent.
    fn delete(&self, key: &str) -> impl Future<Output = Result<(), CacheError>> + Send;
}

/// Typed, namespaced view over a shared [`BoxCacheStore`].
///
/// Keys are stored as `<namespace>:<key>`, values as JSON.
pub struct Cache<T> {
    store: BoxCacheStore,
    namespace: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Cache<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            namespace: self.namespace,
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Cache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").field("namespace", &self.namespace).finish()
    }
}

impl<T> Cache<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(store: BoxCacheStore, namespace: &'static str) -> Self {
        Self {
            store,
            namespace,
            _marker: PhantomData,
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    pub async fn has(&self, key: &str) -> Result<bool, CacheError> {
        self.store.has(&self.key(key)).await
    }

    pub async fn get(&self, key: &str) -> Result<T, CacheError> {
        let raw = self.store.get(&self.key(key)).await?;
        serde_json::from_str(&raw).map_err(|e| CacheError::Codec(e.to_string()))
    }

    pub async fn set(&self, key: &str, value: &T, ttl: Duration) -> Result<(), CacheError> {
        let raw = serde_json::to_string(value).map_err(|e| CacheError::Codec(e.to_string()))?;
        self.store.set(&self.key(key), raw, ttl).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.store.delete(&self.key(key)).await
    }
}
