//! BoxCacheStore -- object-safe dynamic dispatch wrapper for CacheStore.
//!
//! 1. Define an object-safe `CacheStoreDyn` trait with boxed futures
//! 2. Blanket-impl `CacheStoreDyn` for all `T: CacheStore`
//! 3. `BoxCacheStore` wraps `Arc<dyn CacheStoreDyn>` and delegates
//!
//! The backend is picked from configuration at startup, so components hold a
//! `BoxCacheStore` rather than being generic over the store type.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use sandgate_types::error::CacheError;

use super::CacheStore;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe version of [`CacheStore`] with boxed futures.
pub trait CacheStoreDyn: Send + Sync {
    fn has_boxed<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool, CacheError>>;

    fn get_boxed<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<String, CacheError>>;

    fn set_boxed<'a>(
        &'a self,
        key: &'a str,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<(), CacheError>>;

    fn delete_boxed<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), CacheError>>;
}

/// Blanket implementation: any `CacheStore` automatically implements `CacheStoreDyn`.
impl<T: CacheStore> CacheStoreDyn for T {
    fn has_boxed<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool, CacheError>> {
        Box::pin(self.has(key))
    }

    fn get_boxed<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<String, CacheError>> {
        Box::pin(self.get(key))
    }

    fn set_boxed<'a>(
        &'a self,
        key: &'a str,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(self.set(key, value, ttl))
    }

    fn delete_boxed<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(self.delete(key))
    }
}

/// Shared handle to the process-wide cache backend.
///
/// Cloning is cheap and every clone sees the same entries.
#[derive(Clone)]
pub struct BoxCacheStore {
    inner: Arc<dyn CacheStoreDyn>,
}

impl BoxCacheStore {
    pub fn new<S: CacheStore + 'static>(store: S) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }
}

impl CacheStore for BoxCacheStore {
    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        self.inner.has_boxed(key).await
    }

    async fn get(&self, key: &str) -> Result<String, CacheError> {
        self.inner.get_boxed(key).await
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.inner.set_boxed(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.inner.delete_boxed(key).await
    }
}
