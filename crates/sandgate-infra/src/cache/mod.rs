//! Cache backend construction.
//!
//! The backend is chosen once at startup from [`CacheConfig`] and handed to
//! every component as a shared [`BoxCacheStore`].

pub mod redis;

use sandgate_core::cache::BoxCacheStore;
use sandgate_core::cache::memory::MemoryCacheStore;
use sandgate_types::config::{CacheBackendKind, CacheConfig};
use sandgate_types::error::CacheError;

pub use redis::RedisCacheStore;

/// A constructed cache backend.
///
/// The memory variant is kept concrete so the server can sweep expired
/// entries periodically.
pub enum CacheBackend {
    Memory(MemoryCacheStore),
    Redis(RedisCacheStore),
}

impl CacheBackend {
    pub async fn from_config(config: &CacheConfig) -> Result<Self, CacheError> {
        match config.backend {
            CacheBackendKind::Local => Ok(Self::Memory(MemoryCacheStore::new())),
            CacheBackendKind::Redis => {
                let url = config
                    .redis_url
                    .as_deref()
                    .filter(|u| !u.is_empty())
                    .ok_or_else(|| CacheError::Backend("redis URL is not configured".to_string()))?;
                Ok(Self::Redis(RedisCacheStore::connect(url, &config.key_prefix).await?))
            }
        }
    }

    pub fn kind(&self) -> CacheBackendKind {
        match self {
            Self::Memory(_) => CacheBackendKind::Local,
            Self::Redis(_) => CacheBackendKind::Redis,
        }
    }

    pub fn store(&self) -> BoxCacheStore {
        match self {
            Self::Memory(store) => BoxCacheStore::new(store.clone()),
            Self::Redis(store) => BoxCacheStore::new(store.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandgate_core::cache::CacheStore;
    use std::time::Duration;

    #[tokio::test]
    async fn test_local_backend_default() {
        let backend = CacheBackend::from_config(&CacheConfig::default()).await.unwrap();
        assert_eq!(backend.kind(), CacheBackendKind::Local);

        let store = backend.store();
        store.set("k", "v".to_string(), Duration::from_secs(5)).await.unwrap();
        // A second handle sees the same entries.
        assert_eq!(backend.store().get("k").await.unwrap(), "v");
    }

    #[tokio::test]
    async fn test_redis_backend_requires_url() {
        let config = CacheConfig {
            backend: CacheBackendKind::Redis,
            redis_url: None,
            key_prefix: "sandgate".to_string(),
        };
        assert!(CacheBackend::from_config(&config).await.is_err());
    }
}
