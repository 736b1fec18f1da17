//! Redis-backed [`CacheStore`] built on `fred`.
//!
//! Lets several gateway replicas share runner lookups, auth decisions and
//! activity markers. Keys are prefixed so the store can share a Redis
//! database with other services; TTLs map to `SET ... PX`.

use std::time::Duration;

use fred::prelude::*;

use sandgate_core::cache::CacheStore;
use sandgate_types::error::CacheError;

fn backend_err(e: impl std::fmt::Display) -> CacheError {
    CacheError::Backend(e.to_string())
}

#[derive(Clone)]
pub struct RedisCacheStore {
    client: Client,
    prefix: String,
}

impl RedisCacheStore {
    /// Connect to `url` (e.g. `redis://cache:6379/0`) and wait for the
    /// connection to be established.
    pub async fn connect(url: &str, prefix: &str) -> Result<Self, CacheError> {
        let config = Config::from_url(url).map_err(backend_err)?;
        let client = Builder::from_config(config).build().map_err(backend_err)?;
        client.init().await.map_err(backend_err)?;
        tracing::info!(prefix, "connected to redis cache");
        Ok(Self::from_client(client, prefix))
    }

    pub fn from_client(client: Client, prefix: &str) -> Self {
        Self {
            client,
            prefix: prefix.trim_end_matches(':').to_string(),
        }
    }

    fn key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.prefix, key)
        }
    }

    pub async fn quit(&self) -> Result<(), CacheError> {
        self.client.quit().await.map_err(backend_err)
    }
}

impl CacheStore for RedisCacheStore {
    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        let count: i64 = self.client.exists(self.key(key)).await.map_err(backend_err)?;
        Ok(count > 0)
    }

    async fn get(&self, key: &str) -> Result<String, CacheError> {
        let value: Option<String> = self.client.get(self.key(key)).await.map_err(backend_err)?;
        value.ok_or(CacheError::Miss)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        // Redis rejects PX 0.
        let millis = ttl.as_millis().clamp(1, i64::MAX as u128) as i64;
        self.client
            .set::<(), _, _>(self.key(key), value, Some(Expiration::PX(millis)), None, false)
            .await
            .map_err(backend_err)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.client
            .del::<i64, _>(self.key(key))
            .await
            .map(|_| ())
            .map_err(backend_err)
    }
}
