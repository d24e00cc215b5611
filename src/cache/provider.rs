//! Cache provider: the client factory
//!
//! Uses enum dispatch over the two Redis backends, picked from
//! [`CacheConfig::backend`]. Services hold one `CacheProvider`, connect it
//! once at startup and share it by reference (or behind an `Arc`).

use super::errors::CacheResult;
use super::providers::{RedisCache, RedisClusterCache};
use super::traits::{CacheClient, CacheService};
use crate::config::{BackendKind, CacheConfig};
use redis::aio::ConnectionManager;
use redis::cluster_async::ClusterConnection;
use serde::Serialize;
use std::time::Duration;
use tracing::info;

/// Internal cache backend enum for zero-cost dispatch
#[derive(Debug)]
enum CacheBackend {
    /// Single node (boxed to keep the enum small)
    Standalone(Box<RedisCache>),
    /// Sharded cluster
    Cluster(Box<RedisClusterCache>),
}

/// Underlying connection exposed by [`CacheProvider::client`]
#[derive(Clone)]
pub enum RawConnection {
    Standalone(ConnectionManager),
    Cluster(ClusterConnection),
}

impl std::fmt::Debug for RawConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawConnection::Standalone(_) => f.write_str("RawConnection::Standalone"),
            RawConnection::Cluster(_) => f.write_str("RawConnection::Cluster"),
        }
    }
}

/// Cache client chosen from configuration
///
/// ```rust,no_run
/// use shardcache::{CacheConfig, CacheProvider, CacheService};
/// use std::time::Duration;
///
/// # async fn run() -> shardcache::CacheResult<()> {
/// let cache = CacheProvider::connect_from_config(CacheConfig::load()?).await?;
/// cache.cache_by_key("user:1", &serde_json::json!({"id": 1}), Duration::from_secs(60)).await?;
/// let keys = cache.get_keys_by_pattern("user:*", 100).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct CacheProvider {
    backend: CacheBackend,
}

impl CacheProvider {
    /// Build an unconnected provider for the configured backend
    pub fn new(config: CacheConfig) -> Self {
        let backend = match config.backend {
            BackendKind::Standalone => CacheBackend::Standalone(Box::new(RedisCache::new(config))),
            BackendKind::Cluster => CacheBackend::Cluster(Box::new(RedisClusterCache::new(config))),
        };
        Self { backend }
    }

    /// Validate `config`, build the provider and connect it
    pub async fn connect_from_config(config: CacheConfig) -> CacheResult<Self> {
        config.validate()?;
        let mut provider = Self::new(config);
        provider.connect().await?;
        info!(
            backend = %provider.backend_kind(),
            "Cache provider initialized successfully"
        );
        Ok(provider)
    }

    /// Connect the backend; fails with `AlreadyConnected` on a second call
    pub async fn connect(&mut self) -> CacheResult<()> {
        match &mut self.backend {
            CacheBackend::Standalone(cache) => cache.connect().await,
            CacheBackend::Cluster(cache) => cache.connect().await,
        }
    }

    /// Release the connection; the provider may be connected again afterwards
    pub fn shutdown(&mut self) {
        match &mut self.backend {
            CacheBackend::Standalone(cache) => cache.shutdown(),
            CacheBackend::Cluster(cache) => cache.shutdown(),
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        match &self.backend {
            CacheBackend::Standalone(_) => BackendKind::Standalone,
            CacheBackend::Cluster(_) => BackendKind::Cluster,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        match &self.backend {
            CacheBackend::Standalone(cache) => cache.config(),
            CacheBackend::Cluster(cache) => cache.config(),
        }
    }
}

impl CacheService for CacheProvider {
    type Handle = RawConnection;

    async fn cache_by_key<V>(&self, key: &str, value: &V, expiry: Duration) -> CacheResult<()>
    where
        V: Serialize + Sync + ?Sized,
    {
        match &self.backend {
            CacheBackend::Standalone(cache) => cache.cache_by_key(key, value, expiry).await,
            CacheBackend::Cluster(cache) => cache.cache_by_key(key, value, expiry).await,
        }
    }

    async fn get_by_key(&self, key: &str) -> CacheResult<String> {
        match &self.backend {
            CacheBackend::Standalone(cache) => cache.get_by_key(key).await,
            CacheBackend::Cluster(cache) => cache.get_by_key(key).await,
        }
    }

    async fn get_keys_by_pattern(&self, pattern: &str, count: usize) -> CacheResult<Vec<String>> {
        match &self.backend {
            CacheBackend::Standalone(cache) => cache.get_keys_by_pattern(pattern, count).await,
            CacheBackend::Cluster(cache) => cache.get_keys_by_pattern(pattern, count).await,
        }
    }

    async fn delete_key(&self, key: &str) -> CacheResult<()> {
        match &self.backend {
            CacheBackend::Standalone(cache) => cache.delete_key(key).await,
            CacheBackend::Cluster(cache) => cache.delete_key(key).await,
        }
    }

    async fn batch_delete_by_pattern(&self, pattern: &str, count: usize) -> CacheResult<()> {
        match &self.backend {
            CacheBackend::Standalone(cache) => cache.batch_delete_by_pattern(pattern, count).await,
            CacheBackend::Cluster(cache) => cache.batch_delete_by_pattern(pattern, count).await,
        }
    }

    async fn flush_db(&self) -> CacheResult<()> {
        match &self.backend {
            CacheBackend::Standalone(cache) => cache.flush_db().await,
            CacheBackend::Cluster(cache) => cache.flush_db().await,
        }
    }

    async fn flush_all(&self) -> CacheResult<()> {
        match &self.backend {
            CacheBackend::Standalone(cache) => cache.flush_all().await,
            CacheBackend::Cluster(cache) => cache.flush_all().await,
        }
    }

    fn client(&self) -> CacheResult<CacheClient<RawConnection>> {
        match &self.backend {
            CacheBackend::Standalone(cache) => Ok(cache.client()?.map(RawConnection::Standalone)),
            CacheBackend::Cluster(cache) => Ok(cache.client()?.map(RawConnection::Cluster)),
        }
    }

    fn is_connected(&self) -> bool {
        match &self.backend {
            CacheBackend::Standalone(cache) => cache.is_connected(),
            CacheBackend::Cluster(cache) => cache.is_connected(),
        }
    }

    fn provider_name(&self) -> &'static str {
        match &self.backend {
            CacheBackend::Standalone(cache) => cache.provider_name(),
            CacheBackend::Cluster(cache) => cache.provider_name(),
        }
    }
}
