//! Standalone Redis cache provider
//!
//! Uses `redis::aio::ConnectionManager` for an async multiplexed connection
//! with automatic reconnection. Enumeration and pattern deletion are local
//! `SCAN` cursor loops against the one node.

use super::encode_payload;
use crate::cache::errors::{CacheError, CacheResult};
use crate::cache::fanout::with_deadline;
use crate::cache::node::{CursorScan, NodeConnection, RedisNode};
use crate::cache::traits::{CacheClient, CacheService};
use crate::config::CacheConfig;
use crate::logging::{log_cache_operation, redact_url};
use redis::aio::ConnectionManager;
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

/// Cache backend for a single Redis node
///
/// Created unconnected; [`RedisCache::connect`] establishes the handle and
/// [`RedisCache::shutdown`] releases it. The node type is generic so the same
/// backend runs against an in-process
/// [`MemoryNode`](crate::cache::providers::MemoryNode).
#[derive(Debug)]
pub struct RedisCache<N = RedisNode<ConnectionManager>> {
    config: CacheConfig,
    node: Option<N>,
}

impl<N: NodeConnection> RedisCache<N> {
    pub fn new(config: CacheConfig) -> Self {
        Self { config, node: None }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Adopt an already-open node after a successful liveness probe
    pub async fn connect_with(&mut self, node: N) -> CacheResult<()> {
        if self.node.is_some() {
            return Err(CacheError::AlreadyConnected);
        }

        with_deadline(self.config.redis.connect_timeout(), "connect", node.ping()).await?;

        log_cache_operation(
            "connect",
            "redis",
            &redact_url(node.address()),
            "connected",
            Some(&format!("database={}", self.config.redis.database)),
        );
        self.node = Some(node);
        Ok(())
    }

    /// Drop the handle; the backend then behaves as if never connected
    pub fn shutdown(&mut self) {
        if let Some(node) = self.node.take() {
            info!(node = %redact_url(node.address()), "Redis cache client shut down");
        }
    }

    fn scan(&self, node: &N, pattern: &str, count: usize) -> CursorScan<N> {
        CursorScan::new(
            node.clone(),
            pattern,
            self.config.scan.effective_count(count),
            self.config.scan.max_iterations,
        )
    }
}

impl RedisCache<RedisNode<ConnectionManager>> {
    /// Connect to the configured node and verify it answers `PING`
    pub async fn connect(&mut self) -> CacheResult<()> {
        if self.node.is_some() {
            return Err(CacheError::AlreadyConnected);
        }

        let url = self.config.redis.connection_url();
        let client = redis::Client::open(url.as_str()).map_err(|e| {
            CacheError::Connection(format!("Failed to create Redis client: {}", e))
        })?;

        let manager = with_deadline(self.config.redis.connect_timeout(), "connect", async {
            ConnectionManager::new(client).await.map_err(|e| {
                CacheError::Connection(format!("Failed to connect to Redis: {}", e))
            })
        })
        .await?;

        debug!(url = %redact_url(&url), "Redis connection established");
        let address = self.config.redis.address.clone();
        self.connect_with(RedisNode::new(address, manager)).await
    }
}

impl<N: NodeConnection> CacheService for RedisCache<N> {
    type Handle = N::Raw;

    async fn cache_by_key<V>(&self, key: &str, value: &V, expiry: Duration) -> CacheResult<()>
    where
        V: Serialize + Sync + ?Sized,
    {
        let Some(node) = &self.node else {
            debug!(key = key, "Cache SET skipped, no client");
            return Ok(());
        };
        let policy = self.config.mutation_policy;
        let payload = encode_payload(key, value, policy)?;

        let result = node.set(key, &payload, expiry).await;
        if result.is_ok() {
            debug!(key = key, expiry_ms = expiry.as_millis() as u64, "Cache SET");
        }
        policy.settle("cache_by_key", result)
    }

    async fn get_by_key(&self, key: &str) -> CacheResult<String> {
        let node = self.node.as_ref().ok_or(CacheError::NoClient)?;
        match node.get(key).await? {
            Some(value) => {
                debug!(key = key, "Cache HIT");
                Ok(value)
            }
            None => {
                debug!(key = key, "Cache MISS");
                Err(CacheError::NotFound {
                    key: key.to_string(),
                })
            }
        }
    }

    async fn get_keys_by_pattern(&self, pattern: &str, count: usize) -> CacheResult<Vec<String>> {
        let node = self.node.as_ref().ok_or(CacheError::NoClient)?;
        let mut scan = self.scan(node, pattern, count);

        with_deadline(
            self.config.scan.operation_timeout(),
            "get_keys_by_pattern",
            async move {
                // SCAN may hand back a key more than once within a pass
                let mut found = HashSet::new();
                while let Some(keys) = scan.next_batch().await? {
                    found.extend(keys);
                }
                debug!(
                    pattern = pattern,
                    keys = found.len(),
                    iterations = scan.iterations(),
                    "Cache pattern scan"
                );
                Ok(found.into_iter().collect())
            },
        )
        .await
    }

    async fn delete_key(&self, key: &str) -> CacheResult<()> {
        let Some(node) = &self.node else {
            return Ok(());
        };
        let result = node.del(&[key.to_string()]).await.map(|removed| {
            debug!(key = key, removed = removed, "Cache DEL");
        });
        self.config.mutation_policy.settle("delete_key", result)
    }

    async fn batch_delete_by_pattern(&self, pattern: &str, count: usize) -> CacheResult<()> {
        let Some(node) = &self.node else {
            return Ok(());
        };
        let mut scan = self.scan(node, pattern, count);

        let result = with_deadline(
            self.config.scan.operation_timeout(),
            "batch_delete_by_pattern",
            async {
                let mut deleted: u64 = 0;
                while let Some(keys) = scan.next_batch().await? {
                    deleted += node.del(&keys).await?;
                }
                debug!(pattern = pattern, deleted = deleted, "Cache pattern DEL");
                Ok(())
            },
        )
        .await;
        self.config
            .mutation_policy
            .settle("batch_delete_by_pattern", result)
    }

    async fn flush_db(&self) -> CacheResult<()> {
        let Some(node) = &self.node else {
            return Ok(());
        };
        let result =
            with_deadline(self.config.scan.operation_timeout(), "flush_db", node.flush_db())
                .await;
        self.config.mutation_policy.settle("flush_db", result)
    }

    async fn flush_all(&self) -> CacheResult<()> {
        let Some(node) = &self.node else {
            return Ok(());
        };
        let result =
            with_deadline(self.config.scan.operation_timeout(), "flush_all", node.flush_all())
                .await;
        self.config.mutation_policy.settle("flush_all", result)
    }

    fn client(&self) -> CacheResult<CacheClient<N::Raw>> {
        self.node
            .as_ref()
            .map(|node| CacheClient::standalone(node.raw()))
            .ok_or(CacheError::NoClient)
    }

    fn is_connected(&self) -> bool {
        self.node.is_some()
    }

    fn provider_name(&self) -> &'static str {
        "redis"
    }
}
