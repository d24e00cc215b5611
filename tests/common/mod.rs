#![allow(dead_code)]

pub mod faults;
pub mod strategies;

pub use faults::*;
pub use strategies::*;

use serde_json::json;
use shardcache::cache::{ClusterTopology, MemoryNode, RedisCache, RedisClusterCache};
use shardcache::{CacheConfig, CacheService};
use std::time::Duration;

/// A standalone cache connected to an in-process node
pub async fn standalone_cache(node: MemoryNode, config: CacheConfig) -> RedisCache<MemoryNode> {
    let mut cache = RedisCache::<MemoryNode>::new(config);
    cache
        .connect_with(node)
        .await
        .expect("in-process node should accept the connection");
    cache
}

/// A cluster cache connected to `topology`
pub async fn cluster_cache<T: ClusterTopology>(
    topology: T,
    config: CacheConfig,
) -> RedisClusterCache<T> {
    let mut cache = RedisClusterCache::<T>::new(config);
    cache
        .connect_with(topology)
        .await
        .expect("in-process cluster should accept the connection");
    cache
}

/// Store a small JSON document under every key, without expiry
pub async fn seed<C: CacheService>(cache: &C, keys: &[&str]) {
    for key in keys {
        cache
            .cache_by_key(key, &json!({ "key": key }), Duration::ZERO)
            .await
            .expect("seeding should succeed");
    }
}

/// Store raw string keys directly on one node
pub async fn seed_node(node: &MemoryNode, keys: &[&str]) {
    use shardcache::cache::NodeConnection;
    for key in keys {
        node.set(key, b"{}", Duration::ZERO)
            .await
            .expect("seeding a node should succeed");
    }
}

pub fn sorted(mut keys: Vec<String>) -> Vec<String> {
    keys.sort();
    keys
}
