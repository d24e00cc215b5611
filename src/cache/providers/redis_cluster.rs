//! Redis Cluster cache provider
//!
//! Key commands go through redis-rs' cluster connection, which routes them to
//! the owning shard. Pattern enumeration, pattern deletion and flushes have to
//! visit every shard master individually: the masters are discovered with
//! `CLUSTER SLOTS` on each call, never cached, and each one gets its own
//! cursor loop.

use super::encode_payload;
use crate::cache::errors::{CacheError, CacheResult};
use crate::cache::fanout::{for_each_master, settle_masters, with_deadline, FanOut, STRING_KEYS};
use crate::cache::node::{CursorScan, NodeConnection, RedisNode};
use crate::cache::traits::{CacheClient, CacheService};
use crate::config::{CacheConfig, RedisConfig};
use crate::logging::{log_cache_operation, redact_url};
use dashmap::DashMap;
use futures::future::try_join_all;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::cluster::ClusterClientBuilder;
use redis::cluster_async::ClusterConnection;
use redis::Value;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Source of the cluster's key router and its current shard masters
pub trait ClusterTopology: Send + Sync + 'static {
    /// Connection that routes single-key commands to the owning shard
    type Router: NodeConnection;
    /// Connection scoped to one master
    type Node: NodeConnection;

    fn router(&self) -> &Self::Router;

    /// Discover the masters serving the keyspace right now
    fn masters(&self) -> impl Future<Output = CacheResult<Vec<Self::Node>>> + Send;
}

/// Extract the distinct master addresses from a `CLUSTER SLOTS` reply
///
/// Each slot range is `[start, end, [host, port, id?, ...], replicas...]`.
/// An empty or `?` host means "the node you asked", so `seed_host` is used.
pub fn parse_cluster_slots(reply: &Value, seed_host: &str) -> CacheResult<Vec<String>> {
    let malformed =
        |what: &str| CacheError::Topology(format!("malformed CLUSTER SLOTS reply: {what}"));

    let Value::Array(ranges) = reply else {
        return Err(malformed("expected an array of slot ranges"));
    };

    let mut addresses: Vec<String> = Vec::new();
    for range in ranges {
        let Value::Array(fields) = range else {
            return Err(malformed("slot range is not an array"));
        };
        let Some(Value::Array(master)) = fields.get(2) else {
            return Err(malformed("slot range has no master"));
        };
        let host = match master.first() {
            Some(Value::BulkString(bytes)) => String::from_utf8_lossy(bytes).into_owned(),
            Some(Value::SimpleString(host)) => host.clone(),
            _ => return Err(malformed("master host is not a string")),
        };
        let port = match master.get(1) {
            Some(Value::Int(port)) => *port,
            _ => return Err(malformed("master port is not an integer")),
        };

        let host = if host.is_empty() || host == "?" {
            seed_host.to_string()
        } else {
            host
        };
        let address = format!("{host}:{port}");
        if !addresses.contains(&address) {
            addresses.push(address);
        }
    }
    Ok(addresses)
}

/// Topology of a live Redis Cluster
///
/// Holds one cluster connection for key routing and a pool of reconnecting
/// connections to masters, keyed by address. Pool entries for nodes that
/// are no longer masters are dropped on the next discovery.
pub struct RedisClusterTopology {
    router: RedisNode<ClusterConnection>,
    redis: RedisConfig,
    seed_host: String,
    pool: DashMap<String, RedisNode<ConnectionManager>>,
}

impl std::fmt::Debug for RedisClusterTopology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisClusterTopology")
            .field("seed", &redact_url(&self.redis.seed_url()))
            .field("pooled_masters", &self.pool.len())
            .finish()
    }
}

impl RedisClusterTopology {
    /// Open the routing connection through the configured seed node
    pub async fn connect(redis: &RedisConfig) -> CacheResult<Self> {
        let seed = redis.seed_url();
        let mut builder = ClusterClientBuilder::new(vec![seed.clone()]);
        if let Some(timeout) = redis.connect_timeout() {
            builder = builder.connection_timeout(timeout);
        }
        let client = builder.build().map_err(|e| {
            CacheError::Connection(format!("Failed to create Redis Cluster client: {}", e))
        })?;
        let connection = client.get_async_connection().await.map_err(|e| {
            CacheError::Connection(format!("Failed to connect to Redis Cluster: {}", e))
        })?;

        debug!(seed = %redact_url(&seed), "Redis Cluster connection established");
        Ok(Self {
            router: RedisNode::new(redis.address.as_str(), connection),
            redis: redis.clone(),
            seed_host: redis.host(),
            pool: DashMap::new(),
        })
    }

    async fn master(&self, address: &str) -> CacheResult<RedisNode<ConnectionManager>> {
        if let Some(node) = self.pool.get(address).map(|entry| entry.value().clone()) {
            return Ok(node);
        }

        let node = dial_master(&self.redis, address).await?;
        self.pool.insert(address.to_string(), node.clone());
        Ok(node)
    }
}

/// Open a connection to one master, bounded by `connect_timeout`
///
/// The connection manager re-dials on its own after the master restarts, so
/// a pooled entry stays usable for as long as the address serves slots.
pub(crate) async fn dial_master(
    redis: &RedisConfig,
    address: &str,
) -> CacheResult<RedisNode<ConnectionManager>> {
    let info = redis.node_connection_info(address)?;
    let client = redis::Client::open(info).map_err(|e| {
        CacheError::Connection(format!("Failed to create client for master {address}: {e}"))
    })?;

    let mut manager_config = ConnectionManagerConfig::new();
    if let Some(timeout) = redis.connect_timeout() {
        manager_config = manager_config.set_connection_timeout(timeout);
    }

    let connection = with_deadline(redis.connect_timeout(), "connect_master", async {
        ConnectionManager::new_with_config(client, manager_config)
            .await
            .map_err(|e| {
                CacheError::Connection(format!("Failed to connect to master {address}: {e}"))
            })
    })
    .await?;

    debug!(node = %address, "Opened connection to cluster master");
    Ok(RedisNode::new(address, connection))
}

impl ClusterTopology for RedisClusterTopology {
    type Router = RedisNode<ClusterConnection>;
    type Node = RedisNode<ConnectionManager>;

    fn router(&self) -> &Self::Router {
        &self.router
    }

    async fn masters(&self) -> CacheResult<Vec<Self::Node>> {
        let mut conn = self.router.raw();
        let reply: Value = redis::cmd("CLUSTER")
            .arg("SLOTS")
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Topology(format!("CLUSTER SLOTS failed: {e}")))?;

        let addresses = parse_cluster_slots(&reply, &self.seed_host)?;
        self.pool.retain(|address, _| addresses.contains(address));

        let masters =
            try_join_all(addresses.iter().map(|address| self.master(address))).await?;
        debug!(masters = masters.len(), "Discovered cluster masters");
        Ok(masters)
    }
}

/// Cache backend for a sharded Redis Cluster
///
/// Created unconnected; [`RedisClusterCache::connect`] opens the topology and
/// [`RedisClusterCache::shutdown`] releases it. Generic over the topology so
/// it also runs against a [`MemoryCluster`](crate::cache::providers::MemoryCluster).
#[derive(Debug)]
pub struct RedisClusterCache<T = RedisClusterTopology> {
    config: CacheConfig,
    topology: Option<T>,
}

impl<T: ClusterTopology> RedisClusterCache<T> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            topology: None,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Adopt an already-open topology after its router answers `PING`
    pub async fn connect_with(&mut self, topology: T) -> CacheResult<()> {
        if self.topology.is_some() {
            return Err(CacheError::AlreadyConnected);
        }

        with_deadline(
            self.config.redis.connect_timeout(),
            "connect",
            topology.router().ping(),
        )
        .await?;

        log_cache_operation(
            "connect",
            "redis-cluster",
            &redact_url(topology.router().address()),
            "connected",
            None,
        );
        self.topology = Some(topology);
        Ok(())
    }

    /// Drop the topology and its pooled connections
    pub fn shutdown(&mut self) {
        if let Some(topology) = self.topology.take() {
            info!(
                seed = %redact_url(topology.router().address()),
                "Redis Cluster cache client shut down"
            );
        }
    }

    pub fn topology(&self) -> Option<&T> {
        self.topology.as_ref()
    }

    fn fan_out(&self, pattern: &str, count: usize, masters: usize) -> FanOut {
        FanOut {
            pattern: Arc::from(pattern),
            count: self.config.scan.effective_count(count),
            max_iterations: self.config.scan.max_iterations,
            concurrency: self.config.scan.fanout_limit(masters),
            channel_capacity: self.config.scan.channel_capacity,
        }
    }

    /// Run `op` on every current master and apply the mutation policy
    async fn on_every_master<F, Fut>(
        &self,
        topology: &T,
        operation: &str,
        op: F,
    ) -> CacheResult<()>
    where
        F: Fn(T::Node) -> Fut + Send,
        Fut: Future<Output = CacheResult<()>> + Send,
    {
        let policy = self.config.mutation_policy;
        let result = with_deadline(self.config.scan.operation_timeout(), operation, async {
            let masters = topology.masters().await?;
            let limit = self.config.scan.fanout_limit(masters.len());
            let outcomes = for_each_master(masters, limit, op).await;
            settle_masters(policy, operation, outcomes)
        })
        .await;
        policy.settle(operation, result)
    }
}

impl RedisClusterCache<RedisClusterTopology> {
    /// Connect through the configured seed node and verify the cluster answers `PING`
    pub async fn connect(&mut self) -> CacheResult<()> {
        if self.topology.is_some() {
            return Err(CacheError::AlreadyConnected);
        }
        let topology = with_deadline(
            self.config.redis.connect_timeout(),
            "connect",
            RedisClusterTopology::connect(&self.config.redis),
        )
        .await?;
        self.connect_with(topology).await
    }
}

/// Pattern delete on one master: one pipelined round trip per scanned batch
async fn delete_on_master<N: NodeConnection>(
    node: N,
    pattern: &str,
    count: usize,
    max_iterations: u64,
) -> CacheResult<()> {
    let mut scan =
        CursorScan::new(node.clone(), pattern, count, max_iterations).with_type(STRING_KEYS);
    let mut deleted = 0usize;
    while let Some(keys) = scan.next_batch().await? {
        if keys.is_empty() {
            continue;
        }
        node.del_pipelined(&keys).await?;
        deleted += keys.len();
    }
    debug!(node = %node.address(), pattern = pattern, deleted = deleted, "Master pattern DEL");
    Ok(())
}

impl<T: ClusterTopology> CacheService for RedisClusterCache<T> {
    type Handle = <T::Router as NodeConnection>::Raw;

    async fn cache_by_key<V>(&self, key: &str, value: &V, expiry: Duration) -> CacheResult<()>
    where
        V: Serialize + Sync + ?Sized,
    {
        let Some(topology) = &self.topology else {
            debug!(key = key, "Cache SET skipped, no client");
            return Ok(());
        };
        let policy = self.config.mutation_policy;
        let payload = encode_payload(key, value, policy)?;

        let result = topology.router().set(key, &payload, expiry).await;
        if result.is_ok() {
            debug!(key = key, expiry_ms = expiry.as_millis() as u64, "Cache SET");
        }
        policy.settle("cache_by_key", result)
    }

    async fn get_by_key(&self, key: &str) -> CacheResult<String> {
        let topology = self.topology.as_ref().ok_or(CacheError::NoClient)?;
        match topology.router().get(key).await? {
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
        let topology = self.topology.as_ref().ok_or(CacheError::NoClient)?;

        with_deadline(self.config.scan.operation_timeout(), "get_keys_by_pattern", async {
            let masters = topology.masters().await?;
            let fan_out = self.fan_out(pattern, count, masters.len());
            let keys = fan_out.collect(masters).await?;
            debug!(pattern = pattern, keys = keys.len(), "Cluster pattern scan");
            Ok(keys)
        })
        .await
    }

    async fn delete_key(&self, key: &str) -> CacheResult<()> {
        let Some(topology) = &self.topology else {
            return Ok(());
        };
        let result = topology
            .router()
            .del(&[key.to_string()])
            .await
            .map(|removed| debug!(key = key, removed = removed, "Cache DEL"));
        self.config.mutation_policy.settle("delete_key", result)
    }

    async fn batch_delete_by_pattern(&self, pattern: &str, count: usize) -> CacheResult<()> {
        let Some(topology) = &self.topology else {
            return Ok(());
        };
        let count = self.config.scan.effective_count(count);
        let max_iterations = self.config.scan.max_iterations;

        self.on_every_master(topology, "batch_delete_by_pattern", |node| {
            delete_on_master(node, pattern, count, max_iterations)
        })
        .await
    }

    async fn flush_db(&self) -> CacheResult<()> {
        let Some(topology) = &self.topology else {
            return Ok(());
        };
        self.on_every_master(topology, "flush_db", |node| async move { node.flush_db().await })
            .await
    }

    async fn flush_all(&self) -> CacheResult<()> {
        let Some(topology) = &self.topology else {
            return Ok(());
        };
        self.on_every_master(topology, "flush_all", |node| async move { node.flush_all().await })
            .await
    }

    fn client(&self) -> CacheResult<CacheClient<Self::Handle>> {
        self.topology
            .as_ref()
            .map(|topology| CacheClient::cluster(topology.router().raw()))
            .ok_or(CacheError::NoClient)
    }

    fn is_connected(&self) -> bool {
        self.topology.is_some()
    }

    fn provider_name(&self) -> &'static str {
        "redis-cluster"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::providers::MemoryCluster;

    fn bulk(s: &str) -> Value {
        Value::BulkString(s.as_bytes().to_vec())
    }

    fn range(start: i64, end: i64, host: &str, port: i64) -> Value {
        Value::Array(vec![
            Value::Int(start),
            Value::Int(end),
            Value::Array(vec![bulk(host), Value::Int(port), bulk("node-id")]),
            Value::Array(vec![bulk("10.0.0.9"), Value::Int(7100), bulk("replica-id")]),
        ])
    }

    #[test]
    fn test_parse_cluster_slots() {
        let reply = Value::Array(vec![
            range(0, 5460, "10.0.0.1", 7000),
            range(5461, 10922, "10.0.0.2", 7001),
            range(10923, 12000, "10.0.0.3", 7002),
            // a master owning two ranges is listed once
            range(12001, 16383, "10.0.0.3", 7002),
        ]);
        let masters = parse_cluster_slots(&reply, "seed").unwrap();
        assert_eq!(masters, vec!["10.0.0.1:7000", "10.0.0.2:7001", "10.0.0.3:7002"]);
    }

    #[test]
    fn test_parse_cluster_slots_empty_host_uses_seed() {
        let reply = Value::Array(vec![range(0, 16383, "", 7000)]);
        assert_eq!(
            parse_cluster_slots(&reply, "seed.local").unwrap(),
            vec!["seed.local:7000"]
        );
    }

    #[test]
    fn test_parse_cluster_slots_rejects_garbage() {
        assert!(matches!(
            parse_cluster_slots(&Value::Nil, "seed"),
            Err(CacheError::Topology(_))
        ));
        let reply = Value::Array(vec![Value::Array(vec![Value::Int(0), Value::Int(1)])]);
        assert!(parse_cluster_slots(&reply, "seed").is_err());
    }

    async fn connected(cluster: &MemoryCluster) -> RedisClusterCache<MemoryCluster> {
        let mut cache = RedisClusterCache::new(CacheConfig::cluster("127.0.0.1:7000"));
        cache.connect_with(cluster.clone()).await.unwrap();
        cache
    }

    #[tokio::test]
    async fn test_keys_span_every_master() {
        let cluster = MemoryCluster::new(3);
        let cache = connected(&cluster).await;
        for i in 0..90 {
            cache
                .cache_by_key(&format!("item:{i}"), &i, Duration::ZERO)
                .await
                .unwrap();
        }
        assert!(cluster.nodes().iter().all(|node| node.dbsize() > 0));

        let keys = cache.get_keys_by_pattern("item:*", 7).await.unwrap();
        assert_eq!(keys.len(), 90);
        assert_eq!(cache.get_by_key("item:42").await.unwrap(), "42");
    }

    #[tokio::test]
    async fn test_batch_delete_and_flush_cover_every_master() {
        let cluster = MemoryCluster::new(4);
        let cache = connected(&cluster).await;
        for i in 0..40 {
            cache.cache_by_key(&format!("tmp:{i}"), &i, Duration::ZERO).await.unwrap();
            cache.cache_by_key(&format!("keep:{i}"), &i, Duration::ZERO).await.unwrap();
        }

        cache.batch_delete_by_pattern("tmp:*", 5).await.unwrap();
        assert!(cache.get_keys_by_pattern("tmp:*", 0).await.unwrap().is_empty());
        assert_eq!(cache.get_keys_by_pattern("keep:*", 0).await.unwrap().len(), 40);

        cache.flush_db().await.unwrap();
        assert!(cluster.all_keys().is_empty());
    }

    #[tokio::test]
    async fn test_masters_rediscovered_per_call() {
        let cluster = MemoryCluster::new(2);
        let cache = connected(&cluster).await;
        for i in 0..30 {
            cache.cache_by_key(&format!("k:{i}"), &i, Duration::ZERO).await.unwrap();
        }

        cluster.add_master();
        assert_eq!(cache.get_keys_by_pattern("k:*", 0).await.unwrap().len(), 30);

        assert!(cluster.remove_master("127.0.0.1:7000"));
        assert_eq!(cache.get_keys_by_pattern("k:*", 0).await.unwrap().len(), 30);
    }

    #[tokio::test]
    async fn test_client_handle_is_cluster() {
        let cluster = MemoryCluster::new(1);
        let mut cache = connected(&cluster).await;
        assert!(cache.client().unwrap().is_cluster());

        cache.shutdown();
        assert!(cache.client().unwrap_err().is_no_client());
        assert!(cache.delete_key("k").await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_rejects_empty_cluster() {
        let mut cache: RedisClusterCache<MemoryCluster> =
            RedisClusterCache::new(CacheConfig::cluster("seed:7000"));
        assert!(matches!(
            cache.connect_with(MemoryCluster::new(0)).await,
            Err(CacheError::Connection(_))
        ));
        assert!(!cache.is_connected());
    }

    #[tokio::test]
    async fn test_dial_master_is_bounded_by_connect_timeout() {
        let redis = RedisConfig {
            address: "redis://:s3cret@127.0.0.1:7000".to_string(),
            connect_timeout_ms: 300,
            ..RedisConfig::default()
        };
        // nothing listens on port 1, and the manager keeps retrying on its own
        let started = std::time::Instant::now();
        let dial = dial_master(&redis, "127.0.0.1:1");
        let result = tokio::time::timeout(Duration::from_secs(5), dial)
            .await
            .expect("dial should give up at the connect deadline");

        assert!(matches!(
            result,
            Err(CacheError::Connection(_)) | Err(CacheError::Timeout(_))
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_dial_master_rejects_malformed_address() {
        let redis = RedisConfig::default();
        assert!(matches!(
            dial_master(&redis, "10.0.0.5").await,
            Err(CacheError::Topology(_))
        ));
    }

    #[cfg(feature = "test-services")]
    mod integration {
        use super::*;
        use tracing::warn;

        #[tokio::test]
        async fn test_cluster_fan_out_against_live_cluster() {
            let address = std::env::var("REDIS_CLUSTER_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:7000".to_string());
            let mut cache: RedisClusterCache =
                RedisClusterCache::new(CacheConfig::cluster(address));
            if let Err(e) = cache.connect().await {
                warn!("Skipping Redis Cluster test (not available): {}", e);
                return;
            }

            let prefix = format!("shardcache:cluster:{}", uuid::Uuid::new_v4());
            for i in 0..50 {
                cache
                    .cache_by_key(&format!("{prefix}:{i}"), &i, Duration::from_secs(60))
                    .await
                    .unwrap();
            }
            let keys = cache.get_keys_by_pattern(&format!("{prefix}:*"), 10).await.unwrap();
            assert_eq!(keys.len(), 50);

            cache.batch_delete_by_pattern(&format!("{prefix}:*"), 10).await.unwrap();
            assert!(cache
                .get_keys_by_pattern(&format!("{prefix}:*"), 0)
                .await
                .unwrap()
                .is_empty());
        }
    }
}
