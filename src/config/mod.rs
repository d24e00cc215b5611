//! # Cache Configuration
//!
//! Configuration for the cache client: which backend to build, how to reach
//! the store, how cursor scans are bounded, and how mutating operations
//! report failures.
//!
//! Values are layered by [`ConfigLoader`]: built-in defaults, then an
//! optional file, then `SHARDCACHE__*` environment variables.
//!
//! ```rust,no_run
//! use shardcache::config::CacheConfig;
//!
//! let config = CacheConfig::load()?;
//! println!("backend: {}", config.backend);
//! # Ok::<(), shardcache::CacheError>(())
//! ```

pub mod loader;

pub use loader::{ConfigLoader, CONFIG_PATH_ENV, ENV_PREFIX};

use crate::cache::errors::{CacheError, CacheResult};
use redis::{ConnectionAddr, ConnectionInfo, IntoConnectionInfo};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Which backend a [`CacheProvider`](crate::CacheProvider) builds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// One addressable Redis node
    #[default]
    #[serde(alias = "single", alias = "node", alias = "redis")]
    Standalone,
    /// A Redis Cluster reached through a seed address
    #[serde(alias = "redis-cluster", alias = "redis_cluster")]
    Cluster,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Standalone => write!(f, "standalone"),
            BackendKind::Cluster => write!(f, "cluster"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standalone" | "single" | "node" | "redis" => Ok(BackendKind::Standalone),
            "cluster" | "redis-cluster" | "redis_cluster" => Ok(BackendKind::Cluster),
            _ => Err(CacheError::Configuration(format!("Unknown cache backend: {s}"))),
        }
    }
}

/// How store, delete, batch delete and flush report failures
///
/// Enumeration and reads always return their errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationPolicy {
    /// Log the failure and return `Ok(())`
    #[default]
    BestEffort,
    /// Return the first failure to the caller
    FailFast,
}

impl MutationPolicy {
    /// Apply the policy to the outcome of a mutating operation
    pub(crate) fn settle(self, operation: &str, result: CacheResult<()>) -> CacheResult<()> {
        match (self, result) {
            (_, Ok(())) => Ok(()),
            (MutationPolicy::BestEffort, Err(e)) => {
                warn!(operation = operation, error = %e, "Cache mutation failed, continuing");
                Ok(())
            }
            (MutationPolicy::FailFast, Err(e)) => Err(e),
        }
    }
}

/// Connection parameters for the store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// `host:port`, or a full `redis://` / `rediss://` URL
    ///
    /// In cluster mode this is the seed node.
    pub address: String,
    pub password: Option<String>,
    /// Database index, ignored in cluster mode
    pub database: i64,
    /// Deadline for establishing the connection and the liveness probe; `0` disables it
    pub connect_timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:6379".to_string(),
            password: None,
            database: 0,
            connect_timeout_ms: 5000,
        }
    }
}

impl RedisConfig {
    fn is_url(&self) -> bool {
        self.address.starts_with("redis://") || self.address.starts_with("rediss://")
    }

    fn scheme(&self) -> &'static str {
        if self.address.starts_with("rediss://") {
            "rediss"
        } else {
            "redis"
        }
    }

    fn auth(&self) -> String {
        match &self.password {
            Some(pwd) if !pwd.is_empty() => format!(":{pwd}@"),
            _ => String::new(),
        }
    }

    /// URL for the standalone connection, including the database index
    pub fn connection_url(&self) -> String {
        if self.is_url() {
            return self.address.clone();
        }
        format!(
            "{}://{}{}/{}",
            self.scheme(),
            self.auth(),
            self.address,
            self.database
        )
    }

    /// URL for the cluster seed node (no database index)
    pub fn seed_url(&self) -> String {
        if self.is_url() {
            return self.address.clone();
        }
        format!("{}://{}{}", self.scheme(), self.auth(), self.address)
    }

    /// Connection settings for one cluster node at `host:port`
    ///
    /// Username, password, protocol and TLS mode come from the seed, whether
    /// they were given in the URL or through `password`.
    pub fn node_connection_info(&self, address: &str) -> CacheResult<ConnectionInfo> {
        let mut info = self.seed_url().into_connection_info().map_err(|e| {
            CacheError::Configuration(format!("Invalid redis.address {}: {e}", self.host()))
        })?;

        let (host, port) = address
            .rsplit_once(':')
            .and_then(|(host, port)| Some((host.to_string(), port.parse::<u16>().ok()?)))
            .ok_or_else(|| {
                CacheError::Topology(format!("Cluster node address is not host:port: {address}"))
            })?;

        info.addr = match info.addr {
            ConnectionAddr::Tcp(..) => ConnectionAddr::Tcp(host, port),
            ConnectionAddr::TcpTls {
                insecure,
                tls_params,
                ..
            } => ConnectionAddr::TcpTls {
                host,
                port,
                insecure,
                tls_params,
            },
            ConnectionAddr::Unix(_) => {
                return Err(CacheError::Configuration(
                    "Cluster seed must be a TCP address".to_string(),
                ))
            }
        };
        info.redis.db = 0;
        Ok(info)
    }

    /// Host part of the configured address
    pub fn host(&self) -> String {
        let rest = self
            .address
            .split_once("://")
            .map_or(self.address.as_str(), |(_, rest)| rest);
        let rest = rest.rsplit_once('@').map_or(rest, |(_, host)| host);
        let rest = rest.split('/').next().unwrap_or(rest);
        match rest.rsplit_once(':') {
            Some((host, _port)) => host.to_string(),
            None => rest.to_string(),
        }
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        millis(self.connect_timeout_ms)
    }
}

/// Bounds and tuning for cursor scans and cluster fan-out
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Batch-size hint used when a caller passes `0`
    pub default_count: usize,
    /// Round trips allowed per node and per pass; `0` means unbounded
    pub max_iterations: u64,
    /// Deadline for enumeration, batch delete and flush; `0` disables it
    pub operation_timeout_ms: u64,
    /// Masters scanned at once; `0` runs one task per master
    pub fanout_concurrency: usize,
    /// Batches buffered between per-master producers and the aggregator
    pub channel_capacity: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            default_count: 100,
            max_iterations: 1_000_000,
            operation_timeout_ms: 0,
            fanout_concurrency: 0,
            channel_capacity: 64,
        }
    }
}

impl ScanConfig {
    /// The batch-size hint to send for a caller-supplied `count`
    pub fn effective_count(&self, count: usize) -> usize {
        if count == 0 {
            self.default_count.max(1)
        } else {
            count
        }
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        millis(self.operation_timeout_ms)
    }

    /// Number of masters that may be scanned concurrently
    pub fn fanout_limit(&self, masters: usize) -> usize {
        match self.fanout_concurrency {
            0 => masters.max(1),
            limit => limit.min(masters.max(1)),
        }
    }
}

fn millis(ms: u64) -> Option<Duration> {
    (ms != 0).then(|| Duration::from_millis(ms))
}

/// Root configuration for the cache client
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: BackendKind,
    pub redis: RedisConfig,
    pub scan: ScanConfig,
    pub mutation_policy: MutationPolicy,
}

impl CacheConfig {
    /// Load from `SHARDCACHE_CONFIG` (if set) and `SHARDCACHE__*` variables
    pub fn load() -> CacheResult<Self> {
        ConfigLoader::from_env().load()
    }

    /// Defaults for a standalone node at `address`
    pub fn standalone(address: impl Into<String>) -> Self {
        Self {
            backend: BackendKind::Standalone,
            redis: RedisConfig {
                address: address.into(),
                ..RedisConfig::default()
            },
            ..Self::default()
        }
    }

    /// Defaults for a cluster seeded at `address`
    pub fn cluster(address: impl Into<String>) -> Self {
        Self {
            backend: BackendKind::Cluster,
            ..Self::standalone(address)
        }
    }

    pub fn with_mutation_policy(mut self, policy: MutationPolicy) -> Self {
        self.mutation_policy = policy;
        self
    }

    /// Reject values no backend can work with
    pub fn validate(&self) -> CacheResult<()> {
        if self.redis.address.trim().is_empty() {
            return Err(CacheError::Configuration(
                "redis.address must not be empty".to_string(),
            ));
        }
        if self.redis.database < 0 {
            return Err(CacheError::Configuration(format!(
                "redis.database must not be negative, got {}",
                self.redis.database
            )));
        }
        if self.scan.channel_capacity == 0 {
            return Err(CacheError::Configuration(
                "scan.channel_capacity must be greater than 0".to_string(),
            ));
        }
        if self.scan.default_count == 0 {
            return Err(CacheError::Configuration(
                "scan.default_count must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
