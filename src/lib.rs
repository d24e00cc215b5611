#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

//! # shardcache
//!
//! Shared cache client for network services: store, read, enumerate and
//! delete keys through one contract whether the cache is a single Redis node
//! or a Redis Cluster.
//!
//! ## Module Organization
//!
//! - [`cache`] - The cache contract, both backends and the client factory
//! - [`config`] - Layered configuration (defaults, file, environment)
//! - [`logging`] - Structured logging setup and cache operation records
//! - [`resilience`] - Fixed-backoff retry helper for callers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shardcache::{CacheConfig, CacheProvider, CacheService};
//! use std::time::Duration;
//!
//! # async fn example() -> shardcache::CacheResult<()> {
//! shardcache::logging::init_structured_logging();
//!
//! let mut cache = CacheProvider::new(CacheConfig::cluster("10.0.0.1:7000"));
//! cache.connect().await?;
//!
//! let payload = serde_json::json!({"total": 12});
//! cache.cache_by_key("order:9", &payload, Duration::from_secs(300)).await?;
//! let order = cache.get_by_key("order:9").await?;
//! let users = cache.get_keys_by_pattern("user:*", 100).await?;
//! cache.batch_delete_by_pattern("session:*", 100).await?;
//!
//! cache.shutdown();
//! # let _ = (order, users);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod logging;
pub mod resilience;

pub use cache::{CacheClient, CacheError, CacheProvider, CacheResult, CacheService};
pub use config::CacheConfig;
