//! # Resilience Module
//!
//! Retry support for callers of the cache client. The cache operations
//! themselves never retry; a service that wants retries wraps the call:
//!
//! ```rust,no_run
//! use shardcache::resilience::{retry, Attempt, RetryPolicy};
//! use shardcache::{CacheConfig, CacheProvider};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = RetryPolicy::new(5, Duration::from_millis(200));
//! let cache = retry(&policy, |_attempt| async {
//!     CacheProvider::connect_from_config(CacheConfig::load().map_err(Attempt::Abort)?)
//!         .await
//!         .map_err(Attempt::Retry)
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod retry;

pub use retry::{retry, Attempt, RetryError, RetryPolicy};
