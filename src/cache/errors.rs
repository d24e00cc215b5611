//! Cache error types

use thiserror::Error;

/// Errors that can occur during cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backend has no live handle (never connected, or shut down)
    #[error("no client")]
    NoClient,

    /// `connect` was called on a backend that already holds a handle
    #[error("Cache client already connected")]
    AlreadyConnected,

    /// The requested key does not exist
    #[error("Cache key not found: {key}")]
    NotFound { key: String },

    /// Failed to connect to the cache backend
    #[error("Cache connection error: {0}")]
    Connection(String),

    /// Generic backend error
    #[error("Cache backend error: {0}")]
    Backend(String),

    /// Failed to serialize a cache value
    #[error("Cache serialization error: {0}")]
    Serialization(String),

    /// Cluster master discovery failed
    #[error("Cache topology error: {0}")]
    Topology(String),

    /// A cursor loop ran past its iteration budget
    #[error("Scan on {node} did not terminate after {iterations} iterations")]
    ScanDidNotTerminate { node: String, iterations: u64 },

    /// Cache operation timed out
    #[error("Cache operation timed out: {0}")]
    Timeout(String),

    /// A per-node worker was stopped before it finished
    #[error("Cache operation cancelled: {0}")]
    Cancelled(String),

    /// Configuration could not be loaded or validated
    #[error("Cache configuration error: {0}")]
    Configuration(String),
}

impl CacheError {
    /// True for a plain cache miss
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True for every error: a miss and an outage both leave the value unavailable.
    ///
    /// Callers written against the merged miss/outage behaviour can keep using
    /// this instead of matching on variants.
    pub fn is_unavailable(&self) -> bool {
        true
    }

    /// True when the failure came from the client not being connected
    pub fn is_no_client(&self) -> bool {
        matches!(self, Self::NoClient)
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        CacheError::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

impl From<config::ConfigError> for CacheError {
    fn from(e: config::ConfigError) -> Self {
        CacheError::Configuration(e.to_string())
    }
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
