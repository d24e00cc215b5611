//! Cache service trait definition

use super::errors::CacheResult;
use serde::Serialize;
use std::time::Duration;

/// Trait defining cache operations
///
/// Implemented by the standalone and cluster backends and by
/// [`CacheProvider`](crate::CacheProvider), which dispatches to one of them.
/// Callers see the same behaviour whichever topology sits underneath.
///
/// Before `connect` (or after `shutdown`) mutating operations are silent
/// no-ops, while reads, enumeration and [`CacheService::client`] fail with
/// [`CacheError::NoClient`](super::CacheError::NoClient).
pub trait CacheService: Send + Sync {
    /// Underlying connection object exposed through [`CacheClient`]
    type Handle: Clone + Send + Sync;

    /// Serialize `value` to JSON and store it under `key`
    ///
    /// A zero `expiry` stores the key without expiry.
    fn cache_by_key<V>(
        &self,
        key: &str,
        value: &V,
        expiry: Duration,
    ) -> impl std::future::Future<Output = CacheResult<()>> + Send
    where
        V: Serialize + Sync + ?Sized;

    /// Get the raw stored payload for `key`
    ///
    /// A miss is `Err(CacheError::NotFound)`, never `Ok` with an empty string.
    fn get_by_key(&self, key: &str)
        -> impl std::future::Future<Output = CacheResult<String>> + Send;

    /// Every key matching the glob `pattern`, across the whole store
    ///
    /// `count` is the per-round-trip batch-size hint (`0` uses the configured
    /// default). The result is unordered and free of duplicates; any node
    /// failure fails the whole call.
    fn get_keys_by_pattern(
        &self,
        pattern: &str,
        count: usize,
    ) -> impl std::future::Future<Output = CacheResult<Vec<String>>> + Send;

    /// Delete a specific key; deleting an absent key is not an error
    fn delete_key(&self, key: &str) -> impl std::future::Future<Output = CacheResult<()>> + Send;

    /// Delete all keys matching a pattern, one scanned batch at a time
    ///
    /// Not atomic: a failure part-way leaves the pattern partially deleted.
    fn batch_delete_by_pattern(
        &self,
        pattern: &str,
        count: usize,
    ) -> impl std::future::Future<Output = CacheResult<()>> + Send;

    /// Remove every key in the active database (every master in cluster mode)
    fn flush_db(&self) -> impl std::future::Future<Output = CacheResult<()>> + Send;

    /// Remove every key in every database (every master in cluster mode)
    fn flush_all(&self) -> impl std::future::Future<Output = CacheResult<()>> + Send;

    /// The raw, backend-tagged connection handle
    fn client(&self) -> CacheResult<CacheClient<Self::Handle>>;

    /// Whether a live handle is held
    fn is_connected(&self) -> bool;

    /// Get the name of the cache provider
    fn provider_name(&self) -> &'static str;
}

/// Backend-tagged raw connection handle
///
/// For callers that need commands the [`CacheService`] contract does not
/// cover.
#[derive(Debug, Clone)]
pub struct CacheClient<H> {
    is_cluster: bool,
    connection: H,
}

impl<H> CacheClient<H> {
    pub fn standalone(connection: H) -> Self {
        Self {
            is_cluster: false,
            connection,
        }
    }

    pub fn cluster(connection: H) -> Self {
        Self {
            is_cluster: true,
            connection,
        }
    }

    pub fn is_cluster(&self) -> bool {
        self.is_cluster
    }

    pub fn connection(&self) -> &H {
        &self.connection
    }

    pub fn into_connection(self) -> H {
        self.connection
    }

    /// Convert the connection while keeping the cluster tag
    pub fn map<U>(self, f: impl FnOnce(H) -> U) -> CacheClient<U> {
        CacheClient {
            is_cluster: self.is_cluster,
            connection: f(self.connection),
        }
    }
}
