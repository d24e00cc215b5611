//! Per-endpoint command set shared by both backends
//!
//! A [`NodeConnection`] is one addressable store endpoint: the single node in
//! standalone mode, one shard master (or the key router) in cluster mode.
//! Both backends are written against this trait so the cursor loops and the
//! cluster fan-out do not care whether they talk to a live server or to the
//! in-process [`MemoryNode`](crate::cache::providers::MemoryNode).

use crate::cache::errors::{CacheError, CacheResult};
use redis::aio::ConnectionLike;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// One page of a cursor scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor to resume from; `0` means the pass is complete
    pub cursor: u64,
    /// Keys returned by this round trip
    pub keys: Vec<String>,
}

/// Commands a cache backend needs from a single store endpoint
///
/// Every method takes `&self`; implementations clone their (cheap,
/// multiplexed) connection per call so one node value can be shared by
/// concurrent callers.
pub trait NodeConnection: Clone + Send + Sync + 'static {
    /// Underlying connection object exposed through the raw handle
    type Raw: Clone + Send + Sync;

    /// Address used in log records and errors
    fn address(&self) -> &str;

    /// The underlying connection object
    fn raw(&self) -> Self::Raw;

    /// Liveness probe
    fn ping(&self) -> impl Future<Output = CacheResult<()>> + Send;

    /// Store `payload` under `key`; a zero `expiry` means the key never expires
    fn set(
        &self,
        key: &str,
        payload: &[u8],
        expiry: Duration,
    ) -> impl Future<Output = CacheResult<()>> + Send;

    /// Fetch the raw payload stored under `key`
    ///
    /// Returns `Ok(None)` on a miss.
    fn get(&self, key: &str) -> impl Future<Output = CacheResult<Option<String>>> + Send;

    /// One `SCAN` round trip, optionally restricted to keys of `key_type`
    fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
        key_type: Option<&str>,
    ) -> impl Future<Output = CacheResult<ScanPage>> + Send;

    /// Delete `keys` with a single multi-key command, returning how many existed
    fn del(&self, keys: &[String]) -> impl Future<Output = CacheResult<u64>> + Send;

    /// Delete `keys` with one command per key, sent as a single pipelined round trip
    fn del_pipelined(&self, keys: &[String]) -> impl Future<Output = CacheResult<()>> + Send;

    /// Remove every key in the selected database
    fn flush_db(&self) -> impl Future<Output = CacheResult<()>> + Send;

    /// Remove every key in every database
    fn flush_all(&self) -> impl Future<Output = CacheResult<()>> + Send;
}

/// A store endpoint reached through a redis-rs async connection
///
/// Works with `ConnectionManager`, `MultiplexedConnection` and the cluster
/// connection alike.
#[derive(Clone)]
pub struct RedisNode<C> {
    address: Arc<str>,
    connection: C,
}

impl<C> std::fmt::Debug for RedisNode<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisNode")
            .field("address", &self.address)
            .field("connection", &std::any::type_name::<C>())
            .finish()
    }
}

impl<C> RedisNode<C> {
    pub fn new(address: impl Into<Arc<str>>, connection: C) -> Self {
        Self {
            address: address.into(),
            connection,
        }
    }
}

/// Build a `SET` command with the expiry encoding the store expects
///
/// Whole seconds use `EX`, anything else `PX` (rounded up to 1 ms).
pub(crate) fn set_command(key: &str, payload: &[u8], expiry: Duration) -> redis::Cmd {
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(payload);
    if !expiry.is_zero() {
        if expiry.subsec_nanos() == 0 {
            cmd.arg("EX").arg(expiry.as_secs());
        } else {
            let millis = u64::try_from(expiry.as_millis()).unwrap_or(u64::MAX).max(1);
            cmd.arg("PX").arg(millis);
        }
    }
    cmd
}

impl<C> NodeConnection for RedisNode<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    type Raw = C;

    fn address(&self) -> &str {
        &self.address
    }

    fn raw(&self) -> C {
        self.connection.clone()
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.connection.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Connection(format!("PING {} failed: {e}", self.address)))?;

        if pong == "PONG" {
            Ok(())
        } else {
            Err(CacheError::Connection(format!(
                "unexpected PING reply from {}: {pong}",
                self.address
            )))
        }
    }

    async fn set(&self, key: &str, payload: &[u8], expiry: Duration) -> CacheResult<()> {
        let mut conn = self.connection.clone();
        let _: () = set_command(key, payload, expiry)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(format!("SET failed: {e}")))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(format!("GET failed: {e}")))?;
        Ok(value)
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
        key_type: Option<&str>,
    ) -> CacheResult<ScanPage> {
        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("SCAN");
        cmd.arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count);
        if let Some(key_type) = key_type {
            cmd.arg("TYPE").arg(key_type);
        }

        let (cursor, keys): (u64, Vec<String>) = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(format!("SCAN on {} failed: {e}", self.address)))?;

        Ok(ScanPage { cursor, keys })
    }

    async fn del(&self, keys: &[String]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection.clone();
        let removed: u64 = redis::cmd("DEL")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(format!("DEL failed: {e}")))?;
        Ok(removed)
    }

    async fn del_pipelined(&self, keys: &[String]) -> CacheResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection.clone();
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("DEL").arg(key).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await.map_err(|e| {
            CacheError::Backend(format!("pipelined DEL on {} failed: {e}", self.address))
        })?;
        Ok(())
    }

    async fn flush_db(&self) -> CacheResult<()> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("FLUSHDB")
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(format!("FLUSHDB on {} failed: {e}", self.address)))?;
        Ok(())
    }

    async fn flush_all(&self) -> CacheResult<()> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("FLUSHALL")
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                CacheError::Backend(format!("FLUSHALL on {} failed: {e}", self.address))
            })?;
        Ok(())
    }
}

/// Resumable cursor loop over one node
///
/// Each call to [`CursorScan::next_batch`] performs one round trip. The loop
/// ends when the node hands back cursor `0`; it fails with
/// [`CacheError::ScanDidNotTerminate`] once `max_iterations` round trips have
/// been spent without reaching the end (`0` disables the budget).
#[derive(Debug)]
pub struct CursorScan<N> {
    node: N,
    pattern: String,
    count: usize,
    key_type: Option<&'static str>,
    cursor: u64,
    iterations: u64,
    max_iterations: u64,
    finished: bool,
}

impl<N: NodeConnection> CursorScan<N> {
    pub fn new(node: N, pattern: impl Into<String>, count: usize, max_iterations: u64) -> Self {
        Self {
            node,
            pattern: pattern.into(),
            count,
            key_type: None,
            cursor: 0,
            iterations: 0,
            max_iterations,
            finished: false,
        }
    }

    /// Only return keys holding values of `key_type`
    pub fn with_type(mut self, key_type: &'static str) -> Self {
        self.key_type = Some(key_type);
        self
    }

    /// Round trips performed so far
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn node(&self) -> &N {
        &self.node
    }

    /// Fetch the next batch, or `None` once the pass is complete
    pub async fn next_batch(&mut self) -> CacheResult<Option<Vec<String>>> {
        if self.finished {
            return Ok(None);
        }
        if self.max_iterations != 0 && self.iterations >= self.max_iterations {
            return Err(CacheError::ScanDidNotTerminate {
                node: self.node.address().to_string(),
                iterations: self.iterations,
            });
        }

        let page = self
            .node
            .scan(self.cursor, &self.pattern, self.count, self.key_type)
            .await?;
        self.iterations += 1;
        self.cursor = page.cursor;
        if page.cursor == 0 {
            self.finished = true;
        }
        Ok(Some(page.keys))
    }
}
