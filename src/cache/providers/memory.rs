//! In-process store nodes
//!
//! [`MemoryNode`] speaks the same [`NodeConnection`] command set as a live
//! Redis node: per-entry expiry, numbered databases, `SCAN` cursors that stay
//! valid while keys are added or removed, and `MATCH`/`TYPE` filtering.
//! [`MemoryCluster`] spreads keys over several such nodes by hash slot and
//! implements [`ClusterTopology`], so both backends can run without a server.

use crate::cache::errors::{CacheError, CacheResult};
use crate::cache::node::{NodeConnection, ScanPage};
use crate::cache::pattern::glob_match;
use crate::cache::providers::redis_cluster::ClusterTopology;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Number of hash slots in a Redis Cluster keyspace
pub const CLUSTER_SLOTS: u16 = 16384;

const STRING_TYPE: &str = "string";

#[derive(Debug, Clone)]
struct Entry {
    payload: Vec<u8>,
    kind: &'static str,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

type Database = HashMap<String, Entry>;

#[derive(Debug, Default)]
struct Store {
    databases: RwLock<HashMap<i64, Database>>,
}

/// A single in-process store node
///
/// Clones share the same data. [`MemoryNode::select`] returns a view of
/// another numbered database on the same node.
#[derive(Debug, Clone)]
pub struct MemoryNode {
    address: Arc<str>,
    database: i64,
    store: Arc<Store>,
}

impl MemoryNode {
    pub fn new(address: impl Into<Arc<str>>) -> Self {
        Self {
            address: address.into(),
            database: 0,
            store: Arc::new(Store::default()),
        }
    }

    /// The same node with database `database` selected
    pub fn select(&self, database: i64) -> Self {
        Self {
            address: self.address.clone(),
            database,
            store: self.store.clone(),
        }
    }

    pub fn database(&self) -> i64 {
        self.database
    }

    /// Store a key of a non-string type (its payload is not readable with GET)
    pub fn insert_typed(&self, key: &str, kind: &'static str) {
        self.write(|db| {
            db.insert(
                key.to_string(),
                Entry {
                    payload: Vec::new(),
                    kind,
                    expires_at: None,
                },
            );
        });
    }

    /// Live keys in the selected database, sorted
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let databases = self.store.databases.read();
        let mut keys: Vec<String> = databases
            .get(&self.database)
            .map(|db| {
                db.iter()
                    .filter(|(_, entry)| !entry.is_expired(now))
                    .map(|(key, _)| key.clone())
                    .collect()
            })
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Number of live keys in the selected database
    pub fn dbsize(&self) -> usize {
        self.keys().len()
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.store
            .databases
            .read()
            .get(&self.database)
            .and_then(|db| db.get(key))
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Run `f` against the selected database with expired entries purged
    fn write<T>(&self, f: impl FnOnce(&mut Database) -> T) -> T {
        let now = Instant::now();
        let mut databases = self.store.databases.write();
        let db = databases.entry(self.database).or_default();
        db.retain(|_, entry| !entry.is_expired(now));
        f(db)
    }

    fn drain(&self) -> Vec<(String, Entry)> {
        let now = Instant::now();
        let mut databases = self.store.databases.write();
        databases
            .get_mut(&self.database)
            .map(|db| {
                db.drain()
                    .filter(|(_, entry)| !entry.is_expired(now))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn insert_entry(&self, key: String, entry: Entry) {
        self.write(|db| {
            db.insert(key, entry);
        });
    }
}

/// Stable scan position of a key; never `0`, which is reserved for "pass complete"
fn scan_position(key: &str) -> u64 {
    // FNV-1a
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in key.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (hash >> 1).max(1)
}

impl NodeConnection for MemoryNode {
    type Raw = MemoryNode;

    fn address(&self) -> &str {
        &self.address
    }

    fn raw(&self) -> MemoryNode {
        self.clone()
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }

    async fn set(&self, key: &str, payload: &[u8], expiry: Duration) -> CacheResult<()> {
        let expires_at = (!expiry.is_zero()).then(|| Instant::now() + expiry);
        self.insert_entry(
            key.to_string(),
            Entry {
                payload: payload.to_vec(),
                kind: STRING_TYPE,
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let entry = self.write(|db| db.get(key).cloned());
        match entry {
            None => Ok(None),
            Some(entry) if entry.kind != STRING_TYPE => Err(CacheError::Backend(format!(
                "WRONGTYPE Operation against a key holding the wrong kind of value ({key})"
            ))),
            Some(entry) => Ok(Some(String::from_utf8_lossy(&entry.payload).into_owned())),
        }
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
        key_type: Option<&str>,
    ) -> CacheResult<ScanPage> {
        Ok(self.write(|db| {
            let mut positions: Vec<(u64, &String)> = db
                .keys()
                .map(|key| (scan_position(key), key))
                .filter(|(position, _)| *position >= cursor)
                .collect();
            positions.sort_unstable();

            // COUNT bounds the keys examined, not the keys returned; keys sharing
            // the boundary position are always examined together
            let mut end = positions.len().min(count.max(1));
            while end > 0 && end < positions.len() && positions[end].0 == positions[end - 1].0 {
                end += 1;
            }
            let next = positions.get(end).map_or(0, |(position, _)| *position);

            let keys = positions[..end]
                .iter()
                .filter(|(_, key)| glob_match(pattern, key))
                .filter(|(_, key)| key_type.map_or(true, |kind| db[key.as_str()].kind == kind))
                .map(|(_, key)| (*key).clone())
                .collect();

            ScanPage { cursor: next, keys }
        }))
    }

    async fn del(&self, keys: &[String]) -> CacheResult<u64> {
        Ok(self.write(|db| {
            keys.iter()
                .filter(|key| db.remove(key.as_str()).is_some())
                .count() as u64
        }))
    }

    async fn del_pipelined(&self, keys: &[String]) -> CacheResult<()> {
        self.del(keys).await.map(|_| ())
    }

    async fn flush_db(&self) -> CacheResult<()> {
        self.store.databases.write().remove(&self.database);
        Ok(())
    }

    async fn flush_all(&self) -> CacheResult<()> {
        self.store.databases.write().clear();
        Ok(())
    }
}

/// CRC16 (XMODEM) as used for cluster key hashing
fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for byte in data {
        crc ^= u16::from(*byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Hash slot owning `key`, honouring `{hash tags}`
pub fn key_slot(key: &str) -> u16 {
    let bytes = key.as_bytes();
    let hashed = bytes
        .iter()
        .position(|b| *b == b'{')
        .and_then(|open| {
            bytes[open + 1..]
                .iter()
                .position(|b| *b == b'}')
                .filter(|len| *len > 0)
                .map(|len| &bytes[open + 1..open + 1 + len])
        })
        .unwrap_or(bytes);
    crc16(hashed) % CLUSTER_SLOTS
}

#[derive(Debug, Default)]
struct ClusterState {
    masters: Vec<MemoryNode>,
    next_port: u16,
}

impl ClusterState {
    /// Owner of `key` when the slot space is split into equal contiguous ranges
    fn owner(&self, key: &str) -> Option<&MemoryNode> {
        if self.masters.is_empty() {
            return None;
        }
        let index = usize::from(key_slot(key)) * self.masters.len() / usize::from(CLUSTER_SLOTS);
        self.masters.get(index)
    }

    /// Move every key to the master that owns its slot under the current membership
    fn rebalance(&mut self, orphans: Vec<(String, Entry)>) {
        let mut entries = orphans;
        for master in &self.masters {
            entries.extend(master.drain());
        }
        for (key, entry) in entries {
            if let Some(owner) = self.owner(&key) {
                owner.insert_entry(key, entry);
            }
        }
    }
}

/// A set of in-process masters sharing one slot space
///
/// Key commands go through [`MemoryCluster::router`], which forwards them to
/// the owning master. Masters can be added or removed at any time; keys are
/// moved to their new owners immediately.
#[derive(Debug, Clone)]
pub struct MemoryCluster {
    state: Arc<RwLock<ClusterState>>,
    router: MemoryRouter,
}

impl MemoryCluster {
    /// A cluster of `masters` nodes addressed `127.0.0.1:7000`, `127.0.0.1:7001`, ...
    pub fn new(masters: usize) -> Self {
        let state = Arc::new(RwLock::new(ClusterState {
            masters: Vec::new(),
            next_port: 7000,
        }));
        let cluster = Self {
            router: MemoryRouter {
                state: state.clone(),
            },
            state,
        };
        for _ in 0..masters {
            cluster.add_master();
        }
        cluster
    }

    /// Current masters, in slot-range order
    pub fn nodes(&self) -> Vec<MemoryNode> {
        self.state.read().masters.clone()
    }

    /// The master currently owning `key`
    pub fn owner_of(&self, key: &str) -> Option<MemoryNode> {
        self.state.read().owner(key).cloned()
    }

    /// Add a master and reshard; returns its address
    pub fn add_master(&self) -> String {
        let mut state = self.state.write();
        let address = format!("127.0.0.1:{}", state.next_port);
        state.next_port = state.next_port.saturating_add(1);
        state.masters.push(MemoryNode::new(address.as_str()));
        state.rebalance(Vec::new());
        address
    }

    /// Remove the master at `address`, moving its keys to the remaining masters
    ///
    /// Returns `false` if no such master exists.
    pub fn remove_master(&self, address: &str) -> bool {
        let mut state = self.state.write();
        let Some(index) = state
            .masters
            .iter()
            .position(|master| master.address() == address)
        else {
            return false;
        };
        let removed = state.masters.remove(index);
        let orphans = removed.drain();
        state.rebalance(orphans);
        true
    }

    /// Live keys across every master, sorted
    pub fn all_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.nodes().iter().flat_map(MemoryNode::keys).collect();
        keys.sort();
        keys
    }
}

impl ClusterTopology for MemoryCluster {
    type Router = MemoryRouter;
    type Node = MemoryNode;

    fn router(&self) -> &MemoryRouter {
        &self.router
    }

    async fn masters(&self) -> CacheResult<Vec<MemoryNode>> {
        Ok(self.nodes())
    }
}

/// Key router of a [`MemoryCluster`]
///
/// Single-key commands reach the owning master. Node-scoped commands
/// (`SCAN`, `FLUSHDB`, `FLUSHALL`) are rejected, as they are meaningless
/// without picking a master.
#[derive(Debug, Clone)]
pub struct MemoryRouter {
    state: Arc<RwLock<ClusterState>>,
}

impl MemoryRouter {
    fn owner(&self, key: &str) -> CacheResult<MemoryNode> {
        self.state
            .read()
            .owner(key)
            .cloned()
            .ok_or_else(|| CacheError::Topology("cluster has no masters".to_string()))
    }

    fn not_routable(command: &str) -> CacheError {
        CacheError::Backend(format!("{command} cannot be routed without a target master"))
    }
}

impl NodeConnection for MemoryRouter {
    type Raw = MemoryRouter;

    fn address(&self) -> &str {
        "memory-cluster"
    }

    fn raw(&self) -> MemoryRouter {
        self.clone()
    }

    async fn ping(&self) -> CacheResult<()> {
        if self.state.read().masters.is_empty() {
            return Err(CacheError::Connection(
                "cluster has no masters".to_string(),
            ));
        }
        Ok(())
    }

    async fn set(&self, key: &str, payload: &[u8], expiry: Duration) -> CacheResult<()> {
        let owner = self.owner(key)?;
        owner.set(key, payload, expiry).await
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let owner = self.owner(key)?;
        owner.get(key).await
    }

    async fn scan(
        &self,
        _cursor: u64,
        _pattern: &str,
        _count: usize,
        _key_type: Option<&str>,
    ) -> CacheResult<ScanPage> {
        Err(Self::not_routable("SCAN"))
    }

    async fn del(&self, keys: &[String]) -> CacheResult<u64> {
        let mut removed = 0;
        for key in keys {
            let owner = self.owner(key)?;
            removed += owner.del(std::slice::from_ref(key)).await?;
        }
        Ok(removed)
    }

    async fn del_pipelined(&self, keys: &[String]) -> CacheResult<()> {
        self.del(keys).await.map(|_| ())
    }

    async fn flush_db(&self) -> CacheResult<()> {
        Err(Self::not_routable("FLUSHDB"))
    }

    async fn flush_all(&self) -> CacheResult<()> {
        Err(Self::not_routable("FLUSHALL"))
    }
}
