//! Store nodes with injected faults, for driving the cluster fan-out
//! through its failure paths

use shardcache::cache::{
    ClusterTopology, MemoryCluster, MemoryNode, MemoryRouter, NodeConnection, ScanPage,
};
use shardcache::{CacheError, CacheResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Healthy,
    /// Every SCAN fails
    FailScan,
    /// SCAN never hands back cursor 0
    StuckCursor,
    /// Every SCAN waits before answering
    SlowScan(Duration),
    /// DEL, FLUSHDB and FLUSHALL fail
    FailWrites,
}

/// Tracks how many scans are running at once across a set of nodes
#[derive(Debug, Default)]
pub struct Occupancy {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Occupancy {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn enter(&self) -> OccupancyGuard<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        OccupancyGuard(self)
    }
}

struct OccupancyGuard<'a>(&'a Occupancy);

impl Drop for OccupancyGuard<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A [`MemoryNode`] that misbehaves according to its [`Fault`]
#[derive(Debug, Clone)]
pub struct FaultyNode {
    inner: MemoryNode,
    fault: Fault,
    scans: Arc<AtomicUsize>,
    occupancy: Arc<Occupancy>,
}

impl FaultyNode {
    pub fn new(inner: MemoryNode, fault: Fault) -> Self {
        Self::with_occupancy(inner, fault, Arc::new(Occupancy::default()))
    }

    pub fn with_occupancy(inner: MemoryNode, fault: Fault, occupancy: Arc<Occupancy>) -> Self {
        Self {
            inner,
            fault,
            scans: Arc::new(AtomicUsize::new(0)),
            occupancy,
        }
    }

    /// SCAN round trips started on this node so far
    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryNode {
        &self.inner
    }

    fn injected(&self, command: &str) -> CacheError {
        CacheError::Backend(format!("injected {command} failure on {}", self.inner.address()))
    }

    fn check_write(&self, command: &str) -> CacheResult<()> {
        if self.fault == Fault::FailWrites {
            return Err(self.injected(command));
        }
        Ok(())
    }
}

impl NodeConnection for FaultyNode {
    type Raw = MemoryNode;

    fn address(&self) -> &str {
        self.inner.address()
    }

    fn raw(&self) -> MemoryNode {
        self.inner.clone()
    }

    async fn ping(&self) -> CacheResult<()> {
        self.inner.ping().await
    }

    async fn set(&self, key: &str, payload: &[u8], expiry: Duration) -> CacheResult<()> {
        self.inner.set(key, payload, expiry).await
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
        key_type: Option<&str>,
    ) -> CacheResult<ScanPage> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        let _running = self.occupancy.enter();
        match self.fault {
            Fault::FailScan => Err(self.injected("SCAN")),
            Fault::StuckCursor => {
                let page = self.inner.scan(cursor, pattern, count, key_type).await?;
                Ok(ScanPage {
                    cursor: page.cursor.max(1),
                    keys: page.keys,
                })
            }
            Fault::SlowScan(delay) => {
                tokio::time::sleep(delay).await;
                self.inner.scan(cursor, pattern, count, key_type).await
            }
            Fault::Healthy | Fault::FailWrites => {
                self.inner.scan(cursor, pattern, count, key_type).await
            }
        }
    }

    async fn del(&self, keys: &[String]) -> CacheResult<u64> {
        self.check_write("DEL")?;
        self.inner.del(keys).await
    }

    async fn del_pipelined(&self, keys: &[String]) -> CacheResult<()> {
        self.check_write("DEL")?;
        self.inner.del_pipelined(keys).await
    }

    async fn flush_db(&self) -> CacheResult<()> {
        self.check_write("FLUSHDB")?;
        self.inner.flush_db().await
    }

    async fn flush_all(&self) -> CacheResult<()> {
        self.check_write("FLUSHALL")?;
        self.inner.flush_all().await
    }
}

/// A [`MemoryCluster`] whose masters are wrapped in [`FaultyNode`]s
///
/// Keys are still routed through the cluster's own router, so data written
/// through the cache lands on the same nodes the faulty wrappers scan.
#[derive(Debug, Clone)]
pub struct FaultyCluster {
    cluster: MemoryCluster,
    masters: Vec<FaultyNode>,
    occupancy: Arc<Occupancy>,
    discovery_fails: bool,
}

impl FaultyCluster {
    /// Wrap every master of `cluster`; `faults[i]` applies to master `i`,
    /// masters past the end of `faults` stay healthy
    pub fn new(cluster: MemoryCluster, faults: &[Fault]) -> Self {
        let occupancy = Arc::new(Occupancy::default());
        let masters = cluster
            .nodes()
            .into_iter()
            .enumerate()
            .map(|(i, node)| {
                let fault = faults.get(i).copied().unwrap_or(Fault::Healthy);
                FaultyNode::with_occupancy(node, fault, occupancy.clone())
            })
            .collect();
        Self {
            cluster,
            masters,
            occupancy,
            discovery_fails: false,
        }
    }

    /// Make every topology discovery fail
    pub fn failing_discovery(mut self) -> Self {
        self.discovery_fails = true;
        self
    }

    pub fn node(&self, index: usize) -> &FaultyNode {
        &self.masters[index]
    }

    pub fn cluster(&self) -> &MemoryCluster {
        &self.cluster
    }

    pub fn total_scans(&self) -> usize {
        self.masters.iter().map(FaultyNode::scans).sum()
    }

    pub fn occupancy(&self) -> &Occupancy {
        &self.occupancy
    }
}

impl ClusterTopology for FaultyCluster {
    type Router = MemoryRouter;
    type Node = FaultyNode;

    fn router(&self) -> &MemoryRouter {
        self.cluster.router()
    }

    async fn masters(&self) -> CacheResult<Vec<FaultyNode>> {
        if self.discovery_fails {
            return Err(CacheError::Topology(
                "injected CLUSTER SLOTS failure".to_string(),
            ));
        }
        Ok(self.masters.clone())
    }
}
