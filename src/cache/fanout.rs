//! Fan-out / fan-in across shard masters
//!
//! Enumeration runs one producer task per master on a [`JoinSet`] owned by a
//! coordinator task. Producers push scanned batches onto a bounded channel;
//! the caller's future is the only consumer and waits on three channels at
//! once: batches, a terminal error and a terminal success.
//!
//! The first producer failure raises a cancellation signal that every other
//! producer races against its in-flight round trip, and the coordinator waits
//! for all producers to stop before reporting the error. Dropping the
//! caller's future aborts the coordinator, which drops the `JoinSet` and the
//! cancellation sender, so the producers stop as well.

use crate::cache::errors::{CacheError, CacheResult};
use crate::cache::node::{CursorScan, NodeConnection};
use crate::config::MutationPolicy;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

/// Key type cluster scans are restricted to
pub(crate) const STRING_KEYS: &str = "string";

/// Bounds `fut` by `deadline` when one is configured
pub(crate) async fn with_deadline<T>(
    deadline: Option<Duration>,
    operation: &str,
    fut: impl Future<Output = CacheResult<T>>,
) -> CacheResult<T> {
    match deadline {
        None => fut.await,
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
            CacheError::Timeout(format!("{operation} exceeded {}ms", limit.as_millis()))
        })?,
    }
}

/// Parameters shared by every producer of one enumeration
#[derive(Debug, Clone)]
pub(crate) struct FanOut {
    pub pattern: Arc<str>,
    pub count: usize,
    pub max_iterations: u64,
    /// Producers allowed to scan at once
    pub concurrency: usize,
    pub channel_capacity: usize,
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl FanOut {
    /// Enumerate every string key matching the pattern on all `masters`
    pub(crate) async fn collect<N: NodeConnection>(
        self,
        masters: Vec<N>,
    ) -> CacheResult<Vec<String>> {
        if masters.is_empty() {
            return Ok(Vec::new());
        }

        let (batch_tx, mut batch_rx) = mpsc::channel::<Vec<String>>(self.channel_capacity.max(1));
        let (error_tx, mut error_rx) = oneshot::channel::<CacheError>();
        let (done_tx, mut done_rx) = oneshot::channel::<()>();
        let coordinator = self.coordinate(masters, batch_tx, error_tx, done_tx);
        let _coordinator = AbortOnDrop(tokio::spawn(coordinator));

        let mut found: HashSet<String> = HashSet::new();
        let mut error_open = true;
        let mut done_open = true;
        loop {
            tokio::select! {
                biased;
                Some(batch) = batch_rx.recv() => found.extend(batch),
                error = &mut error_rx, if error_open => match error {
                    Ok(e) => return Err(e),
                    Err(_) => error_open = false,
                },
                done = &mut done_rx, if done_open => match done {
                    Ok(()) => {
                        // producers have all returned, so every batch is already buffered
                        while let Ok(batch) = batch_rx.try_recv() {
                            found.extend(batch);
                        }
                        return Ok(found.into_iter().collect());
                    }
                    Err(_) => done_open = false,
                },
                else => {
                    return Err(CacheError::Backend(
                        "enumeration coordinator exited without a result".to_string(),
                    ));
                }
            }
        }
    }

    async fn coordinate<N: NodeConnection>(
        self,
        masters: Vec<N>,
        batches: mpsc::Sender<Vec<String>>,
        error_tx: oneshot::Sender<CacheError>,
        done_tx: oneshot::Sender<()>,
    ) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let permits = Arc::new(Semaphore::new(self.concurrency.max(1)));
        let mut producers = JoinSet::new();

        debug!(
            masters = masters.len(),
            pattern = %self.pattern,
            concurrency = self.concurrency,
            "Fanning out key scan"
        );
        for node in masters {
            producers.spawn(produce(
                node,
                self.clone(),
                batches.clone(),
                cancel_rx.clone(),
                permits.clone(),
            ));
        }
        drop(batches);

        while let Some(joined) = producers.join_next().await {
            let failure = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(join_error) => CacheError::Backend(format!("scan task failed: {join_error}")),
            };

            let _ = cancel_tx.send(true);
            producers.shutdown().await;
            debug!(error = %failure, "Key scan aborted, remaining masters cancelled");
            let _ = error_tx.send(failure);
            return;
        }

        let _ = done_tx.send(());
    }
}

/// Resolves once cancellation is requested or the coordinator is gone
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|stop| *stop).await;
}

fn stopped(address: &str) -> CacheError {
    CacheError::Cancelled(format!("scan on {address} stopped"))
}

async fn produce<N: NodeConnection>(
    node: N,
    fan_out: FanOut,
    batches: mpsc::Sender<Vec<String>>,
    mut cancel: watch::Receiver<bool>,
    permits: Arc<Semaphore>,
) -> CacheResult<()> {
    let address = node.address().to_string();
    let _permit = tokio::select! {
        biased;
        _ = cancelled(&mut cancel) => return Err(stopped(&address)),
        permit = permits.acquire_owned() => permit.map_err(|_| stopped(&address))?,
    };

    let mut scan = CursorScan::new(
        node,
        fan_out.pattern.as_ref(),
        fan_out.count,
        fan_out.max_iterations,
    )
    .with_type(STRING_KEYS);
    loop {
        let batch = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => return Err(stopped(&address)),
            batch = scan.next_batch() => batch?,
        };
        let Some(keys) = batch else {
            break;
        };
        if keys.is_empty() {
            continue;
        }
        tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => return Err(stopped(&address)),
            sent = batches.send(keys) => {
                if sent.is_err() {
                    return Err(stopped(&address));
                }
            }
        }
    }

    debug!(
        node = %address,
        pattern = %fan_out.pattern,
        iterations = scan.iterations(),
        "Master key scan complete"
    );
    Ok(())
}

/// Run `op` on every master, at most `limit` at a time
///
/// Every master runs to completion; outcomes are returned per address.
pub(crate) async fn for_each_master<N, F, Fut>(
    masters: Vec<N>,
    limit: usize,
    op: F,
) -> Vec<(String, CacheResult<()>)>
where
    N: NodeConnection,
    F: Fn(N) -> Fut,
    Fut: Future<Output = CacheResult<()>>,
{
    stream::iter(masters)
        .map(|node| {
            let address = node.address().to_string();
            let outcome = op(node);
            async move { (address, outcome.await) }
        })
        .buffer_unordered(limit.max(1))
        .collect()
        .await
}

/// Log every failed master and apply the mutation policy to the first failure
pub(crate) fn settle_masters(
    policy: MutationPolicy,
    operation: &str,
    outcomes: Vec<(String, CacheResult<()>)>,
) -> CacheResult<()> {
    let mut first = None;
    for (node, outcome) in outcomes {
        if let Err(e) = outcome {
            warn!(
                operation = operation,
                node = %node,
                error = %e,
                "Cache operation failed on master"
            );
            first.get_or_insert(e);
        }
    }
    match (policy, first) {
        (MutationPolicy::FailFast, Some(e)) => Err(e),
        _ => Ok(()),
    }
}
