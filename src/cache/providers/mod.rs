//! Cache provider implementations

pub mod memory;
pub mod redis;
pub mod redis_cluster;

pub use self::memory::{key_slot, MemoryCluster, MemoryNode, MemoryRouter};
pub use self::redis::RedisCache;
pub use self::redis_cluster::{
    parse_cluster_slots, ClusterTopology, RedisClusterCache, RedisClusterTopology,
};

use crate::cache::errors::CacheResult;
use crate::config::MutationPolicy;
use serde::Serialize;
use tracing::warn;

/// Serialize a value for storage
///
/// Under [`MutationPolicy::BestEffort`] an unserializable value is logged and
/// stored as an empty payload.
pub(crate) fn encode_payload<V>(
    key: &str,
    value: &V,
    policy: MutationPolicy,
) -> CacheResult<Vec<u8>>
where
    V: Serialize + ?Sized,
{
    match serde_json::to_vec(value) {
        Ok(payload) => Ok(payload),
        Err(e) if policy == MutationPolicy::BestEffort => {
            warn!(key = key, error = %e, "Failed to serialize cache value, storing empty payload");
            Ok(Vec::new())
        }
        Err(e) => Err(e.into()),
    }
}
