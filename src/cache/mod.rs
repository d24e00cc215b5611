//! # Cache Module
//!
//! One cache contract over a single Redis node or a sharded Redis Cluster.
//!
//! ## Architecture
//!
//! ```text
//! CacheProvider (enum)                <- chosen from CacheConfig::backend
//!   ├── RedisCache<N>                 <- one node, local SCAN cursor loops
//!   └── RedisClusterCache<T>          <- key router + per-master fan-out
//!         └── ClusterTopology         <- CLUSTER SLOTS discovery on every call
//!
//! NodeConnection                      <- per-endpoint command set
//!   ├── RedisNode<C>                  <- any redis-rs async connection
//!   └── MemoryNode / MemoryRouter     <- in-process, for tests and benches
//! ```
//!
//! ## Behaviour
//!
//! - **Explicit lifecycle**: `new` → `connect` → use → `shutdown`; nothing is global
//! - **No client**: mutations are silent no-ops, reads fail with `NoClient`
//! - **Enumeration fails fast**: any node error aborts the call and cancels the other masters
//! - **Mutations follow `MutationPolicy`**: best effort (logged) by default
//! - **Bounded scans**: per-node iteration budget and optional per-call deadline

pub mod errors;
pub(crate) mod fanout;
pub mod node;
pub mod pattern;
pub mod provider;
pub mod providers;
pub mod traits;

pub use errors::{CacheError, CacheResult};
pub use node::{CursorScan, NodeConnection, RedisNode, ScanPage};
pub use provider::{CacheProvider, RawConnection};
pub use providers::{
    key_slot, ClusterTopology, MemoryCluster, MemoryNode, MemoryRouter, RedisCache,
    RedisClusterCache, RedisClusterTopology,
};
pub use traits::{CacheClient, CacheService};
