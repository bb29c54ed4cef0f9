//! # shard-node
//!
//! In-process eventshard node.
//!
//! Hosts a registry and all of its child shards in one process:
//! - [`LocalCluster`] - Deploys shards and serves the registry's reads
//! - [`Router`] - Sends attendee writes to the right shard, with failover
//! - [`Node`] - Boots everything from a [`Config`]
//!
//! ## Architecture
//!
//! ```text
//! caller ──► Router ──► ShardRegistry (descriptors, spawning)
//!              │               │ deploy / chunked reads
//!              ▼               ▼
//!        ┌───────────────────────────────────┐
//!        │           LocalCluster            │
//!        │ shard 0 [0, k]  shard 1 [k+1, ..) │
//!        └───────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cluster;
pub mod config;
pub mod error;
pub mod node;
pub mod router;

pub use cluster::LocalCluster;
pub use config::{Config, ConfigError, EventSeed, NodeConfig};
pub use error::{NodeError, Result};
pub use node::Node;
pub use router::Router;
