//! # shard-parent
//!
//! Parent registry of the eventshard attendee store.
//!
//! The registry tracks every child shard, routes writes to the single open
//! shard, replaces it when it fills up, and answers reads that span shards:
//! - [`ShardRegistry`] - Descriptors, spawning, upgrades, fan-out reads
//! - [`ShardDeployer`] - How new shards get created and upgraded
//! - [`ChildClient`] - How the registry reads from its children

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregate;
pub mod client;
pub mod config;
pub mod deployer;
pub mod registry;

#[cfg(test)]
pub(crate) mod mock;

pub use client::ChildClient;
pub use config::ParentConfig;
pub use deployer::ShardDeployer;
pub use registry::ShardRegistry;
