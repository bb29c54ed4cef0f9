//! Module installation seam.
//!
//! The registry decides *when* a shard is created or upgraded. Creating the
//! shard and installing bytes on it belongs to the hosting runtime.

use async_trait::async_trait;
use shard_types::{ApiError, ChildModule, Identity, ShardInit};

/// Installs child modules on new or existing shards.
#[async_trait]
pub trait ShardDeployer: Send + Sync + std::fmt::Debug {
    /// Deploy `module` on a new shard with the given init arguments.
    ///
    /// Returns the identity of the new shard.
    async fn deploy(&self, module: &ChildModule, init: ShardInit) -> Result<Identity, ApiError>;

    /// Reinstall `module` on an existing shard, keeping its state.
    async fn upgrade(&self, shard: Identity, module: &ChildModule) -> Result<(), ApiError>;
}
