//! In-process shard cluster.
//!
//! `LocalCluster` hosts every child shard of one registry in the current
//! process. It is the registry's deployer (new shards are `ChildShard`
//! instances in a concurrent map) and its child client (requests are routed
//! straight to the shard, made as the registry).

use async_trait::async_trait;
use dashmap::DashMap;
use shard_child::{spawn_transfer_monitor, ChildConfig, ChildShard, EventDirectory, MonitorConfig};
use shard_parent::{ChildClient, ShardDeployer};
use shard_types::{ApiError, ChildModule, ChunkResponse, Identity, ShardInit, WasmVersion};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Shards of one registry, hosted in this process.
#[derive(Debug)]
pub struct LocalCluster {
    parent: Identity,
    config: ChildConfig,
    directory: Arc<dyn EventDirectory>,
    monitor: Option<MonitorConfig>,
    shards: DashMap<Identity, Arc<ChildShard>>,
    modules: DashMap<Identity, WasmVersion>,
    monitors: DashMap<Identity, JoinHandle<()>>,
}

impl LocalCluster {
    /// Create an empty cluster for the registry `parent`.
    pub fn new(parent: Identity, config: ChildConfig, directory: Arc<dyn EventDirectory>) -> Self {
        Self {
            parent,
            config,
            directory,
            monitor: None,
            shards: DashMap::new(),
            modules: DashMap::new(),
            monitors: DashMap::new(),
        }
    }

    /// Start a transfer monitor for every shard deployed from now on.
    pub fn with_monitor(mut self, config: MonitorConfig) -> Self {
        self.monitor = Some(config);
        self
    }

    /// Look up a hosted shard.
    pub fn shard(&self, principal: &Identity) -> Result<Arc<ChildShard>, ApiError> {
        self.shards
            .get(principal)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ApiError::not_found("UNKNOWN_CANISTER", format!("shard {} is not hosted here", principal)))
    }

    /// Every hosted shard, in no particular order.
    pub fn shards(&self) -> Vec<Arc<ChildShard>> {
        self.shards.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Module version installed on `principal`.
    pub fn installed_version(&self, principal: &Identity) -> Option<WasmVersion> {
        self.modules.get(principal).map(|entry| *entry.value())
    }

    /// Number of hosted shards.
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// Whether no shard is hosted.
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Stop all transfer monitors.
    pub fn shutdown(&self) {
        for entry in self.monitors.iter() {
            entry.value().abort();
        }
        self.monitors.clear();
    }
}

#[async_trait]
impl ShardDeployer for LocalCluster {
    async fn deploy(&self, module: &ChildModule, init: ShardInit) -> Result<Identity, ApiError> {
        if init.parent != self.parent {
            return Err(ApiError::unauthorized(
                "NOT_PARENT",
                "shards can only be deployed by the registry that owns this cluster",
            ));
        }

        let principal = Identity::random();
        let shard = Arc::new(ChildShard::new(
            principal,
            init,
            self.config.clone(),
            self.directory.clone(),
        )?);

        if let Some(config) = &self.monitor {
            self.monitors
                .insert(principal, spawn_transfer_monitor(shard.clone(), config.clone()));
        }
        self.modules.insert(principal, module.wasm_version);
        self.shards.insert(principal, shard);
        tracing::info!(shard = %principal, label = %module.label, "shard deployed");
        Ok(principal)
    }

    async fn upgrade(&self, shard: Identity, module: &ChildModule) -> Result<(), ApiError> {
        if !self.shards.contains_key(&shard) {
            return Err(ApiError::not_found(
                "UNKNOWN_CANISTER",
                format!("shard {} is not hosted here", shard),
            ));
        }
        self.modules.insert(shard, module.wasm_version);
        tracing::info!(shard = %shard, version = ?module.wasm_version, "shard module reinstalled");
        Ok(())
    }
}

#[async_trait]
impl ChildClient for LocalCluster {
    async fn chunked_join_data(
        &self,
        shard: Identity,
        event: Identity,
        chunk: u64,
        max_bytes: usize,
    ) -> Result<ChunkResponse, ApiError> {
        self.shard(&shard)?
            .get_chunked_join_data(self.parent, event, chunk, max_bytes)
            .await
    }

    async fn chunked_invite_data(
        &self,
        shard: Identity,
        event: Identity,
        chunk: u64,
        max_bytes: usize,
    ) -> Result<ChunkResponse, ApiError> {
        self.shard(&shard)?
            .get_chunked_invite_data(self.parent, event, chunk, max_bytes)
            .await
    }

    async fn attendees_count(
        &self,
        shard: Identity,
        events: Vec<Identity>,
    ) -> Result<Vec<(Identity, usize)>, ApiError> {
        Ok(self.shard(&shard)?.get_event_attendees_count(&events).await)
    }

    async fn invites_count(
        &self,
        shard: Identity,
        events: Vec<Identity>,
    ) -> Result<Vec<(Identity, usize)>, ApiError> {
        Ok(self.shard(&shard)?.get_event_invites_count(&events).await)
    }

    async fn close_shard(&self, shard: Identity) -> Result<u64, ApiError> {
        self.shard(&shard)?.close_for_writes(self.parent).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shard_child::InMemoryDirectory;

    fn module() -> ChildModule {
        ChildModule {
            label: "child".into(),
            bytes: vec![1],
            wasm_version: WasmVersion::Version(1),
            created_at: 0,
            updated_at: 0,
        }
    }

    fn cluster(parent: Identity) -> LocalCluster {
        LocalCluster::new(parent, ChildConfig::default(), Arc::new(InMemoryDirectory::new()))
    }

    #[tokio::test]
    async fn deploy_creates_shard_with_init_arguments() {
        let parent = Identity::random();
        let cluster = cluster(parent);
        let init = ShardInit {
            parent,
            name: "attendees".into(),
            start_index: 17,
        };

        let principal = cluster.deploy(&module(), init).await.unwrap();
        let shard = cluster.shard(&principal).unwrap();
        assert_eq!(shard.identity(), principal);
        assert_eq!(shard.parent(), parent);
        assert_eq!(shard.name(), "attendees");
        assert_eq!(shard.last_entry_index().await, 17);
        assert_eq!(cluster.installed_version(&principal), Some(WasmVersion::Version(1)));
        assert_eq!(cluster.len(), 1);
    }

    #[tokio::test]
    async fn deploy_rejects_foreign_parent() {
        let cluster = cluster(Identity::random());
        let init = ShardInit {
            parent: Identity::random(),
            name: "attendees".into(),
            start_index: 0,
        };
        let err = cluster.deploy(&module(), init).await.unwrap_err();
        assert_eq!(err.tag(), Some("NOT_PARENT"));
        assert!(cluster.is_empty());
    }

    #[tokio::test]
    async fn upgrade_records_version_and_keeps_state() {
        let parent = Identity::random();
        let cluster = cluster(parent);
        let principal = cluster
            .deploy(
                &module(),
                ShardInit {
                    parent,
                    name: "attendees".into(),
                    start_index: 0,
                },
            )
            .await
            .unwrap();
        let before = cluster.shard(&principal).unwrap();

        let mut next = module();
        next.wasm_version = WasmVersion::Version(2);
        cluster.upgrade(principal, &next).await.unwrap();

        assert!(Arc::ptr_eq(&before, &cluster.shard(&principal).unwrap()));
        assert_eq!(cluster.installed_version(&principal), Some(WasmVersion::Version(2)));

        let err = cluster.upgrade(Identity::random(), &next).await.unwrap_err();
        assert_eq!(err.tag(), Some("UNKNOWN_CANISTER"));
    }

    #[tokio::test]
    async fn client_reads_as_parent() {
        let parent = Identity::random();
        let cluster = cluster(parent);
        let principal = cluster
            .deploy(
                &module(),
                ShardInit {
                    parent,
                    name: "attendees".into(),
                    start_index: 0,
                },
            )
            .await
            .unwrap();

        let chunk = cluster
            .chunked_join_data(principal, Identity::random(), 0, 1024)
            .await
            .unwrap();
        assert_eq!(chunk.index, 0);
        assert_eq!(chunk.total_chunks, 1);

        let counts = cluster
            .attendees_count(principal, vec![Identity::random()])
            .await
            .unwrap();
        assert_eq!(counts[0].1, 0);
    }
}
