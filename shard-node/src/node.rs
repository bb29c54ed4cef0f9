//! Node assembly: directory, cluster, registry and router wired together.

use crate::cluster::LocalCluster;
use crate::config::Config;
use crate::error::{NodeError, Result};
use crate::router::Router;
use shard_child::InMemoryDirectory;
use shard_parent::ShardRegistry;
use shard_types::Identity;
use std::sync::Arc;

/// A running node.
#[derive(Debug)]
pub struct Node {
    /// Event directory shared by every shard.
    pub directory: Arc<InMemoryDirectory>,
    /// Shards hosted in this process.
    pub cluster: Arc<LocalCluster>,
    /// The registry owning those shards.
    pub registry: Arc<ShardRegistry>,
    /// Write router.
    pub router: Router,
}

/// Module uploaded when the config names none.
fn builtin_module() -> Vec<u8> {
    format!("eventshard-child {}", env!("CARGO_PKG_VERSION")).into_bytes()
}

impl Node {
    /// Boot a node from `config`.
    ///
    /// Seeds the directory, uploads the child module and deploys the first
    /// shard. Transfer monitors start with each shard when enabled.
    pub async fn start(config: &Config) -> Result<Self> {
        let directory = Arc::new(InMemoryDirectory::new());
        for (event, record) in config.event_records()? {
            directory.register(event, record);
        }

        let module = match &config.node.module_path {
            Some(path) => tokio::fs::read(path).await?,
            None => builtin_module(),
        };

        let identity = Identity::random();
        let cluster = Arc::new(
            LocalCluster::new(identity, config.child.clone(), directory.clone())
                .with_monitor(config.monitor.clone()),
        );
        let registry = Arc::new(ShardRegistry::new(
            identity,
            config.parent.clone(),
            cluster.clone(),
            cluster.clone(),
        ));

        registry.upload_child_module(module).await?;
        if registry.initialize_first_child().await?.is_none() {
            return Err(NodeError::NoChildModule);
        }

        tracing::info!(
            node = %config.node.name,
            registry = %identity,
            events = directory.len(),
            "node started"
        );

        Ok(Self {
            router: Router::new(registry.clone(), cluster.clone()),
            directory,
            cluster,
            registry,
        })
    }

    /// Stop background tasks.
    pub fn shutdown(&self) {
        self.cluster.shutdown();
        tracing::info!(registry = %self.registry.identity(), "node stopped");
    }
}
