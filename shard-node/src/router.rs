//! Write routing with capacity failover.
//!
//! New attendees go to the registry's open shard. When that shard answers
//! `CanisterAtCapacity`, the router asks the registry to close it and spawn a
//! sibling, then retries the write once there. Attendees that already have a
//! record are routed to the shard holding it.

use crate::cluster::LocalCluster;
use dashmap::DashMap;
use shard_child::ChildShard;
use shard_parent::ShardRegistry;
use shard_types::{ApiError, Identity};
use std::future::Future;
use std::sync::Arc;

/// Routes attendee operations to the right shard.
#[derive(Debug)]
pub struct Router {
    registry: Arc<ShardRegistry>,
    cluster: Arc<LocalCluster>,
    homes: DashMap<Identity, Identity>,
}

impl Router {
    /// Create a router over `registry` and the cluster hosting its shards.
    pub fn new(registry: Arc<ShardRegistry>, cluster: Arc<LocalCluster>) -> Self {
        Self {
            registry,
            cluster,
            homes: DashMap::new(),
        }
    }

    /// The registry this router asks for shards.
    pub fn registry(&self) -> &Arc<ShardRegistry> {
        &self.registry
    }

    /// Run `op` on the open shard, failing over once when it is full.
    pub async fn with_available_shard<T, F, Fut>(&self, caller: Identity, op: F) -> Result<T, ApiError>
    where
        F: Fn(Arc<ChildShard>) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let available = self.registry.get_available_canister(caller).await?;
        let shard = self.cluster.shard(&available.principal)?;

        match op(shard.clone()).await {
            Err(ApiError::CanisterAtCapacity(details)) => {
                tracing::info!(shard = %shard.identity(), tag = %details.tag, "shard full, spawning sibling");
                let last_entry_index = shard.last_entry_index().await;
                let sibling = self
                    .registry
                    .close_child_canister_and_spawn_sibling(shard.identity(), last_entry_index, Vec::new())
                    .await?;
                op(self.cluster.shard(&sibling)?).await
            }
            other => other,
        }
    }

    /// Shard holding `attendee`'s record, if any.
    pub async fn locate(&self, attendee: Identity) -> Option<Arc<ChildShard>> {
        if let Some(home) = self.homes.get(&attendee).map(|entry| *entry.value()) {
            if let Ok(shard) = self.cluster.shard(&home) {
                return Some(shard);
            }
        }

        for descriptor in self.registry.get_canisters().await {
            let Ok(shard) = self.cluster.shard(&descriptor.principal) else {
                continue;
            };
            if shard.holds(&attendee).await {
                self.homes.insert(attendee, descriptor.principal);
                return Some(shard);
            }
        }
        None
    }

    /// Run `op` for `attendee`: on their shard if they have a record,
    /// otherwise on the open shard with capacity failover.
    pub async fn route<T, F, Fut>(&self, attendee: Identity, op: F) -> Result<T, ApiError>
    where
        F: Fn(Arc<ChildShard>) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        match self.locate(attendee).await {
            Some(shard) => op(shard).await,
            None => self.with_available_shard(attendee, op).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shard_child::{ChildConfig, EventRecord, InMemoryDirectory};
    use shard_parent::ParentConfig;
    use shard_types::Privacy;

    struct Fixture {
        router: Router,
        registry: Arc<ShardRegistry>,
        group: Identity,
        event: Identity,
    }

    async fn fixture(max_entries: usize) -> Fixture {
        let directory = Arc::new(InMemoryDirectory::new());
        let owner = Identity::random();
        let group = Identity::random();
        let event = Identity::random();
        directory.register(
            event,
            EventRecord {
                group,
                owner,
                privacy: Privacy::Public,
            },
        );

        let parent = Identity::random();
        let config = ChildConfig {
            max_entries,
            ..ChildConfig::default()
        };
        let cluster = Arc::new(LocalCluster::new(parent, config, directory));
        let registry = Arc::new(ShardRegistry::new(
            parent,
            ParentConfig::default(),
            cluster.clone(),
            cluster.clone(),
        ));
        registry.upload_child_module(vec![1]).await.unwrap();
        registry.initialize_first_child().await.unwrap();

        Fixture {
            router: Router::new(registry.clone(), cluster),
            registry,
            group,
            event,
        }
    }

    #[tokio::test]
    async fn full_shard_fails_over_to_sibling() {
        let f = fixture(2).await;
        let (group, event) = (f.group, f.event);

        for _ in 0..3 {
            let attendee = Identity::random();
            f.router
                .route(attendee, |shard| async move { shard.join_event(attendee, group, event).await })
                .await
                .unwrap();
        }

        let shards = f.registry.get_canisters().await;
        assert_eq!(shards.len(), 2);
        assert_eq!(shards[0].entry_range.start, 0);
        assert_eq!(shards[0].entry_range.end, Some(1));
        assert_eq!(shards[1].entry_range.start, 2);
        assert!(shards[1].accepts_writes());
        assert!(f.router.cluster.shard(&shards[0].principal).unwrap().is_closed().await);
        assert!(!f.router.cluster.shard(&shards[1].principal).unwrap().is_closed().await);

        let members = f.registry.get_members(event, 10, 0).await.unwrap();
        assert_eq!(members.total, 3);
    }

    #[tokio::test]
    async fn existing_attendee_stays_on_their_shard() {
        let f = fixture(1).await;
        let (group, event) = (f.group, f.event);
        let first = Identity::random();
        let second = Identity::random();

        for attendee in [first, second] {
            f.router
                .route(attendee, |shard| async move { shard.join_event(attendee, group, event).await })
                .await
                .unwrap();
        }

        let home = f.router.locate(first).await.unwrap();
        f.router
            .route(first, |shard| async move { shard.leave_event(first, event).await })
            .await
            .unwrap();

        assert_eq!(home.identity(), f.registry.get_canisters().await[0].principal);
        assert!(home.get_attending_from_principal(first).await.unwrap().is_empty());
        assert!(f.router.locate(Identity::random()).await.is_none());
    }

    #[tokio::test]
    async fn non_capacity_errors_are_not_retried() {
        let f = fixture(10).await;
        let attendee = Identity::random();
        let err = f
            .router
            .with_available_shard(attendee, |shard| async move {
                shard.join_event(attendee, Identity::random(), Identity::random()).await
            })
            .await
            .unwrap_err();
        assert_eq!(err.tag(), Some("EVENT_NOT_FOUND"));
        assert_eq!(f.registry.get_canisters().await.len(), 1);
    }
}
