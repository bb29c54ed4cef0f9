//! Event directory: who owns an event and how private it is.
//!
//! Shards never own event metadata. They resolve it through this trait before
//! authorizing a transition.

use async_trait::async_trait;
use dashmap::DashMap;
use shard_types::{ApiError, Identity, Privacy};

/// Source of event ownership and privacy.
#[async_trait]
pub trait EventDirectory: Send + Sync + std::fmt::Debug {
    /// Resolve the owner and privacy of `event` within `group`.
    ///
    /// Returns `NotFound` if the event is unknown or belongs to another group.
    async fn owner_and_privacy(
        &self,
        event: &Identity,
        group: &Identity,
    ) -> Result<(Identity, Privacy), ApiError>;
}

/// An event known to the in-memory directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRecord {
    /// Group the event belongs to.
    pub group: Identity,
    /// Event owner.
    pub owner: Identity,
    /// Event privacy.
    pub privacy: Privacy,
}

/// In-memory event directory.
///
/// Used by the local node and by tests.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    events: DashMap<Identity, EventRecord>,
}

impl InMemoryDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace an event.
    pub fn register(&self, event: Identity, record: EventRecord) {
        self.events.insert(event, record);
    }

    /// Forget an event.
    pub fn remove(&self, event: &Identity) -> bool {
        self.events.remove(event).is_some()
    }

    /// Number of known events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether no events are known.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[async_trait]
impl EventDirectory for InMemoryDirectory {
    async fn owner_and_privacy(
        &self,
        event: &Identity,
        group: &Identity,
    ) -> Result<(Identity, Privacy), ApiError> {
        match self.events.get(event) {
            Some(record) if record.group == *group => Ok((record.owner, record.privacy)),
            _ => Err(ApiError::not_found(
                "EVENT_NOT_FOUND",
                format!("event {} not found in group {}", event, group),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_registered_event() {
        let directory = InMemoryDirectory::new();
        let event = Identity::random();
        let group = Identity::random();
        let owner = Identity::random();
        directory.register(
            event,
            EventRecord {
                group,
                owner,
                privacy: Privacy::Private,
            },
        );

        let (found_owner, privacy) = directory.owner_and_privacy(&event, &group).await.unwrap();
        assert_eq!(found_owner, owner);
        assert_eq!(privacy, Privacy::Private);
    }

    #[tokio::test]
    async fn wrong_group_is_not_found() {
        let directory = InMemoryDirectory::new();
        let event = Identity::random();
        directory.register(
            event,
            EventRecord {
                group: Identity::random(),
                owner: Identity::random(),
                privacy: Privacy::Public,
            },
        );

        let err = directory
            .owner_and_privacy(&event, &Identity::random())
            .await
            .unwrap_err();
        assert_eq!(err.tag(), Some("EVENT_NOT_FOUND"));
    }

    #[tokio::test]
    async fn removed_event_is_not_found() {
        let directory = InMemoryDirectory::new();
        let event = Identity::random();
        let group = Identity::random();
        directory.register(
            event,
            EventRecord {
                group,
                owner: Identity::random(),
                privacy: Privacy::Public,
            },
        );
        assert!(directory.remove(&event));
        assert!(directory.is_empty());
        assert!(directory.owner_and_privacy(&event, &group).await.is_err());
    }
}
