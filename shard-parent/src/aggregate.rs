//! Cross-shard reads.
//!
//! Every shard is asked in parallel; lists are pulled chunk by chunk into a
//! [`ChunkBuffer`], decoded, and concatenated in shard start order before
//! paging. A shard that fails is logged and contributes nothing.

use crate::registry::ShardRegistry;
use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use shard_core::{page, ChunkBuffer};
use shard_types::{
    codec, ApiError, ChunkResponse, Identity, InviteAttendeeResponse, JoinedAttendeeResponse,
    PagedResponse,
};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventList {
    Joined,
    Invites,
}

impl EventList {
    fn name(self) -> &'static str {
        match self {
            EventList::Joined => "joined",
            EventList::Invites => "invites",
        }
    }
}

impl ShardRegistry {
    /// Joined attendees of `event` across all shards, paged.
    pub async fn get_members(
        &self,
        event: Identity,
        limit: usize,
        page_number: usize,
    ) -> Result<PagedResponse<JoinedAttendeeResponse>, ApiError> {
        let members = self.collect(EventList::Joined, event).await;
        page(members, page_number, limit).map_err(|err| err.at(format!("{}/get_members", self.config.name)))
    }

    /// Pending invites of `event` across all shards, paged.
    pub async fn get_invites(
        &self,
        event: Identity,
        limit: usize,
        page_number: usize,
    ) -> Result<PagedResponse<InviteAttendeeResponse>, ApiError> {
        let invites = self.collect(EventList::Invites, event).await;
        page(invites, page_number, limit).map_err(|err| err.at(format!("{}/get_invites", self.config.name)))
    }

    /// Joined attendee counts per event, summed over all shards.
    pub async fn get_members_count(&self, events: &[Identity]) -> Vec<(Identity, usize)> {
        self.sum_counts(EventList::Joined, events).await
    }

    /// Invite counts per event, summed over all shards.
    pub async fn get_invites_count(&self, events: &[Identity]) -> Vec<(Identity, usize)> {
        self.sum_counts(EventList::Invites, events).await
    }

    async fn shard_order(&self) -> Vec<Identity> {
        self.state
            .read()
            .await
            .ordered()
            .into_iter()
            .map(|d| d.principal)
            .collect()
    }

    async fn collect<T: DeserializeOwned>(&self, list: EventList, event: Identity) -> Vec<T> {
        let shards = self.shard_order().await;
        let fetches = shards.iter().map(|shard| self.fetch_list::<T>(*shard, list, event));
        let results = join_all(fetches).await;

        let mut merged = Vec::new();
        for (shard, result) in shards.iter().zip(results) {
            match result {
                Ok(mut items) => merged.append(&mut items),
                Err(err) => {
                    tracing::warn!(shard = %shard, list = list.name(), error = %err, "skipping shard in fan-out read")
                }
            }
        }
        merged
    }

    async fn fetch_chunk(
        &self,
        shard: Identity,
        list: EventList,
        event: Identity,
        chunk: u64,
    ) -> Result<ChunkResponse, ApiError> {
        let max_bytes = self.config.fanout_chunk_bytes;
        match list {
            EventList::Joined => self.client.chunked_join_data(shard, event, chunk, max_bytes).await,
            EventList::Invites => self.client.chunked_invite_data(shard, event, chunk, max_bytes).await,
        }
    }

    async fn fetch_list<T: DeserializeOwned>(
        &self,
        shard: Identity,
        list: EventList,
        event: Identity,
    ) -> Result<Vec<T>, ApiError> {
        let first = self.fetch_chunk(shard, list, event, 0).await?;
        let total = first.total_chunks;

        let mut buffer = ChunkBuffer::new(self.config.fanout_chunk_bytes)?;
        buffer.expect_total(total)?;
        buffer.assemble(first.index, first.bytes)?;

        for index in 1..total {
            let next = self.fetch_chunk(shard, list, event, index).await?;
            if next.total_chunks != total {
                return Err(ApiError::bad_request(
                    "LIST_CHANGED",
                    format!(
                        "shard list went from {} to {} chunks during the read",
                        total, next.total_chunks
                    ),
                ));
            }
            buffer.assemble(next.index, next.bytes)?;
        }

        let payload = buffer.finalize()?;
        codec::decode(&payload.bytes)
    }

    async fn sum_counts(&self, list: EventList, events: &[Identity]) -> Vec<(Identity, usize)> {
        let shards = self.shard_order().await;
        let fetches = shards.iter().map(|shard| {
            let events = events.to_vec();
            async move {
                match list {
                    EventList::Joined => self.client.attendees_count(*shard, events).await,
                    EventList::Invites => self.client.invites_count(*shard, events).await,
                }
            }
        });

        let mut totals: BTreeMap<Identity, usize> = events.iter().map(|e| (*e, 0)).collect();
        for (shard, result) in shards.iter().zip(join_all(fetches).await) {
            match result {
                Ok(counts) => {
                    for (event, count) in counts {
                        if let Some(total) = totals.get_mut(&event) {
                            *total += count;
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(shard = %shard, list = list.name(), error = %err, "skipping shard in count")
                }
            }
        }
        events.iter().map(|e| (*e, totals[e])).collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ParentConfig;
    use crate::registry::tests::{booted, booted_with};
    use shard_types::{ApiError, Identity, InviteAttendeeResponse, InviteType, JoinedAttendeeResponse};

    fn id(kind: &str, n: u64) -> Identity {
        Identity::derive(&Identity::ANONYMOUS, kind, n)
    }

    fn member(event: Identity, n: u64) -> JoinedAttendeeResponse {
        JoinedAttendeeResponse {
            event,
            group: id("group", 0),
            attendee_identifier: id("entry", n),
            principal: id("member", n),
        }
    }

    #[tokio::test]
    async fn members_are_concatenated_in_shard_order() {
        let (f, first) = booted().await;
        let second = f
            .registry
            .close_child_canister_and_spawn_sibling(first, 9, Vec::new())
            .await
            .unwrap();
        let event = Identity::random();

        f.client.set_joined(second, event, vec![member(event, 10), member(event, 11)]);
        f.client.set_joined(first, event, vec![member(event, 0), member(event, 1), member(event, 2)]);

        let all = f.registry.get_members(event, 10, 0).await.unwrap();
        assert_eq!(all.total, 5);
        assert_eq!(all.number_of_pages, 1);
        let order: Vec<_> = all.data.iter().map(|m| m.principal).collect();
        let expected: Vec<_> = [0, 1, 2, 10, 11]
            .iter()
            .map(|n| id("member", *n))
            .collect();
        assert_eq!(order, expected);

        let second_page = f.registry.get_members(event, 2, 1).await.unwrap();
        assert_eq!(second_page.number_of_pages, 3);
        assert_eq!(second_page.data, vec![member(event, 2), member(event, 10)]);

        let past_end = f.registry.get_members(event, 2, 3).await.unwrap();
        assert!(past_end.data.is_empty());
        assert_eq!(past_end.total, 5);
    }

    #[tokio::test]
    async fn large_lists_are_pulled_in_several_chunks() {
        let config = ParentConfig {
            fanout_chunk_bytes: 64,
            ..ParentConfig::default()
        };
        let (f, first) = booted_with(config).await;
        let event = Identity::random();
        let members: Vec<_> = (0..50).map(|n| member(event, n)).collect();
        f.client.set_joined(first, event, members.clone());

        let before = f.client.requests();
        let all = f.registry.get_members(event, 100, 0).await.unwrap();
        assert_eq!(all.data, members);
        assert!(f.client.requests() - before > 1);
    }

    #[tokio::test]
    async fn failing_shard_is_skipped() {
        let (f, first) = booted().await;
        let second = f
            .registry
            .close_child_canister_and_spawn_sibling(first, 4, Vec::new())
            .await
            .unwrap();
        let event = Identity::random();
        f.client.set_joined(first, event, vec![member(event, 0)]);
        f.client.set_joined(second, event, vec![member(event, 5)]);
        f.client.fail_shard(first);

        let all = f.registry.get_members(event, 10, 0).await.unwrap();
        assert_eq!(all.data, vec![member(event, 5)]);
    }

    #[tokio::test]
    async fn zero_limit_is_rejected() {
        let (f, _) = booted().await;
        let err = f.registry.get_invites(Identity::random(), 0, 0).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
        assert_eq!(err.tag(), Some("INVALID_LIMIT"));
    }

    #[tokio::test]
    async fn invites_and_counts_span_shards() {
        let (f, first) = booted().await;
        let second = f
            .registry
            .close_child_canister_and_spawn_sibling(first, 4, Vec::new())
            .await
            .unwrap();
        let event = Identity::random();
        let other = Identity::random();
        let invite = |n: u64| InviteAttendeeResponse {
            event,
            group: id("group", 0),
            attendee_identifier: id("entry", n),
            principal: id("member", n),
            invite_type: InviteType::OwnerRequest,
        };
        f.client.set_invites(first, event, vec![invite(1)]);
        f.client.set_invites(second, event, vec![invite(7), invite(8)]);
        f.client.set_joined(second, other, vec![member(other, 3)]);

        let invites = f.registry.get_invites(event, 10, 0).await.unwrap();
        assert_eq!(invites.data, vec![invite(1), invite(7), invite(8)]);

        assert_eq!(
            f.registry.get_invites_count(&[event, other]).await,
            vec![(event, 3), (other, 0)]
        );
        assert_eq!(
            f.registry.get_members_count(&[event, other]).await,
            vec![(event, 0), (other, 1)]
        );
    }
}
