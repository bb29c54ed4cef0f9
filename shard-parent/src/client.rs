//! Request/response access to child shards.
//!
//! Implementations send requests as the registry, so children accept the
//! parent-only chunked reads and the close handshake.

use async_trait::async_trait;
use shard_types::{ApiError, ChunkResponse, Identity};

/// Client used by the registry to talk to its children.
#[async_trait]
pub trait ChildClient: Send + Sync + std::fmt::Debug {
    /// One chunk of the encoded attendee list of `event` on `shard`.
    async fn chunked_join_data(
        &self,
        shard: Identity,
        event: Identity,
        chunk: u64,
        max_bytes: usize,
    ) -> Result<ChunkResponse, ApiError>;

    /// One chunk of the encoded invite list of `event` on `shard`.
    async fn chunked_invite_data(
        &self,
        shard: Identity,
        event: Identity,
        chunk: u64,
        max_bytes: usize,
    ) -> Result<ChunkResponse, ApiError>;

    /// Joined attendee counts per event on `shard`, in the order given.
    async fn attendees_count(
        &self,
        shard: Identity,
        events: Vec<Identity>,
    ) -> Result<Vec<(Identity, usize)>, ApiError>;

    /// Invite counts per event on `shard`, in the order given.
    async fn invites_count(
        &self,
        shard: Identity,
        events: Vec<Identity>,
    ) -> Result<Vec<(Identity, usize)>, ApiError>;

    /// Tell `shard` its range is closed. Returns its last entry index.
    async fn close_shard(&self, shard: Identity) -> Result<u64, ApiError>;
}
