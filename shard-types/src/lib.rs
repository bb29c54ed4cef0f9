//! # shard-types
//!
//! Domain and wire types for the eventshard attendee store.
//!
//! This crate provides the foundational types used across all eventshard crates:
//! - [`Identity`] - Opaque actor address for events, groups, attendees and shards
//! - [`Attendee`], [`Invite`], [`Join`] - Relation records held by child shards
//! - [`ShardDescriptor`], [`CanisterType`], [`WasmVersion`] - Registry bookkeeping
//! - [`PagedResponse`] - Paged read projection
//! - [`ApiError`] - Error taxonomy shared by every operation
//! - [`codec`] - MessagePack encode/decode helpers

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
mod descriptor;
mod error;
mod ids;
mod models;
mod paged;

pub use descriptor::{CanisterType, ChildModule, EntryRange, ShardDescriptor, ShardInit, WasmVersion};
pub use error::{ApiError, ErrorMessage, UpdateMessage, ValidationResponse};
pub use ids::{Identity, IdentityParseError, IDENTITY_LEN};
pub use models::{
    Attendee, AttendeeEntry, ChunkResponse, Invite, InviteAttendeeResponse, InviteType, Join,
    JoinedAttendeeResponse, Privacy,
};
pub use paged::PagedResponse;
