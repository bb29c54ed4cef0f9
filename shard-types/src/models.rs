//! Attendee relation records and their read projections.

use crate::ids::Identity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Who initiated an invite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum InviteType {
    /// No initiator recorded.
    #[default]
    None,
    /// Sent by the event owner, accepted by the attendee.
    OwnerRequest,
    /// Requested by the attendee, accepted by the event owner.
    UserRequest,
}

/// Event privacy as reported by the event directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privacy {
    /// Anyone may join directly.
    Public,
    /// Joining creates a request the owner must accept.
    Private,
    /// Only owner invites are possible.
    InviteOnly,
}

/// A pending relationship between an attendee and an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invite {
    /// Group the event belongs to.
    pub group: Identity,
    /// Who initiated the invite.
    pub invite_type: InviteType,
    /// Set once, never changed.
    pub created_at: u64,
    /// Updated on every transition.
    pub updated_at: u64,
}

/// A confirmed membership of an attendee in an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Join {
    /// Group the event belongs to.
    pub group: Identity,
    /// Set once, never changed.
    pub created_at: u64,
    /// Updated on every transition.
    pub updated_at: u64,
}

/// Relations held by a single attendee.
///
/// Both maps are keyed by event identity. A key never appears in both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    /// The attendee's identity.
    pub principal: Identity,
    /// Pending invites, keyed by event.
    pub invites: BTreeMap<Identity, Invite>,
    /// Confirmed joins, keyed by event.
    pub joined: BTreeMap<Identity, Join>,
}

impl Attendee {
    /// Create an attendee with no relations.
    pub fn new(principal: Identity) -> Self {
        Self {
            principal,
            invites: BTreeMap::new(),
            joined: BTreeMap::new(),
        }
    }

    /// Whether the attendee holds no relations at all.
    pub fn is_empty(&self) -> bool {
        self.invites.is_empty() && self.joined.is_empty()
    }
}

/// An attendee as stored by a shard, with its shard-local entry number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendeeEntry {
    /// Entry identifier derived from the shard identity and `index`.
    pub identifier: Identity,
    /// Position in the shard's entry range.
    pub index: u64,
    /// The relation record.
    pub attendee: Attendee,
}

/// A joined attendee as returned by read paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinedAttendeeResponse {
    /// Event joined.
    pub event: Identity,
    /// Group the event belongs to.
    pub group: Identity,
    /// Shard-local entry identifier.
    pub attendee_identifier: Identity,
    /// Attendee identity.
    pub principal: Identity,
}

/// An invited attendee as returned by read paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteAttendeeResponse {
    /// Event invited to.
    pub event: Identity,
    /// Group the event belongs to.
    pub group: Identity,
    /// Shard-local entry identifier.
    pub attendee_identifier: Identity,
    /// Attendee identity.
    pub principal: Identity,
    /// Who initiated the invite.
    pub invite_type: InviteType,
}

impl AttendeeEntry {
    /// Project the join for `event`, if the attendee holds one.
    pub fn joined_response(&self, event: &Identity) -> Option<JoinedAttendeeResponse> {
        self.attendee
            .joined
            .get(event)
            .map(|join| JoinedAttendeeResponse {
                event: *event,
                group: join.group,
                attendee_identifier: self.identifier,
                principal: self.attendee.principal,
            })
    }

    /// Project the invite for `event`, if the attendee holds one.
    pub fn invite_response(&self, event: &Identity) -> Option<InviteAttendeeResponse> {
        self.attendee
            .invites
            .get(event)
            .map(|invite| InviteAttendeeResponse {
                event: *event,
                group: invite.group,
                attendee_identifier: self.identifier,
                principal: self.attendee.principal,
                invite_type: invite.invite_type,
            })
    }
}

/// One chunk of a chunked read, as served by a child shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkResponse {
    /// Index of this chunk.
    pub index: u64,
    /// Total chunks in the payload.
    pub total_chunks: u64,
    /// Chunk bytes.
    pub bytes: Vec<u8>,
}
