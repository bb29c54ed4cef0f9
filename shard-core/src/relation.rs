//! Invite/join state machine for one (attendee, event) pair.
//!
//! ```text
//! NoRelation ──Invite/Request──▶ Invited{type} ──Accept{type}──▶ Joined
//!     ▲   └──────────────Join──────────────────────────────────────┘│
//!     └───────────────Leave / WithdrawInvite────────────────────────┘
//! ```
//!
//! Transitions are validated against the current relation before anything
//! is written, so a rejected transition leaves the attendee untouched.
//! Authorization is the caller's job and happens before [`apply`].

use shard_types::{ApiError, Attendee, Identity, Invite, InviteType, Join};

/// Current relation between an attendee and an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// Neither invited nor joined.
    NoRelation,
    /// An invite is pending.
    Invited(InviteType),
    /// Membership confirmed.
    Joined,
}

impl Relation {
    /// Read the relation `attendee` holds for `event`.
    pub fn of(attendee: &Attendee, event: &Identity) -> Self {
        if attendee.joined.contains_key(event) {
            Self::Joined
        } else if let Some(invite) = attendee.invites.get(event) {
            Self::Invited(invite.invite_type)
        } else {
            Self::NoRelation
        }
    }
}

/// A requested change to an (attendee, event) relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Create or overwrite an invite. Valid unless joined.
    Invite {
        /// Group the event belongs to.
        group: Identity,
        /// Who initiated it.
        invite_type: InviteType,
    },
    /// Self-service request on a private event. Valid only from `NoRelation`.
    Request {
        /// Group the event belongs to.
        group: Identity,
    },
    /// Turn a pending invite of the expected type into a join.
    Accept {
        /// Required invite type.
        expected: InviteType,
    },
    /// Direct self-join. Valid only from `NoRelation`.
    Join {
        /// Group the event belongs to.
        group: Identity,
    },
    /// Drop a join.
    Leave,
    /// Drop a pending invite.
    WithdrawInvite,
}

/// Apply `transition` to the relation `attendee` holds for `event`.
///
/// Returns the new relation. `now` stamps `updated_at` on every change and
/// `created_at` on new records.
pub fn apply(
    attendee: &mut Attendee,
    event: Identity,
    transition: Transition,
    now: u64,
) -> Result<Relation, ApiError> {
    match (Relation::of(attendee, &event), transition) {
        // Anything that creates a relation is blocked by an existing join
        (
            Relation::Joined,
            Transition::Invite { .. } | Transition::Request { .. } | Transition::Join { .. },
        ) => Err(ApiError::bad_request(
            "ALREADY_JOINED",
            "the attendee is already part of this event",
        )),

        // Self-service paths must be resolved against a pending invite first
        (Relation::Invited(_), Transition::Request { .. } | Transition::Join { .. }) => {
            Err(ApiError::bad_request(
                "PENDING_INVITE",
                "there is already a pending invite for this event",
            ))
        }

        (_, Transition::Invite { group, invite_type }) => {
            upsert_invite(attendee, event, group, invite_type, now);
            Ok(Relation::Invited(invite_type))
        }

        (Relation::NoRelation, Transition::Request { group }) => {
            upsert_invite(attendee, event, group, InviteType::UserRequest, now);
            Ok(Relation::Invited(InviteType::UserRequest))
        }

        (Relation::NoRelation, Transition::Join { group }) => {
            insert_join(attendee, event, group, now);
            Ok(Relation::Joined)
        }

        (Relation::Invited(current), Transition::Accept { expected }) => {
            if current != expected {
                return Err(ApiError::bad_request(
                    "INVALID_TYPE",
                    format!("invite is {:?}, expected {:?}", current, expected),
                ));
            }
            let Some(invite) = attendee.invites.remove(&event) else {
                return Err(ApiError::unexpected(
                    "RELATION_DESYNC",
                    "invite vanished during accept",
                ));
            };
            insert_join(attendee, event, invite.group, now);
            Ok(Relation::Joined)
        }
        (_, Transition::Accept { .. }) => Err(ApiError::not_found(
            "NO_INVITE_FOUND",
            "no invite found for this event",
        )),

        (Relation::Joined, Transition::Leave) => {
            attendee.joined.remove(&event);
            Ok(Relation::NoRelation)
        }
        (_, Transition::Leave) => Err(ApiError::not_found(
            "JOIN_NOT_FOUND",
            "the attendee has not joined this event",
        )),

        (Relation::Invited(_), Transition::WithdrawInvite) => {
            attendee.invites.remove(&event);
            Ok(Relation::NoRelation)
        }
        (_, Transition::WithdrawInvite) => Err(ApiError::not_found(
            "INVITE_NOT_FOUND",
            "the attendee has no invite for this event",
        )),
    }
}

fn upsert_invite(
    attendee: &mut Attendee,
    event: Identity,
    group: Identity,
    invite_type: InviteType,
    now: u64,
) {
    attendee
        .invites
        .entry(event)
        .and_modify(|invite| {
            invite.group = group;
            invite.invite_type = invite_type;
            invite.updated_at = now;
        })
        .or_insert(Invite {
            group,
            invite_type,
            created_at: now,
            updated_at: now,
        });
}

fn insert_join(attendee: &mut Attendee, event: Identity, group: Identity, now: u64) {
    attendee.joined.insert(
        event,
        Join {
            group,
            created_at: now,
            updated_at: now,
        },
    );
}
