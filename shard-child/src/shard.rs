//! The child shard actor.
//!
//! A `ChildShard` owns one [`AttendeeStore`] behind a single async mutex.
//! Every mutating call resolves the event directory first, authorizes, then
//! takes the lock and runs the whole transition synchronously, so two calls
//! on the same shard never interleave their steps and a rejected call never
//! leaves a partial change behind.

use crate::config::ChildConfig;
use crate::directory::EventDirectory;
use crate::store::AttendeeStore;
use shard_core::relation::{self, Relation, Transition};
use shard_core::{ChunkBuffer, ChunkedPayload, Clock, FinalizedPayload, MonotonicClock};
use shard_types::{
    codec, ApiError, Attendee, AttendeeEntry, ChunkResponse, Identity, InviteAttendeeResponse,
    InviteType, JoinedAttendeeResponse, Privacy, ShardInit,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Operational counters for one shard.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct ShardMetrics {
    /// Invites created or overwritten.
    pub invites_total: AtomicU64,
    /// Joins created (direct joins and accepted invites).
    pub joins_total: AtomicU64,
    /// Joins and invites removed.
    pub removals_total: AtomicU64,
    /// Calls rejected with an error.
    pub rejections_total: AtomicU64,
    /// Successful restores.
    pub restores_total: AtomicU64,
}

/// Point-in-time copy of [`ShardMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// Invites created or overwritten.
    pub invites_total: u64,
    /// Joins created.
    pub joins_total: u64,
    /// Joins and invites removed.
    pub removals_total: u64,
    /// Calls rejected with an error.
    pub rejections_total: u64,
    /// Successful restores.
    pub restores_total: u64,
}

impl ShardMetrics {
    /// Read all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            invites_total: self.invites_total.load(Ordering::Relaxed),
            joins_total: self.joins_total.load(Ordering::Relaxed),
            removals_total: self.removals_total.load(Ordering::Relaxed),
            rejections_total: self.rejections_total.load(Ordering::Relaxed),
            restores_total: self.restores_total.load(Ordering::Relaxed),
        }
    }

    fn record(&self, after: Relation) {
        let counter = match after {
            Relation::Joined => &self.joins_total,
            Relation::Invited(_) => &self.invites_total,
            Relation::NoRelation => &self.removals_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Transfer channels of a shard. One transfer per channel at a time.
#[derive(Debug)]
pub(crate) struct Transfers {
    /// Incoming restore payload.
    pub(crate) upload: ChunkBuffer,
    /// Upload that passed `finalize_upload`, waiting for `restore_data`.
    pub(crate) finalized: Option<FinalizedPayload>,
    /// Outgoing backup payload.
    pub(crate) backup: Option<ChunkedPayload>,
}

#[derive(Debug)]
pub(crate) struct ShardState {
    pub(crate) store: AttendeeStore,
    pub(crate) transfers: Transfers,
    /// Set once the registry has closed this shard's range.
    pub(crate) closed: bool,
}

impl ShardState {
    fn require_open(&self) -> Result<(), ApiError> {
        if self.closed {
            return Err(ApiError::at_capacity(
                "CANISTER_CLOSED",
                "shard range is closed, new attendees go to its sibling",
            ));
        }
        Ok(())
    }
}

/// One child shard of the attendee store.
#[derive(Debug)]
pub struct ChildShard {
    pub(crate) identity: Identity,
    pub(crate) parent: Identity,
    pub(crate) name: String,
    pub(crate) config: ChildConfig,
    directory: Arc<dyn EventDirectory>,
    clock: Arc<dyn Clock>,
    pub(crate) state: Mutex<ShardState>,
    pub(crate) metrics: ShardMetrics,
}

impl ChildShard {
    /// Create a shard from the init arguments the registry deployed it with.
    pub fn new(
        identity: Identity,
        init: ShardInit,
        config: ChildConfig,
        directory: Arc<dyn EventDirectory>,
    ) -> Result<Self, ApiError> {
        let upload = ChunkBuffer::new(config.chunk_size)?;
        tracing::info!(
            shard = %identity,
            name = %init.name,
            start_index = init.start_index,
            "child shard initialized"
        );
        Ok(Self {
            identity,
            parent: init.parent,
            name: init.name,
            state: Mutex::new(ShardState {
                store: AttendeeStore::new(identity, init.start_index),
                transfers: Transfers {
                    upload,
                    finalized: None,
                    backup: None,
                },
                closed: false,
            }),
            config,
            directory,
            clock: Arc::new(MonotonicClock::new()),
            metrics: ShardMetrics::default(),
        })
    }

    /// Replace the timestamp source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// This shard's identity.
    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// The registry that owns this shard.
    pub fn parent(&self) -> Identity {
        self.parent
    }

    /// Name of the scalable store.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shard configuration.
    pub fn config(&self) -> &ChildConfig {
        &self.config
    }

    /// Operational counters.
    pub fn metrics(&self) -> &ShardMetrics {
        &self.metrics
    }

    /// Number of attendee records.
    pub async fn entry_count(&self) -> usize {
        self.state.lock().await.store.len()
    }

    /// Highest entry index handed out. Reported to the registry when the
    /// shard fills up.
    pub async fn last_entry_index(&self) -> u64 {
        self.state.lock().await.store.last_entry_index()
    }

    /// Whether the registry has closed this shard.
    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    /// Stop creating records. Existing attendees keep working.
    ///
    /// Called by the registry once a sibling has taken over new writes.
    /// Returns the highest entry index handed out. Idempotent.
    pub async fn close_for_writes(&self, caller: Identity) -> Result<u64, ApiError> {
        let result: Result<u64, ApiError> = async {
            self.require_parent(&caller)?;
            let mut state = self.state.lock().await;
            if !state.closed {
                state.closed = true;
                tracing::info!(
                    shard = %self.identity,
                    last_entry_index = state.store.last_entry_index(),
                    "shard closed for new attendees"
                );
            }
            Ok(state.store.last_entry_index())
        }
        .await;
        self.finish("close_for_writes", result)
    }

    // -- guards -----------------------------------------------------------

    pub(crate) fn location(&self, operation: &str) -> String {
        format!("{}/{}", self.name, operation)
    }

    /// Attach the location, count the rejection and log it.
    pub(crate) fn finish<T>(&self, operation: &str, result: Result<T, ApiError>) -> Result<T, ApiError> {
        result.map_err(|err| {
            self.metrics.rejections_total.fetch_add(1, Ordering::Relaxed);
            let err = err.at(self.location(operation));
            if err.is_recoverable() {
                tracing::debug!(shard = %self.identity, operation, error = %err, "call rejected");
            } else {
                tracing::error!(shard = %self.identity, operation, error = %err, "unexpected shard fault");
            }
            err
        })
    }

    fn require_caller(caller: &Identity) -> Result<(), ApiError> {
        if caller.is_anonymous() {
            return Err(ApiError::unauthorized(
                "ANONYMOUS_CALLER",
                "anonymous callers cannot modify attendees",
            ));
        }
        Ok(())
    }

    pub(crate) fn require_parent(&self, caller: &Identity) -> Result<(), ApiError> {
        if *caller != self.parent {
            return Err(ApiError::unauthorized(
                "NOT_PARENT",
                "only the parent registry may call this",
            ));
        }
        Ok(())
    }

    async fn require_owner(
        &self,
        actor: &Identity,
        event: &Identity,
        group: &Identity,
    ) -> Result<Privacy, ApiError> {
        let (owner, privacy) = self.directory.owner_and_privacy(event, group).await?;
        if owner != *actor {
            return Err(ApiError::unauthorized(
                "NOT_EVENT_OWNER",
                "only the event owner may do this",
            ));
        }
        Ok(privacy)
    }

    /// Apply a transition to an attendee that may not have a record yet.
    async fn transition_or_create(
        &self,
        attendee: Identity,
        event: Identity,
        transition: Transition,
    ) -> Result<Relation, ApiError> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();
        if state.store.get(&attendee).is_none() {
            state.require_open()?;
        }
        let capacity = self.config.max_entries;
        let mut before = Relation::NoRelation;
        let after = state.store.update_or_create(attendee, capacity, |record| {
            before = Relation::of(record, &event);
            relation::apply(record, event, transition, now)
        })?;
        self.metrics.record(after);
        tracing::debug!(shard = %self.identity, attendee = %attendee, event = %event, ?before, ?after, "transition");
        Ok(after)
    }

    /// Apply a transition to an attendee that must already have a record.
    async fn transition_existing(
        &self,
        attendee: Identity,
        event: Identity,
        transition: Transition,
        not_found: ApiError,
    ) -> Result<Relation, ApiError> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();
        let mut before = Relation::NoRelation;
        let after = state.store.update_existing(&attendee, not_found, |record| {
            before = Relation::of(record, &event);
            relation::apply(record, event, transition, now)
        })?;
        self.metrics.record(after);
        tracing::debug!(shard = %self.identity, attendee = %attendee, event = %event, ?before, ?after, "transition");
        Ok(after)
    }

    // -- invite / join state machine --------------------------------------

    /// Invite `attendee` to `event`.
    ///
    /// The event owner creates an `OwnerRequest` invite; the attendee inviting
    /// themself creates a `UserRequest`. Anyone else is rejected.
    pub async fn invite(
        &self,
        actor: Identity,
        attendee: Identity,
        group: Identity,
        event: Identity,
    ) -> Result<Relation, ApiError> {
        let result: Result<_, ApiError> = async {
            Self::require_caller(&actor)?;
            let (owner, privacy) = self.directory.owner_and_privacy(&event, &group).await?;
            let invite_type = if actor == owner {
                InviteType::OwnerRequest
            } else if actor == attendee {
                if privacy == Privacy::InviteOnly {
                    return Err(ApiError::bad_request(
                        "UNSUPPORTED",
                        "this event only accepts owner invites",
                    ));
                }
                InviteType::UserRequest
            } else {
                return Err(ApiError::unauthorized(
                    "NOT_EVENT_OWNER",
                    "only the event owner or the attendee may invite",
                ));
            };
            self.transition_or_create(attendee, event, Transition::Invite { group, invite_type })
                .await
        }
        .await;
        self.finish("invite", result)
    }

    /// Accept an owner invite as the invited attendee.
    pub async fn accept_owner_request_event_invite(
        &self,
        caller: Identity,
        event: Identity,
    ) -> Result<Relation, ApiError> {
        let result: Result<_, ApiError> = async {
            Self::require_caller(&caller)?;
            self.transition_existing(
                caller,
                event,
                Transition::Accept {
                    expected: InviteType::OwnerRequest,
                },
                ApiError::not_found("NO_INVITE_FOUND", "no invite found for this event"),
            )
            .await
        }
        .await;
        self.finish("accept_owner_request_event_invite", result)
    }

    /// Accept an attendee's join request as the event owner.
    pub async fn accept_user_request_event_invite(
        &self,
        actor: Identity,
        attendee: Identity,
        group: Identity,
        event: Identity,
    ) -> Result<Relation, ApiError> {
        let result: Result<_, ApiError> = async {
            Self::require_caller(&actor)?;
            self.require_owner(&actor, &event, &group).await?;
            self.transition_existing(
                attendee,
                event,
                Transition::Accept {
                    expected: InviteType::UserRequest,
                },
                ApiError::not_found("NO_INVITE_FOUND", "no invite found for this event"),
            )
            .await
        }
        .await;
        self.finish("accept_user_request_event_invite", result)
    }

    /// Join an event directly.
    ///
    /// Public events are joined immediately. Private events get a
    /// `UserRequest` invite the owner must accept. Invite-only events reject
    /// self-service joins.
    pub async fn join_event(
        &self,
        caller: Identity,
        group: Identity,
        event: Identity,
    ) -> Result<Relation, ApiError> {
        let result: Result<_, ApiError> = async {
            Self::require_caller(&caller)?;
            let (_, privacy) = self.directory.owner_and_privacy(&event, &group).await?;
            let transition = match privacy {
                Privacy::Public => Transition::Join { group },
                Privacy::Private => Transition::Request { group },
                Privacy::InviteOnly => {
                    return Err(ApiError::bad_request(
                        "UNSUPPORTED",
                        "this event only accepts owner invites",
                    ))
                }
            };
            self.transition_or_create(caller, event, transition).await
        }
        .await;
        self.finish("join_event", result)
    }

    /// Leave a joined event.
    pub async fn leave_event(&self, caller: Identity, event: Identity) -> Result<(), ApiError> {
        let result: Result<_, ApiError> = async {
            Self::require_caller(&caller)?;
            self.transition_existing(caller, event, Transition::Leave, attendee_not_found())
                .await
                .map(|_| ())
        }
        .await;
        self.finish("leave_event", result)
    }

    /// Drop a pending invite. The attendee may withdraw their own; the event
    /// owner may withdraw anyone's.
    pub async fn remove_invite(
        &self,
        actor: Identity,
        attendee: Identity,
        group: Identity,
        event: Identity,
    ) -> Result<(), ApiError> {
        let result: Result<_, ApiError> = async {
            Self::require_caller(&actor)?;
            if actor != attendee {
                self.require_owner(&actor, &event, &group).await?;
            }
            self.transition_existing(attendee, event, Transition::WithdrawInvite, attendee_not_found())
                .await
                .map(|_| ())
        }
        .await;
        self.finish("remove_invite", result)
    }

    /// Remove a joined attendee as the event owner.
    pub async fn remove_attendee_from_event(
        &self,
        actor: Identity,
        attendee: Identity,
        group: Identity,
        event: Identity,
    ) -> Result<(), ApiError> {
        let result: Result<_, ApiError> = async {
            Self::require_caller(&actor)?;
            self.require_owner(&actor, &event, &group).await?;
            self.transition_existing(attendee, event, Transition::Leave, attendee_not_found())
                .await
                .map(|_| ())
        }
        .await;
        self.finish("remove_attendee_from_event", result)
    }

    /// Record the event owner as a joined attendee of their own event.
    pub async fn add_owner_as_attendee(
        &self,
        caller: Identity,
        group: Identity,
        event: Identity,
    ) -> Result<(), ApiError> {
        let result: Result<_, ApiError> = async {
            Self::require_caller(&caller)?;
            self.require_owner(&caller, &event, &group).await?;
            self.transition_or_create(caller, event, Transition::Join { group })
                .await
                .map(|_| ())
        }
        .await;
        self.finish("add_owner_as_attendee", result)
    }

    /// Import an encoded [`Attendee`] forwarded by the parent registry.
    pub async fn add_entry_by_parent(&self, caller: Identity, bytes: &[u8]) -> Result<u64, ApiError> {
        let result: Result<u64, ApiError> = async {
            self.require_parent(&caller)?;
            let attendee: Attendee = codec::decode(bytes)?;
            if attendee
                .invites
                .keys()
                .any(|event| attendee.joined.contains_key(event))
            {
                return Err(ApiError::validation(
                    "attendee",
                    "holds an invite and a join for one event",
                ));
            }
            let mut state = self.state.lock().await;
            state.require_open()?;
            let index = state.store.import(attendee, self.config.max_entries)?;
            tracing::info!(shard = %self.identity, index, "entry imported from parent");
            Ok(index)
        }
        .await;
        self.finish("add_entry_by_parent", result)
    }

    // -- reads ------------------------------------------------------------

    /// Whether this shard holds a record for `principal`.
    pub async fn holds(&self, principal: &Identity) -> bool {
        self.state.lock().await.store.get(principal).is_some()
    }

    /// The caller's own entry.
    pub async fn get_self(&self, caller: Identity) -> Result<AttendeeEntry, ApiError> {
        let state = self.state.lock().await;
        let result = state.store.get(&caller).cloned().ok_or_else(attendee_not_found);
        self.finish("get_self", result)
    }

    /// Every event `principal` has joined.
    pub async fn get_attending_from_principal(
        &self,
        principal: Identity,
    ) -> Result<Vec<JoinedAttendeeResponse>, ApiError> {
        let state = self.state.lock().await;
        let result = state
            .store
            .get(&principal)
            .map(|entry| {
                entry
                    .attendee
                    .joined
                    .keys()
                    .filter_map(|event| entry.joined_response(event))
                    .collect()
            })
            .ok_or_else(attendee_not_found);
        self.finish("get_attending_from_principal", result)
    }

    /// Attendees of `event` on this shard.
    pub async fn get_event_attendees(&self, event: Identity) -> Vec<JoinedAttendeeResponse> {
        self.state.lock().await.store.joined_for(&event)
    }

    /// Pending invites for `event` on this shard. Owner only.
    pub async fn get_event_invites(
        &self,
        actor: Identity,
        group: Identity,
        event: Identity,
    ) -> Result<Vec<InviteAttendeeResponse>, ApiError> {
        let result: Result<_, ApiError> = async {
            self.require_owner(&actor, &event, &group).await?;
            Ok(self.state.lock().await.store.invites_for(&event))
        }
        .await;
        self.finish("get_event_invites", result)
    }

    /// Joined counts per event on this shard.
    pub async fn get_event_attendees_count(&self, events: &[Identity]) -> Vec<(Identity, usize)> {
        self.state.lock().await.store.count_joined(events)
    }

    /// Invite counts per event on this shard.
    pub async fn get_event_invites_count(&self, events: &[Identity]) -> Vec<(Identity, usize)> {
        self.state.lock().await.store.count_invites(events)
    }

    /// One chunk of the encoded attendee list of `event`. Parent only.
    pub async fn get_chunked_join_data(
        &self,
        caller: Identity,
        event: Identity,
        chunk: u64,
        max_bytes: usize,
    ) -> Result<ChunkResponse, ApiError> {
        let result: Result<_, ApiError> = async {
            self.require_parent(&caller)?;
            let list = self.state.lock().await.store.joined_for(&event);
            chunk_of(&list, chunk, max_bytes)
        }
        .await;
        self.finish("get_chunked_join_data", result)
    }

    /// One chunk of the encoded invite list of `event`. Parent only.
    pub async fn get_chunked_invite_data(
        &self,
        caller: Identity,
        event: Identity,
        chunk: u64,
        max_bytes: usize,
    ) -> Result<ChunkResponse, ApiError> {
        let result: Result<_, ApiError> = async {
            self.require_parent(&caller)?;
            let list = self.state.lock().await.store.invites_for(&event);
            chunk_of(&list, chunk, max_bytes)
        }
        .await;
        self.finish("get_chunked_invite_data", result)
    }
}

fn attendee_not_found() -> ApiError {
    ApiError::not_found("ATTENDEE_NOT_FOUND", "attendee not found")
}

fn chunk_of<T: serde::Serialize>(
    list: &[T],
    chunk: u64,
    max_bytes: usize,
) -> Result<ChunkResponse, ApiError> {
    if max_bytes == 0 {
        return Err(ApiError::bad_request(
            "INVALID_CHUNK_SIZE",
            "max_bytes must be greater than zero",
        ));
    }
    let payload = ChunkedPayload::new(codec::encode(list)?, max_bytes)?;
    let (index, bytes) = payload.chunk(chunk)?;
    Ok(ChunkResponse {
        index,
        total_chunks: payload.total_chunks(),
        bytes: bytes.to_vec(),
    })
}
