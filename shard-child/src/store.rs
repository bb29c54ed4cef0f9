//! Attendee records held by one shard.
//!
//! Entries are kept in entry-index order, which is the order they were first
//! written. Every read path iterates in that order, so results are stable
//! for a given snapshot.

use serde::{Deserialize, Serialize};
use shard_types::{
    ApiError, Attendee, AttendeeEntry, Identity, InviteAttendeeResponse, JoinedAttendeeResponse,
};
use std::collections::{BTreeMap, HashMap};

/// Kind tag used when deriving entry identifiers.
pub const ENTRY_KIND: &str = "eae";

/// Current snapshot layout.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Full persisted state of a shard store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardSnapshot {
    /// Layout version, checked on restore.
    pub format_version: u32,
    /// Name of the scalable store.
    pub name: String,
    /// First entry index of the shard.
    pub start_index: u64,
    /// Next entry index to assign.
    pub next_index: u64,
    /// All entries, in index order.
    pub entries: Vec<AttendeeEntry>,
}

/// In-memory attendee store with a local entry counter.
#[derive(Debug, Clone)]
pub struct AttendeeStore {
    shard: Identity,
    start_index: u64,
    next_index: u64,
    entries: BTreeMap<u64, AttendeeEntry>,
    by_principal: HashMap<Identity, u64>,
}

impl AttendeeStore {
    /// Create an empty store whose first entry gets `start_index`.
    pub fn new(shard: Identity, start_index: u64) -> Self {
        Self {
            shard,
            start_index,
            next_index: start_index,
            entries: BTreeMap::new(),
            by_principal: HashMap::new(),
        }
    }

    /// Number of attendee records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First entry index of the shard.
    pub fn start_index(&self) -> u64 {
        self.start_index
    }

    /// Next entry index to assign.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Highest entry index handed out, or `start_index` if none was.
    pub fn last_entry_index(&self) -> u64 {
        if self.next_index == self.start_index {
            self.start_index
        } else {
            self.next_index - 1
        }
    }

    /// Look up the entry for `principal`.
    pub fn get(&self, principal: &Identity) -> Option<&AttendeeEntry> {
        self.by_principal
            .get(principal)
            .and_then(|index| self.entries.get(index))
    }

    /// Run `change` against the existing record for `principal`.
    ///
    /// Returns `not_found` when there is no record. `change` must leave the
    /// attendee untouched when it fails.
    pub fn update_existing<R>(
        &mut self,
        principal: &Identity,
        not_found: ApiError,
        change: impl FnOnce(&mut Attendee) -> Result<R, ApiError>,
    ) -> Result<R, ApiError> {
        let entry = self
            .by_principal
            .get(principal)
            .and_then(|index| self.entries.get_mut(index))
            .ok_or(not_found)?;
        change(&mut entry.attendee)
    }

    /// Run `change` against the record for `principal`, creating it if needed.
    ///
    /// A new record is only stored when `change` succeeds, and only if the
    /// store holds fewer than `capacity` records.
    pub fn update_or_create<R>(
        &mut self,
        principal: Identity,
        capacity: usize,
        change: impl FnOnce(&mut Attendee) -> Result<R, ApiError>,
    ) -> Result<R, ApiError> {
        if self.by_principal.contains_key(&principal) {
            return self.update_existing(
                &principal,
                ApiError::unexpected("INDEX_DESYNC", "principal index out of sync"),
                change,
            );
        }

        self.require_capacity(capacity)?;
        let mut attendee = Attendee::new(principal);
        let result = change(&mut attendee)?;
        self.insert_new(attendee);
        Ok(result)
    }

    /// Store an attendee record received from elsewhere.
    pub fn import(&mut self, attendee: Attendee, capacity: usize) -> Result<u64, ApiError> {
        if self.by_principal.contains_key(&attendee.principal) {
            return Err(ApiError::bad_request(
                "ALREADY_EXISTS",
                "an entry for this principal already exists",
            ));
        }
        self.require_capacity(capacity)?;
        Ok(self.insert_new(attendee))
    }

    fn require_capacity(&self, capacity: usize) -> Result<(), ApiError> {
        if self.entries.len() >= capacity {
            return Err(ApiError::at_capacity(
                "CANISTER_FULL",
                format!("shard holds {} of {} entries", self.entries.len(), capacity),
            ));
        }
        Ok(())
    }

    fn insert_new(&mut self, attendee: Attendee) -> u64 {
        let index = self.next_index;
        self.next_index += 1;
        self.by_principal.insert(attendee.principal, index);
        self.entries.insert(
            index,
            AttendeeEntry {
                identifier: Identity::derive(&self.shard, ENTRY_KIND, index),
                index,
                attendee,
            },
        );
        index
    }

    /// Entries in index order.
    pub fn entries(&self) -> impl Iterator<Item = &AttendeeEntry> {
        self.entries.values()
    }

    /// Attendees who joined `event`.
    pub fn joined_for(&self, event: &Identity) -> Vec<JoinedAttendeeResponse> {
        self.entries()
            .filter_map(|entry| entry.joined_response(event))
            .collect()
    }

    /// Attendees with a pending invite for `event`.
    pub fn invites_for(&self, event: &Identity) -> Vec<InviteAttendeeResponse> {
        self.entries()
            .filter_map(|entry| entry.invite_response(event))
            .collect()
    }

    /// Joined counts per event, in the order given.
    pub fn count_joined(&self, events: &[Identity]) -> Vec<(Identity, usize)> {
        events
            .iter()
            .map(|event| {
                let count = self
                    .entries()
                    .filter(|e| e.attendee.joined.contains_key(event))
                    .count();
                (*event, count)
            })
            .collect()
    }

    /// Invite counts per event, in the order given.
    pub fn count_invites(&self, events: &[Identity]) -> Vec<(Identity, usize)> {
        events
            .iter()
            .map(|event| {
                let count = self
                    .entries()
                    .filter(|e| e.attendee.invites.contains_key(event))
                    .count();
                (*event, count)
            })
            .collect()
    }

    /// Capture the whole store.
    pub fn snapshot(&self, name: &str) -> ShardSnapshot {
        ShardSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            name: name.to_string(),
            start_index: self.start_index,
            next_index: self.next_index,
            entries: self.entries().cloned().collect(),
        }
    }

    /// Rebuild a store from a snapshot, validating it completely first.
    ///
    /// The snapshot must come from a store named `name` whose range starts at
    /// `start_index`. Every problem found is reported in a single
    /// `ValidationError`.
    pub fn from_snapshot(
        shard: Identity,
        start_index: u64,
        name: &str,
        snapshot: ShardSnapshot,
    ) -> Result<Self, ApiError> {
        let mut problems = Vec::new();
        let mut report = |field: String, message: String| {
            problems.push(shard_types::ValidationResponse { field, message });
        };

        if snapshot.start_index != start_index {
            report(
                "start_index".into(),
                format!(
                    "snapshot starts at {}, this shard starts at {}",
                    snapshot.start_index, start_index
                ),
            );
        }
        if snapshot.name != name {
            report(
                "name".into(),
                format!("snapshot is of {:?}, this shard holds {:?}", snapshot.name, name),
            );
        }

        if snapshot.next_index < snapshot.start_index {
            report(
                "next_index".into(),
                format!(
                    "next index {} is below start index {}",
                    snapshot.next_index, snapshot.start_index
                ),
            );
        }

        let mut store = Self::new(shard, snapshot.start_index);
        store.next_index = snapshot.next_index;

        for entry in snapshot.entries {
            let field = format!("entries[{}]", entry.index);
            if entry.index < snapshot.start_index || entry.index >= snapshot.next_index {
                report(field.clone(), "index outside the shard range".into());
            }
            if entry
                .attendee
                .invites
                .keys()
                .any(|event| entry.attendee.joined.contains_key(event))
            {
                report(field.clone(), "holds an invite and a join for one event".into());
            }
            if store.by_principal.contains_key(&entry.attendee.principal) {
                report(field.clone(), "duplicate principal".into());
                continue;
            }
            if store.entries.contains_key(&entry.index) {
                report(field, "duplicate index".into());
                continue;
            }
            store.by_principal.insert(entry.attendee.principal, entry.index);
            store.entries.insert(entry.index, entry);
        }

        if problems.is_empty() {
            Ok(store)
        } else {
            Err(ApiError::ValidationError(problems))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shard_core::relation::{apply, Transition};

    fn join(store: &mut AttendeeStore, principal: Identity, event: Identity) {
        store
            .update_or_create(principal, usize::MAX, |a| {
                apply(a, event, Transition::Join { group: Identity::random() }, 1)
            })
            .unwrap();
    }

    #[test]
    fn entries_get_consecutive_indices_from_start() {
        let mut store = AttendeeStore::new(Identity::random(), 100);
        let event = Identity::random();
        let first = Identity::random();
        let second = Identity::random();
        join(&mut store, first, event);
        join(&mut store, second, event);

        assert_eq!(store.get(&first).unwrap().index, 100);
        assert_eq!(store.get(&second).unwrap().index, 101);
        assert_eq!(store.last_entry_index(), 101);
        assert_eq!(store.next_index(), 102);
    }

    #[test]
    fn failed_change_does_not_create_record_or_consume_index() {
        let mut store = AttendeeStore::new(Identity::random(), 0);
        let result = store.update_or_create(Identity::random(), 10, |a| {
            apply(a, Identity::random(), Transition::Leave, 1)
        });
        assert!(result.is_err());
        assert!(store.is_empty());
        assert_eq!(store.next_index(), 0);
        assert_eq!(store.last_entry_index(), 0);
    }

    #[test]
    fn capacity_only_blocks_new_records() {
        let mut store = AttendeeStore::new(Identity::random(), 0);
        let event = Identity::random();
        let existing = Identity::random();
        store
            .update_or_create(existing, 1, |a| {
                apply(a, event, Transition::Join { group: Identity::random() }, 1)
            })
            .unwrap();

        let err = store
            .update_or_create(Identity::random(), 1, |a| {
                apply(a, event, Transition::Join { group: Identity::random() }, 2)
            })
            .unwrap_err();
        assert!(matches!(err, ApiError::CanisterAtCapacity(_)));

        store
            .update_or_create(existing, 1, |a| {
                apply(a, Identity::random(), Transition::Join { group: Identity::random() }, 3)
            })
            .unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn identifiers_derive_from_shard_and_index() {
        let shard = Identity::random();
        let mut store = AttendeeStore::new(shard, 7);
        let principal = Identity::random();
        join(&mut store, principal, Identity::random());
        assert_eq!(
            store.get(&principal).unwrap().identifier,
            Identity::derive(&shard, ENTRY_KIND, 7)
        );
    }

    #[test]
    fn counts_follow_input_order() {
        let mut store = AttendeeStore::new(Identity::random(), 0);
        let a = Identity::random();
        let b = Identity::random();
        join(&mut store, Identity::random(), a);
        join(&mut store, Identity::random(), a);
        join(&mut store, Identity::random(), b);

        assert_eq!(store.count_joined(&[b, a]), vec![(b, 1), (a, 2)]);
        assert_eq!(store.count_invites(&[a]), vec![(a, 0)]);
    }

    #[test]
    fn import_rejects_duplicates() {
        let mut store = AttendeeStore::new(Identity::random(), 0);
        let attendee = Attendee::new(Identity::random());
        assert_eq!(store.import(attendee.clone(), 10).unwrap(), 0);
        let err = store.import(attendee, 10).unwrap_err();
        assert_eq!(err.tag(), Some("ALREADY_EXISTS"));
    }

    #[test]
    fn snapshot_restores_identical_store() {
        let shard = Identity::random();
        let mut store = AttendeeStore::new(shard, 5);
        let event = Identity::random();
        join(&mut store, Identity::random(), event);
        join(&mut store, Identity::random(), event);

        let restored = AttendeeStore::from_snapshot(shard, 5, "attendees", store.snapshot("attendees")).unwrap();
        assert_eq!(restored.next_index(), store.next_index());
        assert_eq!(
            restored.entries().collect::<Vec<_>>(),
            store.entries().collect::<Vec<_>>()
        );
        assert_eq!(restored.joined_for(&event), store.joined_for(&event));
    }

    #[test]
    fn invalid_snapshot_lists_all_problems() {
        let shard = Identity::random();
        let mut store = AttendeeStore::new(shard, 0);
        let principal = Identity::random();
        join(&mut store, principal, Identity::random());

        let mut snapshot = store.snapshot("attendees");
        let mut duplicate = snapshot.entries[0].clone();
        duplicate.index = 9;
        snapshot.entries.push(duplicate);

        match AttendeeStore::from_snapshot(shard, 0, "attendees", snapshot) {
            Err(ApiError::ValidationError(items)) => {
                assert_eq!(items.len(), 2);
                assert!(items.iter().all(|v| v.field == "entries[9]"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn snapshot_must_match_range_and_name() {
        let shard = Identity::random();
        let mut store = AttendeeStore::new(shard, 0);
        join(&mut store, Identity::random(), Identity::random());
        let snapshot = store.snapshot("attendees");

        match AttendeeStore::from_snapshot(shard, 100, "members", snapshot.clone()) {
            Err(ApiError::ValidationError(items)) => {
                let fields: Vec<_> = items.iter().map(|v| v.field.as_str()).collect();
                assert_eq!(fields, vec!["start_index", "name"]);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        assert!(AttendeeStore::from_snapshot(shard, 0, "attendees", snapshot).is_ok());
    }
}
