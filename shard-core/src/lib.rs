//! # shard-core
//!
//! Pure logic for eventshard (no I/O, instant tests).
//!
//! This crate implements the algorithms every shard and the registry share,
//! without any locking, networking or persistence.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects beyond the value they are handed. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actor state and authorization live in `shard-child`, which drives the
//! transitions defined here while holding its state lock.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunk;
pub mod clock;
pub mod paging;
pub mod relation;

pub use chunk::{checksum, ChunkBuffer, ChunkedPayload, FinalizedPayload, DEFAULT_CHUNK_SIZE};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use paging::page;
pub use relation::{Relation, Transition};
