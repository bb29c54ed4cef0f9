//! # shard-child
//!
//! Child shard of the eventshard attendee store.
//!
//! A child shard holds attendee records for a contiguous range of entry
//! indices and enforces the invite/join state machine on them:
//! - [`ChildShard`] - The shard actor: transitions, reads, chunked reads
//! - [`EventDirectory`] - Where event ownership and privacy come from
//! - [`backup`] - Full-state backup and atomic restore over chunked transfer
//! - [`monitor`] - Background reporting of abandoned transfers
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use eventshard_child::{ChildConfig, ChildShard, InMemoryDirectory};
//! use shard_types::{Identity, ShardInit};
//!
//! # async fn run() -> Result<(), shard_types::ApiError> {
//! let directory = Arc::new(InMemoryDirectory::new());
//! let shard = ChildShard::new(
//!     Identity::random(),
//!     ShardInit { parent: Identity::random(), name: "attendees".into(), start_index: 0 },
//!     ChildConfig::default(),
//!     directory,
//! )?;
//! let attendees = shard.get_event_attendees(Identity::random()).await;
//! assert!(attendees.is_empty());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backup;
pub mod config;
pub mod directory;
pub mod monitor;
pub mod shard;
pub mod store;

pub use backup::{BackupManifest, ShardMetadata, TransferStatus};
pub use config::{ChildConfig, MonitorConfig};
pub use directory::{EventDirectory, EventRecord, InMemoryDirectory};
pub use monitor::spawn_transfer_monitor;
pub use shard::{ChildShard, MetricsSnapshot, ShardMetrics};
pub use store::{AttendeeStore, ShardSnapshot, SNAPSHOT_FORMAT_VERSION};
