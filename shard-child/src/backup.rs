//! Backup and restore of a shard's full state.
//!
//! All transfers use the chunked codec and are restricted to the parent:
//! - **backup**: `canister_backup_data` encodes a [`ShardSnapshot`] once and
//!   serves it through `total_chunks` / `download_chunk`
//! - **entries** and **metadata**: encoded on demand per request
//! - **upload**: `begin_upload` → `upload_chunk` → `finalize_upload` →
//!   `restore_data`
//!
//! `restore_data` decodes and validates the whole snapshot before the store
//! is swapped, so a corrupt upload leaves live state untouched.

use crate::shard::ChildShard;
use crate::store::{AttendeeStore, ShardSnapshot, SNAPSHOT_FORMAT_VERSION};
use serde::{Deserialize, Serialize};
use shard_core::{ChunkBuffer, ChunkedPayload};
use shard_types::{codec, ApiError, Identity};
use std::sync::atomic::Ordering;
use std::time::Duration;

/// Describes a prepared backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    /// Hex BLAKE3 digest of the encoded snapshot.
    pub checksum: String,
    /// Snapshot layout version.
    pub version: String,
    /// Chunks to download.
    pub total_chunks: u64,
    /// Encoded size in bytes.
    pub size: u64,
}

/// Shard metadata served on the metadata channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardMetadata {
    /// Shard identity.
    pub identity: Identity,
    /// Owning registry.
    pub parent: Identity,
    /// Name of the scalable store.
    pub name: String,
    /// First entry index.
    pub start_index: u64,
    /// Next entry index to assign.
    pub next_index: u64,
    /// Attendee records held.
    pub entry_count: u64,
    /// Capacity before the shard reports full.
    pub max_entries: u64,
}

/// Open transfers on a shard, for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferStatus {
    /// Chunks received on the upload channel.
    pub upload_chunks: usize,
    /// Time since the first upload chunk arrived.
    pub upload_age: Option<Duration>,
    /// Whether a finalized upload is waiting for `restore_data`.
    pub restore_pending: bool,
    /// Chunks in the prepared backup.
    pub backup_chunks: Option<u64>,
    /// Time since the backup was prepared.
    pub backup_age: Option<Duration>,
}

impl TransferStatus {
    /// Whether any channel is holding data.
    pub fn is_idle(&self) -> bool {
        self.upload_chunks == 0 && !self.restore_pending && self.backup_chunks.is_none()
    }
}

fn upload_not_started() -> ApiError {
    ApiError::bad_request(
        "UPLOAD_NOT_STARTED",
        "declare the chunk count with begin_upload first",
    )
}

fn no_backup() -> ApiError {
    ApiError::not_found(
        "NO_BACKUP",
        "no backup prepared, call canister_backup_data first",
    )
}

impl ChildShard {
    /// Encode the shard's full state into the backup channel.
    ///
    /// Replaces any backup prepared earlier. Returns the same checksum for the
    /// same state.
    pub async fn canister_backup_data(&self, caller: Identity) -> Result<BackupManifest, ApiError> {
        let result: Result<BackupManifest, ApiError> = async {
            self.require_parent(&caller)?;
            let mut state = self.state.lock().await;
            let snapshot = state.store.snapshot(&self.name);
            let payload = ChunkedPayload::new(codec::encode(&snapshot)?, self.config.chunk_size)?;
            let manifest = BackupManifest {
                checksum: payload.checksum(),
                version: format!("v{}", SNAPSHOT_FORMAT_VERSION),
                total_chunks: payload.total_chunks(),
                size: payload.len() as u64,
            };
            state.transfers.backup = Some(payload);
            tracing::info!(
                shard = %self.identity,
                entries = snapshot.entries.len(),
                chunks = manifest.total_chunks,
                "backup prepared"
            );
            Ok(manifest)
        }
        .await;
        self.finish("canister_backup_data", result)
    }

    /// Chunks in the prepared backup.
    pub async fn total_chunks(&self, caller: Identity) -> Result<u64, ApiError> {
        let result: Result<u64, ApiError> = async {
            self.require_parent(&caller)?;
            let state = self.state.lock().await;
            let backup = state.transfers.backup.as_ref().ok_or_else(no_backup)?;
            Ok(backup.total_chunks())
        }
        .await;
        self.finish("total_chunks", result)
    }

    /// One chunk of the prepared backup.
    pub async fn download_chunk(&self, caller: Identity, index: u64) -> Result<(u64, Vec<u8>), ApiError> {
        let result: Result<(u64, Vec<u8>), ApiError> = async {
            self.require_parent(&caller)?;
            let state = self.state.lock().await;
            let backup = state.transfers.backup.as_ref().ok_or_else(no_backup)?;
            let (index, bytes) = backup.chunk(index)?;
            Ok((index, bytes.to_vec()))
        }
        .await;
        self.finish("download_chunk", result)
    }

    async fn entries_payload(&self) -> Result<ChunkedPayload, ApiError> {
        let state = self.state.lock().await;
        let entries: Vec<_> = state.store.entries().cloned().collect();
        ChunkedPayload::new(codec::encode(&entries)?, self.config.chunk_size)
    }

    async fn metadata_payload(&self) -> Result<ChunkedPayload, ApiError> {
        let state = self.state.lock().await;
        let metadata = ShardMetadata {
            identity: self.identity,
            parent: self.parent,
            name: self.name.clone(),
            start_index: state.store.start_index(),
            next_index: state.store.next_index(),
            entry_count: state.store.len() as u64,
            max_entries: self.config.max_entries as u64,
        };
        ChunkedPayload::new(codec::encode(&metadata)?, self.config.chunk_size)
    }

    /// Chunks in the encoded entry list.
    pub async fn total_entries_chunks(&self, caller: Identity) -> Result<u64, ApiError> {
        let result: Result<u64, ApiError> = async {
            self.require_parent(&caller)?;
            Ok(self.entries_payload().await?.total_chunks())
        }
        .await;
        self.finish("total_entries_chunks", result)
    }

    /// One chunk of the encoded entry list.
    pub async fn download_entries_chunk(
        &self,
        caller: Identity,
        index: u64,
    ) -> Result<(u64, Vec<u8>), ApiError> {
        let result: Result<(u64, Vec<u8>), ApiError> = async {
            self.require_parent(&caller)?;
            let payload = self.entries_payload().await?;
            let (index, bytes) = payload.chunk(index)?;
            Ok((index, bytes.to_vec()))
        }
        .await;
        self.finish("download_entries_chunk", result)
    }

    /// Chunks in the encoded shard metadata.
    pub async fn total_metadata_chunks(&self, caller: Identity) -> Result<u64, ApiError> {
        let result: Result<u64, ApiError> = async {
            self.require_parent(&caller)?;
            Ok(self.metadata_payload().await?.total_chunks())
        }
        .await;
        self.finish("total_metadata_chunks", result)
    }

    /// One chunk of the encoded shard metadata.
    pub async fn download_metadata_chunk(
        &self,
        caller: Identity,
        index: u64,
    ) -> Result<(u64, Vec<u8>), ApiError> {
        let result: Result<(u64, Vec<u8>), ApiError> = async {
            self.require_parent(&caller)?;
            let payload = self.metadata_payload().await?;
            let (index, bytes) = payload.chunk(index)?;
            Ok((index, bytes.to_vec()))
        }
        .await;
        self.finish("download_metadata_chunk", result)
    }

    /// Open the upload channel for a payload of `total_chunks` chunks.
    ///
    /// Discards any upload in progress. A rejected call leaves the channel
    /// as it was.
    pub async fn begin_upload(&self, caller: Identity, total_chunks: u64) -> Result<(), ApiError> {
        let result: Result<(), ApiError> = async {
            self.require_parent(&caller)?;
            let mut upload = ChunkBuffer::new(self.config.chunk_size)?;
            upload.expect_total(total_chunks)?;
            let mut state = self.state.lock().await;
            state.transfers.upload = upload;
            tracing::debug!(shard = %self.identity, total_chunks, "upload started");
            Ok(())
        }
        .await;
        self.finish("begin_upload", result)
    }

    /// Receive one chunk of a restore payload.
    pub async fn upload_chunk(&self, caller: Identity, index: u64, bytes: Vec<u8>) -> Result<(), ApiError> {
        let result: Result<(), ApiError> = async {
            self.require_parent(&caller)?;
            let mut state = self.state.lock().await;
            if state.transfers.upload.expected_total().is_none() {
                return Err(upload_not_started());
            }
            state.transfers.upload.assemble(index, bytes)
        }
        .await;
        self.finish("upload_chunk", result)
    }

    /// Reassemble the uploaded chunks and hold them for `restore_data`.
    ///
    /// Returns the checksum of the reassembled payload.
    pub async fn finalize_upload(&self, caller: Identity) -> Result<String, ApiError> {
        let result: Result<String, ApiError> = async {
            self.require_parent(&caller)?;
            let mut state = self.state.lock().await;
            if state.transfers.upload.expected_total().is_none() {
                return Err(upload_not_started());
            }
            let payload = state.transfers.upload.finalize()?;
            let checksum = payload.checksum.clone();
            tracing::debug!(shard = %self.identity, size = payload.bytes.len(), %checksum, "upload finalized");
            state.transfers.finalized = Some(payload);
            Ok(checksum)
        }
        .await;
        self.finish("finalize_upload", result)
    }

    /// Replace the live store with the finalized upload.
    ///
    /// The finalized upload is consumed whether or not the restore succeeds.
    pub async fn restore_data(&self, caller: Identity) -> Result<(), ApiError> {
        let result: Result<(), ApiError> = async {
            self.require_parent(&caller)?;
            let mut state = self.state.lock().await;
            let payload = state.transfers.finalized.take().ok_or_else(|| {
                ApiError::bad_request(
                    "NO_FINALIZED_UPLOAD",
                    "upload and finalize a payload before restoring",
                )
            })?;

            let snapshot: ShardSnapshot = codec::decode(&payload.bytes)?;
            if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
                return Err(ApiError::update_required(
                    self.identity,
                    format!(
                        "snapshot format v{} is newer than supported v{}",
                        snapshot.format_version, SNAPSHOT_FORMAT_VERSION
                    ),
                ));
            }
            let start_index = state.store.start_index();
            let restored = AttendeeStore::from_snapshot(self.identity, start_index, &self.name, snapshot)?;

            let entries = restored.len();
            state.store = restored;
            self.metrics.restores_total.fetch_add(1, Ordering::Relaxed);
            tracing::info!(shard = %self.identity, entries, checksum = %payload.checksum, "shard restored");
            Ok(())
        }
        .await;
        self.finish("restore_data", result)
    }

    /// Drop the prepared backup and any upload in progress. Live state is
    /// never touched.
    pub async fn clear_backup(&self, caller: Identity) -> Result<(), ApiError> {
        let result: Result<(), ApiError> = async {
            self.require_parent(&caller)?;
            let mut state = self.state.lock().await;
            state.transfers.backup = None;
            state.transfers.finalized = None;
            state.transfers.upload.clear();
            Ok(())
        }
        .await;
        self.finish("clear_backup", result)
    }

    /// Open transfers and their age.
    pub async fn transfer_status(&self) -> TransferStatus {
        let state = self.state.lock().await;
        let transfers = &state.transfers;
        TransferStatus {
            upload_chunks: transfers.upload.received(),
            upload_age: transfers.upload.age(),
            restore_pending: transfers.finalized.is_some(),
            backup_chunks: transfers.backup.as_ref().map(|b| b.total_chunks()),
            backup_age: transfers.backup.as_ref().map(|b| b.age()),
        }
    }
}
