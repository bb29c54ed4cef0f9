//! Chunked transfer codec.
//!
//! Large payloads cross shard boundaries as fixed-size chunks addressed by a
//! zero-based index:
//! - [`ChunkedPayload`] is the send side: it owns the bytes and serves chunks
//! - [`ChunkBuffer`] is the receive side: it collects chunks in any order
//!   and reassembles them on [`ChunkBuffer::finalize`]
//!
//! Each logical channel holds one transfer at a time. Neither side expires on
//! its own; both expose their age so a monitor can report abandoned
//! transfers.
//!
//! An empty payload is served as a single empty chunk, so a reader can always
//! fetch chunk 0 to learn the total.

use shard_types::ApiError;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Default chunk size in bytes (2MB).
pub const DEFAULT_CHUNK_SIZE: usize = 2_000_000;

/// Most missing indices named in one `finalize` error.
pub const MAX_REPORTED_MISSING: usize = 64;

/// Hex-encoded BLAKE3 digest of `bytes`.
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(blake3::hash(bytes).as_bytes())
}

fn require_chunk_size(chunk_size: usize) -> Result<(), ApiError> {
    if chunk_size == 0 {
        return Err(ApiError::validation(
            "chunk_size",
            "chunk size must be greater than zero",
        ));
    }
    Ok(())
}

/// Outgoing payload split into fixed-size chunks.
#[derive(Debug, Clone)]
pub struct ChunkedPayload {
    bytes: Vec<u8>,
    chunk_size: usize,
    opened_at: Instant,
}

impl ChunkedPayload {
    /// Wrap `bytes` for chunked download.
    ///
    /// Returns a validation error if `chunk_size` is zero.
    pub fn new(bytes: Vec<u8>, chunk_size: usize) -> Result<Self, ApiError> {
        require_chunk_size(chunk_size)?;
        Ok(Self {
            bytes,
            chunk_size,
            opened_at: Instant::now(),
        })
    }

    /// Number of chunks, at least one.
    pub fn total_chunks(&self) -> u64 {
        if self.bytes.is_empty() {
            1
        } else {
            self.bytes.len().div_ceil(self.chunk_size) as u64
        }
    }

    /// Chunk `index` as `(index, bytes)`.
    ///
    /// Returns `NotFound` if `index >= total_chunks()`.
    pub fn chunk(&self, index: u64) -> Result<(u64, &[u8]), ApiError> {
        let total = self.total_chunks();
        if index >= total {
            return Err(ApiError::not_found(
                "CHUNK_NOT_FOUND",
                format!("chunk {} requested, payload has {} chunks", index, total),
            ));
        }
        let start = index as usize * self.chunk_size;
        let end = (start + self.chunk_size).min(self.bytes.len());
        Ok((index, &self.bytes[start..end]))
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the payload has no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The whole payload.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Checksum of the whole payload.
    pub fn checksum(&self) -> String {
        checksum(&self.bytes)
    }

    /// Time since the payload was prepared.
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }
}

/// A fully reassembled payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedPayload {
    /// Reassembled bytes.
    pub bytes: Vec<u8>,
    /// Hex BLAKE3 digest of `bytes`.
    pub checksum: String,
}

/// Incoming chunks for one transfer channel.
#[derive(Debug)]
pub struct ChunkBuffer {
    chunk_size: usize,
    expected: Option<u64>,
    chunks: BTreeMap<u64, Vec<u8>>,
    opened_at: Option<Instant>,
}

impl ChunkBuffer {
    /// Create an empty buffer that accepts chunks up to `chunk_size` bytes.
    pub fn new(chunk_size: usize) -> Result<Self, ApiError> {
        require_chunk_size(chunk_size)?;
        Ok(Self {
            chunk_size,
            expected: None,
            chunks: BTreeMap::new(),
            opened_at: None,
        })
    }

    /// Declare how many chunks the transfer has.
    ///
    /// Without a declared total, `finalize` accepts any contiguous run
    /// starting at chunk 0.
    pub fn expect_total(&mut self, total: u64) -> Result<(), ApiError> {
        if total == 0 {
            return Err(ApiError::validation(
                "total_chunks",
                "a transfer has at least one chunk",
            ));
        }
        if let Some((&highest, _)) = self.chunks.last_key_value() {
            if highest >= total {
                return Err(ApiError::validation(
                    "total_chunks",
                    format!("chunk {} already received beyond total {}", highest, total),
                ));
            }
        }
        self.expected = Some(total);
        Ok(())
    }

    /// The declared total, if any.
    pub fn expected_total(&self) -> Option<u64> {
        self.expected
    }

    /// Insert or overwrite chunk `index`.
    ///
    /// Chunks may arrive in any order. A rejected chunk leaves the buffer
    /// unchanged.
    pub fn assemble(&mut self, index: u64, bytes: Vec<u8>) -> Result<(), ApiError> {
        if bytes.len() > self.chunk_size {
            return Err(ApiError::validation(
                "bytes",
                format!(
                    "chunk {} is {} bytes, limit is {}",
                    index,
                    bytes.len(),
                    self.chunk_size
                ),
            ));
        }
        if let Some(total) = self.expected {
            if index >= total {
                return Err(ApiError::validation(
                    "index",
                    format!("chunk {} is beyond total {}", index, total),
                ));
            }
        }
        self.opened_at.get_or_insert_with(Instant::now);
        self.chunks.insert(index, bytes);
        Ok(())
    }

    /// Indices still missing before the buffer can be finalized, lowest
    /// first and at most [`MAX_REPORTED_MISSING`] of them.
    pub fn missing(&self) -> Vec<u64> {
        let upper = match (self.expected, self.chunks.last_key_value()) {
            (Some(total), _) => total,
            (None, Some((&highest, _))) => highest.saturating_add(1),
            (None, None) => 1,
        };
        (0..upper)
            .filter(|index| !self.chunks.contains_key(index))
            .take(MAX_REPORTED_MISSING)
            .collect()
    }

    /// Reassemble the payload and reset the buffer.
    ///
    /// Returns a validation error naming the missing indices; the buffer is
    /// kept so the missing chunks can still be delivered.
    pub fn finalize(&mut self) -> Result<FinalizedPayload, ApiError> {
        let missing = self.missing();
        if !missing.is_empty() {
            return Err(ApiError::ValidationError(
                missing
                    .into_iter()
                    .map(|index| shard_types::ValidationResponse {
                        field: format!("chunk[{}]", index),
                        message: "chunk not received".to_string(),
                    })
                    .collect(),
            ));
        }

        let chunks = std::mem::take(&mut self.chunks);
        self.expected = None;
        self.opened_at = None;

        let bytes: Vec<u8> = chunks.into_values().flatten().collect();
        let checksum = checksum(&bytes);
        Ok(FinalizedPayload { bytes, checksum })
    }

    /// Discard everything received so far. Always succeeds.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.expected = None;
        self.opened_at = None;
    }

    /// Number of chunks received.
    pub fn received(&self) -> usize {
        self.chunks.len()
    }

    /// Whether no chunks have been received.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Time since the first chunk arrived, if a transfer is in flight.
    pub fn age(&self) -> Option<Duration> {
        self.opened_at.map(|opened| opened.elapsed())
    }
}
