//! MessagePack encoding for transfer and backup payloads.

use crate::error::ApiError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode a value to MessagePack bytes.
///
/// Structs are encoded as maps so that payloads survive field reordering.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, ApiError> {
    rmp_serde::to_vec_named(value).map_err(|e| ApiError::serialize(e.to_string()))
}

/// Decode a value from MessagePack bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ApiError> {
    rmp_serde::from_slice(bytes).map_err(|e| ApiError::deserialize(e.to_string()))
}
