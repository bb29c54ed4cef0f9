//! Identity type for eventshard.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length in bytes of an [`Identity`].
pub const IDENTITY_LEN: usize = 29;

/// An opaque, globally unique actor address.
///
/// Used as the key for events, groups, attendees and shards, and as the
/// authenticated caller of every operation. 29 bytes, displayed as URL-safe
/// base64.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identity([u8; IDENTITY_LEN]);

impl Identity {
    /// The all-zero identity. Never authorized for mutations.
    pub const ANONYMOUS: Identity = Identity([0u8; IDENTITY_LEN]);

    /// Create a new random Identity.
    pub fn random() -> Self {
        let mut bytes = [0u8; IDENTITY_LEN];
        getrandom::getrandom(&mut bytes).expect("getrandom failed");
        Self(bytes)
    }

    /// Derive a deterministic identity from a namespace, a kind tag and an index.
    ///
    /// Shards use this to name their entries, so the same shard always
    /// produces the same identifier for the same entry index.
    pub fn derive(namespace: &Identity, kind: &str, index: u64) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(b"eventshard-identity-v1");
        hasher.update(namespace.0);
        hasher.update(kind.as_bytes());
        hasher.update(index.to_be_bytes());
        let result = hasher.finalize();
        let mut bytes = [0u8; IDENTITY_LEN];
        bytes.copy_from_slice(&result[..IDENTITY_LEN]);
        Self(bytes)
    }

    /// Create an Identity from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() == IDENTITY_LEN {
            let mut arr = [0u8; IDENTITY_LEN];
            arr.copy_from_slice(bytes);
            Some(Self(arr))
        } else {
            None
        }
    }

    /// Get the raw bytes of this Identity.
    pub fn as_bytes(&self) -> &[u8; IDENTITY_LEN] {
        &self.0
    }

    /// Whether this is the anonymous identity.
    pub fn is_anonymous(&self) -> bool {
        *self == Self::ANONYMOUS
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", URL_SAFE_NO_PAD.encode(self.0))
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", &self.to_string()[..8])
    }
}

/// Error returned when parsing an [`Identity`] from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityParseError {
    /// The text is not valid URL-safe base64.
    #[error("identity is not valid base64")]
    Encoding,
    /// The decoded bytes have the wrong length.
    #[error("identity must be {IDENTITY_LEN} bytes, got {0}")]
    Length(usize),
}

impl FromStr for Identity {
    type Err = IdentityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = URL_SAFE_NO_PAD
            .decode(s.trim())
            .map_err(|_| IdentityParseError::Encoding)?;
        Identity::from_bytes(&bytes).ok_or(IdentityParseError::Length(bytes.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_display_parses_back() {
        let id = Identity::random();
        let text = id.to_string();
        assert_eq!(text.parse::<Identity>().unwrap(), id);
    }

    #[test]
    fn identity_rejects_wrong_length() {
        let short = URL_SAFE_NO_PAD.encode([1u8; 8]);
        assert_eq!(
            short.parse::<Identity>(),
            Err(IdentityParseError::Length(8))
        );
        assert_eq!(
            "not base64!".parse::<Identity>(),
            Err(IdentityParseError::Encoding)
        );
    }

    #[test]
    fn derive_is_deterministic_per_index() {
        let shard = Identity::random();
        let a = Identity::derive(&shard, "eae", 7);
        let b = Identity::derive(&shard, "eae", 7);
        let c = Identity::derive(&shard, "eae", 8);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, Identity::derive(&Identity::random(), "eae", 7));
    }

    #[test]
    fn anonymous_is_all_zero() {
        assert!(Identity::ANONYMOUS.is_anonymous());
        assert!(!Identity::random().is_anonymous());
        assert_eq!(Identity::ANONYMOUS.as_bytes(), &[0u8; IDENTITY_LEN]);
    }

    #[test]
    fn identity_from_bytes() {
        let bytes = [3u8; IDENTITY_LEN];
        let id = Identity::from_bytes(&bytes).unwrap();
        assert_eq!(id.as_bytes(), &bytes);
        assert!(Identity::from_bytes(&[0u8; 32]).is_none());
    }
}
