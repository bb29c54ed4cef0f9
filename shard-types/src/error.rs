//! Error taxonomy for eventshard.
//!
//! Every shard and registry operation returns `Result<T, ApiError>`. All
//! variants except [`ApiError::Unexpected`] are caller-actionable.

use crate::ids::Identity;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Details carried by most [`ApiError`] variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Machine-readable tag, e.g. `ALREADY_JOINED`.
    pub tag: String,
    /// Human-readable description.
    pub message: String,
    /// Inputs that led to the error, for diagnostics.
    pub inputs: Option<Vec<String>>,
    /// Where the error was raised (`shard-name/operation`).
    pub location: String,
}

impl fmt::Display for ErrorMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.tag, self.message)?;
        if !self.location.is_empty() {
            write!(f, " (at {})", self.location)?;
        }
        Ok(())
    }
}

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResponse {
    /// The offending field.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

/// Version mismatch details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMessage {
    /// The shard that needs an update.
    pub canister_principal: Identity,
    /// Human-readable description.
    pub message: String,
}

/// Errors returned by eventshard operations.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ApiError {
    /// Encoding a payload failed
    #[error("serialize error: {0}")]
    SerializeError(ErrorMessage),

    /// Decoding a payload failed (corrupt transfer or backup)
    #[error("deserialize error: {0}")]
    DeserializeError(ErrorMessage),

    /// Missing entity or relation
    #[error("not found: {0}")]
    NotFound(ErrorMessage),

    /// Structural or field-level validation failed
    #[error("validation failed: {}", format_validation(.0))]
    ValidationError(Vec<ValidationResponse>),

    /// Shard is full and no sibling has been spawned yet
    #[error("canister at capacity: {0}")]
    CanisterAtCapacity(ErrorMessage),

    /// Caller and shard versions do not match
    #[error("update required for {}: {}", .0.canister_principal, .0.message)]
    UpdateRequired(UpdateMessage),

    /// Caller lacks the required role
    #[error("unauthorized: {0}")]
    Unauthorized(ErrorMessage),

    /// Invariant violation or internal fault
    #[error("unexpected: {0}")]
    Unexpected(ErrorMessage),

    /// Well-formed but semantically invalid request
    #[error("bad request: {0}")]
    BadRequest(ErrorMessage),
}

fn format_validation(items: &[ValidationResponse]) -> String {
    items
        .iter()
        .map(|v| format!("{}: {}", v.field, v.message))
        .collect::<Vec<_>>()
        .join("; ")
}

fn message(tag: &str, text: impl Into<String>) -> ErrorMessage {
    ErrorMessage {
        tag: tag.to_string(),
        message: text.into(),
        inputs: None,
        location: String::new(),
    }
}

impl ApiError {
    /// Build a `NotFound` error.
    pub fn not_found(tag: &str, text: impl Into<String>) -> Self {
        Self::NotFound(message(tag, text))
    }

    /// Build a `BadRequest` error.
    pub fn bad_request(tag: &str, text: impl Into<String>) -> Self {
        Self::BadRequest(message(tag, text))
    }

    /// Build an `Unauthorized` error.
    pub fn unauthorized(tag: &str, text: impl Into<String>) -> Self {
        Self::Unauthorized(message(tag, text))
    }

    /// Build a `CanisterAtCapacity` error.
    pub fn at_capacity(tag: &str, text: impl Into<String>) -> Self {
        Self::CanisterAtCapacity(message(tag, text))
    }

    /// Build an `Unexpected` error.
    pub fn unexpected(tag: &str, text: impl Into<String>) -> Self {
        Self::Unexpected(message(tag, text))
    }

    /// Build a `SerializeError`.
    pub fn serialize(text: impl Into<String>) -> Self {
        Self::SerializeError(message("SERIALIZE_FAILED", text))
    }

    /// Build a `DeserializeError`.
    pub fn deserialize(text: impl Into<String>) -> Self {
        Self::DeserializeError(message("DESERIALIZE_FAILED", text))
    }

    /// Build a single-field `ValidationError`.
    pub fn validation(field: &str, text: impl Into<String>) -> Self {
        Self::ValidationError(vec![ValidationResponse {
            field: field.to_string(),
            message: text.into(),
        }])
    }

    /// Build an `UpdateRequired` error.
    pub fn update_required(canister_principal: Identity, text: impl Into<String>) -> Self {
        Self::UpdateRequired(UpdateMessage {
            canister_principal,
            message: text.into(),
        })
    }

    /// Attach the location the error was raised at.
    pub fn at(mut self, location: impl Into<String>) -> Self {
        if let Some(details) = self.details_mut() {
            details.location = location.into();
        }
        self
    }

    /// Attach the inputs that led to the error.
    pub fn with_inputs(mut self, inputs: Vec<String>) -> Self {
        if let Some(details) = self.details_mut() {
            details.inputs = Some(inputs);
        }
        self
    }

    /// The machine-readable tag, if this variant carries one.
    pub fn tag(&self) -> Option<&str> {
        self.details().map(|d| d.tag.as_str())
    }

    /// Whether a caller can act on this error (retry, fix input, back off).
    ///
    /// Only `Unexpected` is treated as non-recoverable.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ApiError::Unexpected(_))
    }

    fn details(&self) -> Option<&ErrorMessage> {
        match self {
            ApiError::SerializeError(m)
            | ApiError::DeserializeError(m)
            | ApiError::NotFound(m)
            | ApiError::CanisterAtCapacity(m)
            | ApiError::Unauthorized(m)
            | ApiError::Unexpected(m)
            | ApiError::BadRequest(m) => Some(m),
            ApiError::ValidationError(_) | ApiError::UpdateRequired(_) => None,
        }
    }

    fn details_mut(&mut self) -> Option<&mut ErrorMessage> {
        match self {
            ApiError::SerializeError(m)
            | ApiError::DeserializeError(m)
            | ApiError::NotFound(m)
            | ApiError::CanisterAtCapacity(m)
            | ApiError::Unauthorized(m)
            | ApiError::Unexpected(m)
            | ApiError::BadRequest(m) => Some(m),
            ApiError::ValidationError(_) | ApiError::UpdateRequired(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ApiError::bad_request("ALREADY_JOINED", "already part of this event")
            .at("attendees-0/join_event");
        assert_eq!(
            err.to_string(),
            "bad request: ALREADY_JOINED: already part of this event (at attendees-0/join_event)"
        );
    }

    #[test]
    fn validation_display_lists_fields() {
        let err = ApiError::ValidationError(vec![
            ValidationResponse {
                field: "index".into(),
                message: "missing".into(),
            },
            ValidationResponse {
                field: "bytes".into(),
                message: "too long".into(),
            },
        ]);
        assert_eq!(
            err.to_string(),
            "validation failed: index: missing; bytes: too long"
        );
    }

    #[test]
    fn only_unexpected_is_unrecoverable() {
        assert!(!ApiError::unexpected("BROKEN", "invariant").is_recoverable());
        assert!(ApiError::not_found("X", "y").is_recoverable());
        assert!(ApiError::at_capacity("FULL", "y").is_recoverable());
        assert!(ApiError::update_required(Identity::random(), "v2").is_recoverable());
    }

    #[test]
    fn builders_fill_details() {
        let err = ApiError::not_found("NO_INVITE_FOUND", "no invite")
            .with_inputs(vec!["event - abc".into()])
            .at("shard/accept");
        match err {
            ApiError::NotFound(m) => {
                assert_eq!(m.tag, "NO_INVITE_FOUND");
                assert_eq!(m.inputs, Some(vec!["event - abc".to_string()]));
                assert_eq!(m.location, "shard/accept");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn tag_is_absent_for_validation() {
        assert_eq!(ApiError::validation("limit", "zero").tag(), None);
        assert_eq!(ApiError::bad_request("X", "y").tag(), Some("X"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ApiError>();
    }
}
