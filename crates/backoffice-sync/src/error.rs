//! Error types for the sync layer
//!
//! Nothing here is fatal to the process. Every variant leaves the view in an
//! editable state with its pending flag released:
//! - Validation failures never reach the wire
//! - Transport failures release the flag and can be retried
//! - Server rejections keep the edit buffer so no typing is lost
//! - An empty lookup leaves the address for manual entry

use crate::correlation::PendingKind;
use backoffice_model::{ModelError, RecordId, ValidationErrors};
use backoffice_store::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Main sync error type
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Draft failed field validation; nothing was sent
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    /// Channel unavailable or response overdue
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Server refused a create/update/delete
    #[error("rejected by server: {0}")]
    Rejected(Rejection),

    /// Lookup returned nothing for this code
    #[error("no address found for postal code {code}")]
    NotFound {
        /// Canonical code searched
        code: String,
    },

    /// A command of this kind is already in flight
    #[error("{0} already in flight")]
    Busy(PendingKind),

    /// Confirmation answered with no delete waiting for it
    #[error("no delete is awaiting confirmation")]
    NoPendingConfirmation,

    /// Push payload did not match the expected shape
    #[error("malformed {event} payload: {source}")]
    Decode {
        /// Event name
        event: String,
        /// Underlying decode error
        #[source]
        source: serde_json::Error,
    },

    /// Record missing from the client cache
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Payload could not be built
    #[error("payload error: {0}")]
    Payload(#[source] serde_json::Error),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl SyncError {
    /// Check if the user can simply try again
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Busy(_))
    }

    /// Check if the server refused the record as a duplicate
    #[inline]
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::Rejected(Rejection {
                kind: RejectionKind::Conflict,
                ..
            })
        )
    }

    /// Check if the form stays open with the user's edits intact
    #[inline]
    #[must_use]
    pub fn keeps_edits(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Transport(_) | Self::Rejected(_) | Self::NotFound { .. } | Self::Busy(_)
        )
    }

    /// Create decode error for an event
    pub fn decode(event: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            event: event.into(),
            source,
        }
    }
}

impl From<ModelError> for SyncError {
    fn from(value: ModelError) -> Self {
        match value {
            ModelError::Invalid(errors) => Self::Validation(errors),
            ModelError::Payload(source) => Self::Payload(source),
        }
    }
}

impl From<ValidationErrors> for SyncError {
    fn from(value: ValidationErrors) -> Self {
        Self::Validation(value)
    }
}

/// Transport errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Channel is down
    #[error("disconnected")]
    Disconnected,

    /// Channel was torn down for good
    #[error("channel closed")]
    Closed,

    /// Outbound queue is full
    #[error("outbound queue full (capacity {0})")]
    Backpressure(usize),

    /// No matching response before the deadline
    #[error("{kind} timed out after {after_ms}ms")]
    Timeout {
        /// Flag that expired
        kind: PendingKind,
        /// Configured timeout
        after_ms: u64,
    },
}

/// Why the server refused a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    /// Duplicate unique field (CPF, e-mail, SKU)
    Conflict,
    /// Server-side validation failed
    Invalid,
}

/// `<ns>:error` push payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Classification
    pub kind: RejectionKind,
    /// Human-readable reason
    pub message: String,
    /// Record the rejection refers to, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
}

impl Rejection {
    /// Duplicate-record rejection
    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            kind: RejectionKind::Conflict,
            message: message.into(),
            id: None,
        }
    }

    /// Server-side validation rejection
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            kind: RejectionKind::Invalid,
            message: message.into(),
            id: None,
        }
    }

    /// Attach the record id
    #[must_use]
    pub fn for_record(mut self, id: RecordId) -> Self {
        self.id = Some(id);
        self
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            RejectionKind::Conflict => write!(f, "conflict: {}", self.message),
            RejectionKind::Invalid => write!(f, "invalid: {}", self.message),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML could not be parsed
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Offending key
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// Config file could not be read
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use backoffice_model::ValidationError;

    #[test]
    fn sync_error_display() {
        let err = SyncError::Busy(PendingKind::Save);
        assert_eq!(err.to_string(), "save already in flight");

        let err = SyncError::Rejected(Rejection::conflict("cpf already registered"));
        assert!(err.to_string().contains("conflict: cpf already registered"));
    }

    #[test]
    fn sync_error_is_retryable() {
        assert!(SyncError::Transport(TransportError::Disconnected).is_retryable());
        assert!(SyncError::Busy(PendingKind::Delete).is_retryable());
        assert!(!SyncError::Rejected(Rejection::invalid("bad")).is_retryable());
        assert!(!SyncError::NotFound { code: "01310100".into() }.is_retryable());
    }

    #[test]
    fn user_facing_errors_keep_edits() {
        assert!(SyncError::Rejected(Rejection::conflict("dup")).keeps_edits());
        assert!(SyncError::Validation(ValidationErrors::new()).keeps_edits());
        assert!(SyncError::Transport(TransportError::Closed).keeps_edits());
        assert!(!SyncError::NoPendingConfirmation.keeps_edits());
    }

    #[test]
    fn model_validation_maps_to_validation() {
        let mut errors = ValidationErrors::new();
        errors.push(ValidationError::missing("name"));

        let err = SyncError::from(ModelError::Invalid(errors));
        assert!(matches!(err, SyncError::Validation(e) if e.len() == 1));
    }

    #[test]
    fn rejection_wire_shape() {
        let value = serde_json::to_value(Rejection::conflict("dup").for_record(RecordId(3))).unwrap();
        assert_eq!(value["kind"], "conflict");
        assert_eq!(value["id"], 3);

        let back: Rejection =
            serde_json::from_str(r#"{"kind":"invalid","message":"no"}"#).unwrap();
        assert_eq!(back, Rejection::invalid("no"));
    }

    #[test]
    fn conflict_detection() {
        assert!(SyncError::Rejected(Rejection::conflict("dup")).is_conflict());
        assert!(!SyncError::Rejected(Rejection::invalid("bad")).is_conflict());
    }
}
