//! Error types for the model crate

use crate::validation::ValidationErrors;

/// Errors raised while converting between records, drafts and wire payloads
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// Draft failed field validation
    #[error("validation failed: {0}")]
    Invalid(#[from] ValidationErrors),

    /// Payload could not be encoded or decoded
    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

impl ModelError {
    /// Check whether this is a field validation failure
    #[inline]
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Invalid(_))
    }
}
