//! Field validation
//!
//! Validation runs on the draft before it is canonicalized. Every failing
//! field is reported at once so the form can mark them all inline.

use std::fmt;

/// Why a field was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationKind {
    /// Required field is empty
    Missing,
    /// Field has a value of the wrong shape
    Malformed(String),
    /// Field depends on a lookup that has not filled it yet
    Unresolved,
}

/// A single rejected field
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {kind}")]
pub struct ValidationError {
    /// Field path as shown by the form, e.g. `address.cep`
    pub field: String,
    /// Reason
    pub kind: ValidationKind,
}

impl ValidationError {
    /// Required field is empty
    pub fn missing(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            kind: ValidationKind::Missing,
        }
    }

    /// Field value has the wrong shape
    pub fn malformed(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            kind: ValidationKind::Malformed(reason.into()),
        }
    }

    /// Field still waits for a dependent lookup
    pub fn unresolved(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            kind: ValidationKind::Unresolved,
        }
    }
}

impl fmt::Display for ValidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "required"),
            Self::Malformed(reason) => write!(f, "malformed ({reason})"),
            Self::Unresolved => write!(f, "not resolved yet"),
        }
    }
}

/// All fields rejected by one validation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: Vec<ValidationError>,
}

impl ValidationErrors {
    /// Empty collection
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a rejected field
    pub fn push(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    /// Reject `field` as missing when `value` is blank
    pub fn require(&mut self, field: &str, value: &str) -> bool {
        if value.trim().is_empty() {
            self.push(ValidationError::missing(field));
            false
        } else {
            true
        }
    }

    /// Whether nothing was rejected
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of rejected fields
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Find the rejection for a field path
    #[must_use]
    pub fn for_field(&self, field: &str) -> Option<&ValidationError> {
        self.errors.iter().find(|e| e.field == field)
    }

    /// Iterate rejections in the order they were found
    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.errors.iter()
    }

    /// `Ok(())` when empty, otherwise `Err(self)`
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for error in &self.errors {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{error}")?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_reports_blank_fields_only() {
        let mut errors = ValidationErrors::new();
        assert!(errors.require("name", "Ana"));
        assert!(!errors.require("password", "   "));

        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors.for_field("password").map(|e| &e.kind),
            Some(&ValidationKind::Missing)
        );
    }

    #[test]
    fn display_joins_every_field() {
        let mut errors = ValidationErrors::new();
        errors.push(ValidationError::missing("name"));
        errors.push(ValidationError::malformed("cpf", "expected 11 digits"));

        let text = errors.to_string();
        assert!(text.contains("name: required"));
        assert!(text.contains("cpf: malformed (expected 11 digits)"));
    }

    #[test]
    fn into_result_is_ok_when_empty() {
        assert!(ValidationErrors::new().into_result().is_ok());
    }
}
