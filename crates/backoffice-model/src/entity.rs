//! Entity and draft traits
//!
//! An [`Entity`] is the server-authoritative record kept in the client cache.
//! Its [`Draft`] is the editable form of that record: display-masked, possibly
//! without an id, and convertible into a canonical wire payload.

use crate::error::ModelError;
use crate::id::RecordId;
use crate::validation::ValidationErrors;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};
use std::hash::Hash;

/// A record type synchronized with the server
pub trait Entity:
    Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Event namespace, e.g. `user` for `user:update`
    const NAMESPACE: &'static str;

    /// Editable form of this record
    type Draft: Draft<Entity = Self>;

    /// Server-assigned identity
    fn id(&self) -> RecordId;
}

/// Editable working copy of an entity
///
/// `Default` yields the blank draft used by the "new record" form.
pub trait Draft: Clone + Debug + Default + Send + Sync + 'static {
    /// Record type this draft edits
    type Entity: Entity<Draft = Self>;

    /// Text fields the form exposes
    type Field: Copy + Eq + Hash + Debug + Display + Send + Sync + 'static;

    /// Seed a draft from a cached record, masking fields for display
    fn from_record(record: &Self::Entity) -> Self;

    /// Identity of the record being edited, `None` for a new record
    fn id(&self) -> Option<RecordId>;

    /// Current display value of a field
    fn field(&self, field: Self::Field) -> &str;

    /// Replace a field value; masked fields are reformatted
    fn set_field(&mut self, field: Self::Field, value: String);

    /// Check required fields and value shapes
    ///
    /// # Errors
    /// Every rejected field, collected in one pass
    fn validate(&self) -> Result<(), ValidationErrors>;

    /// Canonical wire payload: masks stripped, id included when present
    ///
    /// # Errors
    /// `ModelError::Invalid` when validation fails
    fn to_wire(&self) -> Result<serde_json::Value, ModelError>;
}

/// Address fields returned by a postal-code lookup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostalAddress {
    /// Street name
    #[serde(default)]
    pub street: Option<String>,
    /// District / neighbourhood
    #[serde(default)]
    pub district: Option<String>,
    /// City
    #[serde(default)]
    pub city: Option<String>,
    /// Two-letter state code
    #[serde(default)]
    pub uf: Option<String>,
}

/// A draft with a postal code that can autofill its address
pub trait PostalLookupTarget: Draft {
    /// Field holding the postal code
    const POSTAL_CODE: Self::Field;

    /// Field that should take focus after a successful fill, if still empty
    const FOCUS_AFTER_LOOKUP: Self::Field;

    /// Fill empty address fields from a lookup result
    ///
    /// Non-empty fields are left untouched. Returns the fields written.
    fn merge_lookup(&mut self, address: &PostalAddress) -> Vec<Self::Field>;
}

/// Write `value` into `slot` only when the slot is blank
pub(crate) fn fill_if_blank(slot: &mut String, value: Option<&String>) -> bool {
    match value {
        Some(v) if slot.trim().is_empty() && !v.trim().is_empty() => {
            *slot = v.trim().to_string();
            true
        }
        _ => false,
    }
}
