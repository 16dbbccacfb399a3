//! Backoffice Model
//!
//! Typed records and their editable drafts for the retail back office:
//! - Server-owned records (`User`, `Address`, `Product`) keyed by `RecordId`
//! - Drafts: the editable, display-masked form of a record
//! - Masks that format raw digits for display and strip them back to
//!   canonical wire form
//! - Field validation run before any command leaves the client
//!
//! # Example
//!
//! ```rust
//! use backoffice_model::{Draft, UserDraft, UserField};
//!
//! let mut draft = UserDraft::default();
//! draft.set_field(UserField::Cpf, "12345678900".to_string());
//! assert_eq!(draft.field(UserField::Cpf), "123.456.789-00");
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod entity;
pub mod error;
pub mod id;
pub mod mask;
pub mod product;
pub mod user;
pub mod validation;

pub use entity::{Draft, Entity, PostalAddress, PostalLookupTarget};
pub use error::ModelError;
pub use id::RecordId;
pub use mask::{canonicalize, Mask, PatternMask, CEP_MASK, CPF_MASK, PHONE_MASK};
pub use product::{Product, ProductDraft, ProductField};
pub use user::{Address, AddressField, User, UserDraft, UserField, BRAZILIAN_STATES};
pub use validation::{ValidationError, ValidationErrors, ValidationKind};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with back-office records
    pub use crate::{
        canonicalize, Draft, Entity, Mask, ModelError, PostalLookupTarget, Product, ProductDraft,
        RecordId, User, UserDraft, ValidationErrors,
    };
}
