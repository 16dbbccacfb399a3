//! Backoffice Store
//!
//! The client's current belief about server state, one collection per entity
//! type. Collections are mutated only by applying server pushes:
//!
//! - **Snapshot**: the `list` response replaces the whole collection
//! - **Upserted**: insert or replace by id, keeping existing positions
//! - **Deleted**: remove by id
//!
//! # Architecture
//!
//! ```text
//! push ──► EntityStore::apply ──► revision bump ──► watch subscribers re-render
//! ```
//!
//! [`SharedStore`] wraps a collection for process-wide sharing; views hold
//! clones of the handle and read through it.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod error;
pub mod shared;
pub mod store;

pub use error::StoreError;
pub use shared::SharedStore;
pub use store::{EntityStore, StoreChange, StorePush};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
