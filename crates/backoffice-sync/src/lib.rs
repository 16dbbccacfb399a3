//! Backoffice Sync
//!
//! Optimistic mutation and push synchronization for back-office forms and
//! lists. Commands go out over an event channel; server pushes come back and
//! are the only thing that changes the client cache.
//!
//! # Architecture
//!
//! ```text
//! intent ──► MutationController ──► Transport ──► server
//!                  ▲                                 │
//!                  │ flag cleared                    ▼ push
//!             CorrelationTable ◄── view runtime ◄── PushHub ──► SharedStore, Session
//!                                                                   │
//!                                                                   ▼
//!                                                               re-render
//! ```
//!
//! The hub applies each push to the shared stores once, in arrival order,
//! before any view sees it. Views only resolve their own flags.
//!
//! - **MutationController**: one save and one delete flag per form
//! - **LookupController**: postal-code autofill, stale results dropped by value
//! - **ConfirmationGate**: destructive commands only after an explicit yes
//! - **ListController**: load once, then follow pushes
//! - **ViewRuntime**: one tokio task per mounted view
//!
//! # Example
//!
//! ```rust,ignore
//! use backoffice_sync::prelude::*;
//!
//! let (transport, outbound) = ChannelTransport::new(config.channel_capacity);
//! let transport: Arc<dyn Transport> = Arc::new(transport.clone());
//! let mutation = MutationController::new(transport.clone(), users.clone(), config);
//! let view = FormView::new(EditBuffer::blank(), mutation, ConfirmationGate::new(AutoConfirm(true)))
//!     .with_lookup(LookupController::new(transport, config));
//! hub.attach(users.clone());
//! let (handle, task) = spawn_view(view, &hub, connection);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod buffer;
pub mod config;
pub mod confirm;
pub mod correlation;
pub mod envelope;
pub mod error;
pub mod list;
pub mod lookup;
pub mod mutation;
pub mod runtime;
pub mod session;
pub mod transport;
pub mod view;

pub mod test_harness;

pub use buffer::{ChangeOrigin, EditBuffer, FieldChange, FieldSubscription};
pub use config::SyncConfig;
pub use confirm::{AutoConfirm, ChannelConfirmer, ConfirmationGate, ConfirmationRequest, Confirmer, Prompt};
pub use correlation::{CorrelationTable, Expectation, Observed, PendingEntry, PendingKind};
pub use envelope::{
    decode_entity_push, EntityPush, Envelope, IdPayload, LookupRequest, LookupResult, RequestId, Verb,
    LOOKUP_RESULT, LOOKUP_SEARCH,
};
pub use error::{ConfigError, Rejection, RejectionKind, SyncError, TransportError};
pub use list::{ListController, ListEvent};
pub use lookup::{DependentLookup, LookupController, LookupOutcome};
pub use mutation::{DeleteState, MutationController, MutationEvent, SubmitOutcome};
pub use runtime::{spawn_view, ViewHandle, ViewRuntime};
pub use session::Session;
pub use transport::{
    ChannelTransport, ConnectionState, Delivery, PushHub, PushSink, PushSubscription, Transport, JOURNAL_FACTOR,
};
pub use view::{FormIntent, FormView, ListIntent, ListView, View, ViewEffect};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for wiring views
    pub use crate::{
        spawn_view, AutoConfirm, ChannelTransport, ConfirmationGate, EditBuffer, FormIntent, FormView,
        ListController, ListIntent, ListView, LookupController, MutationController, PushHub, Session,
        SyncConfig, SyncError, Transport, ViewEffect,
    };
    pub use backoffice_model::prelude::*;
    pub use backoffice_store::SharedStore;
    pub use std::sync::Arc;
}
