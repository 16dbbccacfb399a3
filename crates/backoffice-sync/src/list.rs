//! List controller
//!
//! Loads a collection once on mount and reports when pushes touch it. Rows
//! are always read from the shared store, never held locally; the store must
//! be attached to the push hub, which applies every push to it.

use crate::config::SyncConfig;
use crate::correlation::{CorrelationTable, Expectation, Observed, PendingKind};
use crate::envelope::{EntityPush, Envelope, RequestId, Verb};
use crate::error::{SyncError, TransportError};
use crate::transport::Transport;
use backoffice_model::{Entity, RecordId};
use backoffice_store::{SharedStore, StorePush};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::Instant;

/// What a push did to the list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEvent {
    /// Snapshot applied; `requested` when it answered our load
    Loaded {
        /// Rows now held
        rows: usize,
        /// Whether it cleared the loading flag
        requested: bool,
    },
    /// A record was upserted or deleted
    Changed(RecordId),
    /// Load released without an answer
    Failed(TransportError),
}

/// Loading flag and push handling of one list view
pub struct ListController<E: Entity> {
    transport: Arc<dyn Transport>,
    store: SharedStore<E>,
    config: SyncConfig,
    pending: CorrelationTable,
}

impl<E: Entity> std::fmt::Debug for ListController<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListController")
            .field("namespace", &E::NAMESPACE)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl<E: Entity> ListController<E> {
    /// Controller over a shared collection
    pub fn new(transport: Arc<dyn Transport>, store: SharedStore<E>, config: SyncConfig) -> Self {
        Self {
            transport,
            store,
            config,
            pending: CorrelationTable::new(),
        }
    }

    /// Request the collection
    ///
    /// Returns `None` when a load is already in flight.
    ///
    /// # Errors
    /// `SyncError::Transport` when the command could not be sent
    pub fn mount(&mut self, now: Instant) -> Result<Option<RequestId>, SyncError> {
        if self.pending.is_pending(PendingKind::List) {
            return Ok(None);
        }
        let event = Verb::List.event_name(E::NAMESPACE);
        let request_id = RequestId::new();
        self.transport
            .emit(Envelope::new(event.clone(), Some(request_id), Value::Null))?;
        self.pending.begin(
            PendingKind::List,
            request_id,
            Expectation::event(event.clone()),
            now,
            self.config.pending_timeout(),
        );
        tracing::info!(%event, %request_id, "requested list");
        Ok(Some(request_id))
    }

    /// Whether the load is in flight
    #[inline]
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.pending.is_pending(PendingKind::List)
    }

    /// Rows in display order
    #[must_use]
    pub fn rows(&self) -> Vec<E> {
        self.store.snapshot()
    }

    /// Shared collection behind the list
    #[must_use]
    pub fn store(&self) -> &SharedStore<E> {
        &self.store
    }

    /// Deadline of the load
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.next_deadline()
    }

    /// React to a push the hub already applied to the store
    pub fn handle_push(&mut self, push: &EntityPush<E>, request_id: Option<RequestId>) -> Option<ListEvent> {
        let EntityPush::Store(store_push) = push else {
            return None;
        };
        match store_push {
            StorePush::Snapshot(records) => {
                let event = Verb::List.event_name(E::NAMESPACE);
                let observed = Observed {
                    event: Some(&event),
                    request_id,
                    ..Observed::default()
                };
                let requested = self.pending.correlate(PendingKind::List, &observed).is_some();
                let rows = self.store.len();
                tracing::info!(namespace = E::NAMESPACE, rows, received = records.len(), requested, "list loaded");
                Some(ListEvent::Loaded { rows, requested })
            }
            StorePush::Upserted(record) => Some(ListEvent::Changed(record.id())),
            StorePush::Deleted(id) => Some(ListEvent::Changed(*id)),
        }
    }

    /// Release the loading flag if its deadline passed
    pub fn expire(&mut self, now: Instant) -> Option<ListEvent> {
        self.pending.expire(now).into_iter().next()?;
        tracing::warn!(namespace = E::NAMESPACE, "list load timed out");
        Some(ListEvent::Failed(TransportError::Timeout {
            kind: PendingKind::List,
            after_ms: self.config.pending_timeout_ms,
        }))
    }

    /// Release the loading flag after the channel dropped
    pub fn on_disconnect(&mut self) -> Option<ListEvent> {
        self.pending.clear().into_iter().next()?;
        tracing::warn!(namespace = E::NAMESPACE, "list load reset on disconnect");
        Some(ListEvent::Failed(TransportError::Disconnected))
    }
}
