//! Mutation controller
//!
//! Turns form intents into single outbound commands and resolves the matching
//! pending flag when the server answers:
//! - `submit` emits `<ns>:create` or `<ns>:update` and holds the save flag
//!   until the matching `<ns>:upserted`
//! - `request_delete` / `confirm_delete` emit `<ns>:delete` only after an
//!   explicit confirmation and hold the delete flag until `<ns>:deleted`
//! - `<ns>:error` releases whichever flag it answers, keeping the buffer
//!
//! Flags are also released on deadline and on disconnect. The shared store is
//! only read here; the push hub applies every push to it before any view sees
//! it.

use crate::buffer::EditBuffer;
use crate::config::SyncConfig;
use crate::confirm::Prompt;
use crate::correlation::{CorrelationTable, Expectation, Observed, PendingEntry, PendingKind};
use crate::envelope::{EntityPush, Envelope, IdPayload, RequestId, Verb};
use crate::error::{Rejection, SyncError, TransportError};
use crate::transport::Transport;
use backoffice_model::{Draft, Entity, RecordId};
use backoffice_store::{SharedStore, StorePush};
use std::sync::Arc;
use tokio::time::Instant;

/// Delete path state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteState {
    /// Nothing requested
    Idle,
    /// Prompt shown, waiting for the user
    AwaitingConfirmation(RecordId),
    /// `<ns>:delete` emitted, waiting for `<ns>:deleted`
    Pending(RecordId),
}

/// Result of a submit that passed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Command emitted with this request id
    Sent(RequestId),
    /// A save was already in flight; nothing emitted
    Busy,
}

impl SubmitOutcome {
    /// Whether a command left the client
    #[inline]
    #[must_use]
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent(_))
    }
}

/// A flag resolution the view should react to
#[derive(Debug, Clone, PartialEq)]
pub enum MutationEvent<E> {
    /// Save confirmed by the server
    Saved {
        /// Record as stored
        record: E,
        /// Whether this was a create
        created: bool,
    },
    /// Delete confirmed by the server
    Deleted(RecordId),
    /// Server refused the command
    Rejected {
        /// Flag released
        kind: PendingKind,
        /// Server reason
        rejection: Rejection,
    },
    /// Flag released without an answer
    Failed {
        /// Flag released
        kind: PendingKind,
        /// Cause
        error: TransportError,
    },
}

/// Save and delete flags of one form view
pub struct MutationController<E: Entity> {
    transport: Arc<dyn Transport>,
    store: SharedStore<E>,
    config: SyncConfig,
    pending: CorrelationTable,
    delete: DeleteState,
}

impl<E: Entity> std::fmt::Debug for MutationController<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationController")
            .field("namespace", &E::NAMESPACE)
            .field("pending", &self.pending)
            .field("delete", &self.delete)
            .finish_non_exhaustive()
    }
}

impl<E: Entity> MutationController<E> {
    /// Controller with no flags set
    pub fn new(transport: Arc<dyn Transport>, store: SharedStore<E>, config: SyncConfig) -> Self {
        Self {
            transport,
            store,
            config,
            pending: CorrelationTable::new(),
            delete: DeleteState::Idle,
        }
    }

    /// Whether a command of `kind` is in flight
    #[inline]
    #[must_use]
    pub fn is_pending(&self, kind: PendingKind) -> bool {
        self.pending.is_pending(kind)
    }

    /// Delete path state
    #[inline]
    #[must_use]
    pub fn delete_state(&self) -> DeleteState {
        self.delete
    }

    /// In-flight entry for `kind`
    #[must_use]
    pub fn pending_entry(&self, kind: PendingKind) -> Option<&PendingEntry> {
        self.pending.get(kind)
    }

    /// Earliest deadline among held flags
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.next_deadline()
    }

    /// Validate, canonicalize and emit the buffer as one command
    ///
    /// Emits `<ns>:update` when the buffer carries an id, `<ns>:create`
    /// otherwise. While a save is in flight this is a no-op reported as
    /// [`SubmitOutcome::Busy`].
    ///
    /// # Errors
    /// - `SyncError::Validation` when the draft is incomplete; nothing sent
    /// - `SyncError::Transport` when the channel refused the command; the flag
    ///   stays clear so the user can retry
    pub fn submit(
        &mut self,
        buffer: &EditBuffer<E::Draft>,
        now: Instant,
    ) -> Result<SubmitOutcome, SyncError> {
        if self.pending.is_pending(PendingKind::Save) {
            tracing::debug!(namespace = E::NAMESPACE, "submit ignored, save in flight");
            return Ok(SubmitOutcome::Busy);
        }

        let payload = buffer.draft().to_wire()?;
        let id = buffer.id();
        let verb = if id.is_some() { Verb::Update } else { Verb::Create };

        let request_id = RequestId::new();
        let event = verb.event_name(E::NAMESPACE);
        let envelope = Envelope::new(event.clone(), Some(request_id), payload);
        self.transport.emit(envelope)?;

        let expectation = Expectation::event(Verb::Upserted.event_name(E::NAMESPACE)).with_id(id);
        self.pending.begin(
            PendingKind::Save,
            request_id,
            expectation,
            now,
            self.config.pending_timeout(),
        );
        tracing::info!(%event, %request_id, ?id, "emitted save");
        Ok(SubmitOutcome::Sent(request_id))
    }

    /// Start the delete path for a cached record
    ///
    /// Nothing is emitted; the returned prompt must be answered through
    /// [`confirm_delete`](Self::confirm_delete) or
    /// [`decline_delete`](Self::decline_delete).
    ///
    /// # Errors
    /// `SyncError::Busy` unless the delete path is idle
    pub fn request_delete(&mut self, id: RecordId) -> Result<Prompt, SyncError> {
        if self.delete != DeleteState::Idle {
            return Err(SyncError::Busy(PendingKind::Delete));
        }
        self.delete = DeleteState::AwaitingConfirmation(id);
        tracing::debug!(namespace = E::NAMESPACE, %id, "delete awaiting confirmation");
        Ok(Prompt::delete(E::NAMESPACE, id))
    }

    /// User affirmed: emit `<ns>:delete`
    ///
    /// # Errors
    /// - `SyncError::NoPendingConfirmation` when no prompt is open
    /// - `SyncError::Transport` when the channel refused; the path returns to
    ///   idle
    pub fn confirm_delete(&mut self, now: Instant) -> Result<RequestId, SyncError> {
        let DeleteState::AwaitingConfirmation(id) = self.delete else {
            return Err(SyncError::NoPendingConfirmation);
        };

        let payload = serde_json::to_value(IdPayload { id }).map_err(SyncError::Payload)?;
        let request_id = RequestId::new();
        let envelope = Envelope::new(Verb::Delete.event_name(E::NAMESPACE), Some(request_id), payload);

        if let Err(err) = self.transport.emit(envelope) {
            self.delete = DeleteState::Idle;
            return Err(err.into());
        }

        let expectation =
            Expectation::event(Verb::Deleted.event_name(E::NAMESPACE)).with_id(Some(id));
        self.pending.begin(
            PendingKind::Delete,
            request_id,
            expectation,
            now,
            self.config.pending_timeout(),
        );
        self.delete = DeleteState::Pending(id);
        tracing::info!(namespace = E::NAMESPACE, %id, %request_id, "emitted delete");
        Ok(request_id)
    }

    /// User declined: back to idle with no side effects
    ///
    /// # Errors
    /// `SyncError::NoPendingConfirmation` when no prompt is open
    pub fn decline_delete(&mut self) -> Result<(), SyncError> {
        match self.delete {
            DeleteState::AwaitingConfirmation(id) => {
                self.delete = DeleteState::Idle;
                tracing::debug!(namespace = E::NAMESPACE, %id, "delete declined");
                Ok(())
            }
            _ => Err(SyncError::NoPendingConfirmation),
        }
    }

    /// Resolve whichever flag a push answers
    ///
    /// Snapshots never resolve a mutation.
    pub fn handle_push(
        &mut self,
        push: &EntityPush<E>,
        request_id: Option<RequestId>,
    ) -> Option<MutationEvent<E>> {
        match push {
            EntityPush::Store(StorePush::Upserted(record)) => {
                let event = Verb::Upserted.event_name(E::NAMESPACE);
                let observed = Observed {
                    event: Some(&event),
                    request_id,
                    id: Some(record.id()),
                    code: None,
                };
                let entry = self.pending.correlate(PendingKind::Save, &observed)?;
                tracing::info!(
                    namespace = E::NAMESPACE,
                    id = %record.id(),
                    request_id = %entry.request_id,
                    "save resolved"
                );
                Some(MutationEvent::Saved {
                    record: record.clone(),
                    created: entry.expectation.id.is_none(),
                })
            }
            EntityPush::Store(StorePush::Deleted(id)) => {
                let event = Verb::Deleted.event_name(E::NAMESPACE);
                let observed = Observed {
                    event: Some(&event),
                    request_id,
                    id: Some(*id),
                    code: None,
                };
                self.pending.correlate(PendingKind::Delete, &observed)?;
                self.delete = DeleteState::Idle;
                tracing::info!(namespace = E::NAMESPACE, %id, "delete resolved");
                Some(MutationEvent::Deleted(*id))
            }
            EntityPush::Store(StorePush::Snapshot(_)) => None,
            EntityPush::Error(rejection) => self.handle_rejection(rejection, request_id),
        }
    }

    fn handle_rejection(
        &mut self,
        rejection: &Rejection,
        request_id: Option<RequestId>,
    ) -> Option<MutationEvent<E>> {
        let observed = Observed {
            event: None,
            request_id,
            id: rejection.id,
            code: None,
        };
        let kind = [PendingKind::Save, PendingKind::Delete]
            .into_iter()
            .find(|kind| self.pending.correlates(*kind, &observed));
        let Some(kind) = kind else {
            tracing::warn!(namespace = E::NAMESPACE, %rejection, "unmatched rejection");
            return None;
        };

        self.pending.resolve(kind);
        if kind == PendingKind::Delete {
            self.delete = DeleteState::Idle;
        }
        tracing::warn!(namespace = E::NAMESPACE, %kind, %rejection, "command rejected");
        Some(MutationEvent::Rejected {
            kind,
            rejection: rejection.clone(),
        })
    }

    /// Settle flags from the store after pushes were lost
    ///
    /// A pending delete whose record is gone from the store is resolved. A
    /// pending save is left to its deadline, since the store cannot tell our
    /// write from someone else's.
    pub fn reconcile(&mut self) -> Option<MutationEvent<E>> {
        let DeleteState::Pending(id) = self.delete else {
            return None;
        };
        if self.store.find(id).is_some() {
            return None;
        }
        self.pending.resolve(PendingKind::Delete)?;
        self.delete = DeleteState::Idle;
        tracing::info!(namespace = E::NAMESPACE, %id, "delete resolved from store");
        Some(MutationEvent::Deleted(id))
    }

    /// Release every flag whose deadline passed
    pub fn expire(&mut self, now: Instant) -> Vec<MutationEvent<E>> {
        let after_ms = self.config.pending_timeout_ms;
        let expired = self.pending.expire(now);
        expired
            .into_iter()
            .map(|entry| {
                tracing::warn!(
                    namespace = E::NAMESPACE,
                    kind = %entry.kind,
                    request_id = %entry.request_id,
                    "pending command timed out"
                );
                self.release(entry.kind, TransportError::Timeout {
                    kind: entry.kind,
                    after_ms,
                })
            })
            .collect()
    }

    /// Release every flag after the channel dropped
    pub fn on_disconnect(&mut self) -> Vec<MutationEvent<E>> {
        let cleared = self.pending.clear();
        if !cleared.is_empty() {
            tracing::warn!(namespace = E::NAMESPACE, count = cleared.len(), "flags reset on disconnect");
        }
        cleared
            .into_iter()
            .map(|entry| self.release(entry.kind, TransportError::Disconnected))
            .collect()
    }

    fn release(&mut self, kind: PendingKind, error: TransportError) -> MutationEvent<E> {
        if kind == PendingKind::Delete {
            self.delete = DeleteState::Idle;
        }
        MutationEvent::Failed { kind, error }
    }
}
