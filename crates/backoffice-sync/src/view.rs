//! Views
//!
//! A view glues controllers to one screen: the form view owns an edit buffer,
//! a mutation controller and an optional dependent lookup; the list view owns
//! a list controller. Views never render; they report [`ViewEffect`]s for the
//! UI layer to act on.

use crate::buffer::{EditBuffer, FieldSubscription};
use crate::confirm::ConfirmationGate;
use crate::correlation::PendingKind;
use crate::envelope::{decode_entity_push, Envelope};
use crate::error::{Rejection, SyncError, TransportError};
use crate::list::{ListController, ListEvent};
use crate::lookup::{DependentLookup, LookupOutcome};
use crate::mutation::{MutationController, MutationEvent, SubmitOutcome};
use crate::transport::ConnectionState;
use async_trait::async_trait;
use backoffice_model::{Draft, Entity, RecordId, ValidationErrors};
use tokio::time::Instant;

/// Something the UI layer should do
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEffect {
    /// State changed; redraw
    Rerender,
    /// Move input focus to a field
    Focus(String),
    /// Save confirmed
    Saved {
        /// Record id
        id: RecordId,
        /// Whether it was created
        created: bool,
    },
    /// Delete confirmed
    Deleted(RecordId),
    /// Server refused; edits are kept
    Rejected(Rejection),
    /// Draft failed validation; nothing sent
    Invalid(ValidationErrors),
    /// A flag was released without an answer
    Failed {
        /// Flag released
        kind: PendingKind,
        /// Cause
        error: TransportError,
    },
    /// Intent ignored; same kind already in flight
    Busy(PendingKind),
    /// Lookup found nothing; address stays editable
    LookupNotFound(String),
    /// Delete prompt declined
    ConfirmationDeclined,
    /// List snapshot applied
    Loaded(usize),
    /// View is done and can unmount
    Closed,
}

/// A screen driven by the view runtime
#[async_trait]
pub trait View: Send {
    /// User intents this view accepts
    type Intent: Send + 'static;

    /// Called once when the runtime starts
    fn on_mount(&mut self, _now: Instant) -> Vec<ViewEffect> {
        Vec::new()
    }

    /// React to a server push
    fn on_push(&mut self, envelope: &Envelope, now: Instant) -> Vec<ViewEffect>;

    /// Pushes were lost; settle state from the shared store or ask again
    fn on_gap(&mut self, _now: Instant) -> Vec<ViewEffect> {
        Vec::new()
    }

    /// React to a user intent; may suspend (e.g. on a confirmation)
    async fn on_intent(&mut self, intent: Self::Intent) -> Vec<ViewEffect>;

    /// React to a connectivity change
    fn on_connection(&mut self, state: ConnectionState, now: Instant) -> Vec<ViewEffect>;

    /// Release flags whose deadline passed
    fn on_deadline(&mut self, now: Instant) -> Vec<ViewEffect>;

    /// Earliest flag deadline
    fn next_deadline(&self) -> Option<Instant>;

    /// Whether the view should unmount
    fn is_finished(&self) -> bool;
}

/// Form intents
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormIntent<F> {
    /// User typed into a field
    SetField(F, String),
    /// Save pressed
    Submit,
    /// Delete pressed for the record being edited
    Delete,
    /// Navigated away
    Close,
}

/// Create/edit screen for one record
pub struct FormView<E: Entity> {
    buffer: EditBuffer<E::Draft>,
    mutation: MutationController<E>,
    gate: ConfirmationGate,
    lookup: Option<Box<dyn DependentLookup<E::Draft>>>,
    lookup_source: Option<FieldSubscription<<E::Draft as Draft>::Field>>,
    finished: bool,
}

impl<E: Entity> std::fmt::Debug for FormView<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormView")
            .field("id", &self.buffer.id())
            .field("mutation", &self.mutation)
            .field("lookup_pending", &self.is_lookup_pending())
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl<E: Entity> FormView<E> {
    /// Form around a buffer
    pub fn new(
        buffer: EditBuffer<E::Draft>,
        mutation: MutationController<E>,
        gate: ConfirmationGate,
    ) -> Self {
        Self {
            buffer,
            mutation,
            gate,
            lookup: None,
            lookup_source: None,
            finished: false,
        }
    }

    /// Attach a dependent lookup, subscribed to its source field
    #[must_use]
    pub fn with_lookup(mut self, lookup: impl DependentLookup<E::Draft> + 'static) -> Self {
        self.lookup_source = Some(self.buffer.watch_field(lookup.source_field()));
        self.lookup = Some(Box::new(lookup));
        self
    }

    /// Edit buffer
    #[inline]
    #[must_use]
    pub fn buffer(&self) -> &EditBuffer<E::Draft> {
        &self.buffer
    }

    /// Mutation controller
    #[inline]
    #[must_use]
    pub fn mutation(&self) -> &MutationController<E> {
        &self.mutation
    }

    /// Whether a lookup is in flight
    #[must_use]
    pub fn is_lookup_pending(&self) -> bool {
        self.lookup.as_ref().is_some_and(|l| l.is_pending())
    }

    /// Whether any flag is held
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.mutation.is_pending(PendingKind::Save)
            || self.mutation.is_pending(PendingKind::Delete)
            || self.is_lookup_pending()
    }

    /// Apply a user edit and feed the lookup when its field changed
    pub fn set_field(&mut self, field: <E::Draft as Draft>::Field, value: String, now: Instant) -> Vec<ViewEffect> {
        if !self.buffer.set_field(field, value) {
            return Vec::new();
        }
        let mut effects = vec![ViewEffect::Rerender];

        let source_changed = self
            .lookup_source
            .as_mut()
            .and_then(FieldSubscription::try_latest)
            .is_some();
        if let (true, Some(lookup)) = (source_changed, self.lookup.as_mut()) {
            if let Err(err) = lookup.on_source_change(&self.buffer, now) {
                effects.push(error_effect(PendingKind::Lookup, err));
            }
        }
        effects
    }

    /// Submit the buffer
    pub fn submit(&mut self, now: Instant) -> Vec<ViewEffect> {
        match self.mutation.submit(&self.buffer, now) {
            Ok(SubmitOutcome::Sent(_)) => vec![ViewEffect::Rerender],
            Ok(SubmitOutcome::Busy) => vec![ViewEffect::Busy(PendingKind::Save)],
            Err(err) => vec![error_effect(PendingKind::Save, err)],
        }
    }

    /// Ask for confirmation, then delete the record being edited
    pub async fn delete(&mut self) -> Vec<ViewEffect> {
        let Some(id) = self.buffer.id() else {
            return Vec::new();
        };
        let prompt = match self.mutation.request_delete(id) {
            Ok(prompt) => prompt,
            Err(err) => return vec![error_effect(PendingKind::Delete, err)],
        };

        let mutation = &mut self.mutation;
        let answer = self
            .gate
            .guard(&prompt, || mutation.confirm_delete(Instant::now()))
            .await;
        match answer {
            Some(Ok(_)) => vec![ViewEffect::Rerender],
            Some(Err(err)) => vec![error_effect(PendingKind::Delete, err)],
            None => {
                // request_delete above opened the prompt
                let _ = self.mutation.decline_delete();
                vec![ViewEffect::ConfirmationDeclined]
            }
        }
    }

    fn mutation_effects(&mut self, event: MutationEvent<E>) -> Vec<ViewEffect> {
        match event {
            MutationEvent::Saved { record, created } => {
                self.finished = true;
                vec![
                    ViewEffect::Saved {
                        id: record.id(),
                        created,
                    },
                    ViewEffect::Closed,
                ]
            }
            MutationEvent::Deleted(id) => {
                self.finished = true;
                vec![ViewEffect::Deleted(id), ViewEffect::Closed]
            }
            MutationEvent::Rejected { rejection, .. } => vec![ViewEffect::Rejected(rejection)],
            MutationEvent::Failed { kind, error } => vec![ViewEffect::Failed { kind, error }],
        }
    }

    fn lookup_effects(outcome: LookupOutcome<<E::Draft as Draft>::Field>) -> Vec<ViewEffect> {
        match outcome {
            LookupOutcome::Merged { focus, .. } => {
                let mut effects = vec![ViewEffect::Rerender];
                effects.extend(focus.map(|field| ViewEffect::Focus(field.to_string())));
                effects
            }
            LookupOutcome::NotFound { code } => vec![ViewEffect::LookupNotFound(code), ViewEffect::Rerender],
            LookupOutcome::Discarded { .. } => vec![ViewEffect::Rerender],
            LookupOutcome::Ignored => Vec::new(),
        }
    }
}

fn error_effect(kind: PendingKind, err: SyncError) -> ViewEffect {
    match err {
        SyncError::Validation(errors) => ViewEffect::Invalid(errors),
        SyncError::Transport(error) => ViewEffect::Failed { kind, error },
        SyncError::Busy(kind) => ViewEffect::Busy(kind),
        SyncError::Rejected(rejection) => ViewEffect::Rejected(rejection),
        other => {
            tracing::warn!(%kind, error = %other, keeps_edits = other.keeps_edits(), "unexpected error");
            ViewEffect::Failed {
                kind,
                error: TransportError::Closed,
            }
        }
    }
}

#[async_trait]
impl<E: Entity> View for FormView<E> {
    type Intent = FormIntent<<E::Draft as Draft>::Field>;

    fn on_push(&mut self, envelope: &Envelope, _now: Instant) -> Vec<ViewEffect> {
        if let Some(lookup) = self.lookup.as_mut() {
            if let Some(outcome) = lookup.handle_envelope(&mut self.buffer, envelope) {
                return Self::lookup_effects(outcome);
            }
        }

        let push = match decode_entity_push::<E>(envelope) {
            Ok(Some(push)) => push,
            Ok(None) => return Vec::new(),
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed push");
                return Vec::new();
            }
        };
        match self.mutation.handle_push(&push, envelope.request_id) {
            Some(event) => self.mutation_effects(event),
            None => Vec::new(),
        }
    }

    fn on_gap(&mut self, _now: Instant) -> Vec<ViewEffect> {
        match self.mutation.reconcile() {
            Some(event) => self.mutation_effects(event),
            None => Vec::new(),
        }
    }

    async fn on_intent(&mut self, intent: Self::Intent) -> Vec<ViewEffect> {
        match intent {
            FormIntent::SetField(field, value) => self.set_field(field, value, Instant::now()),
            FormIntent::Submit => self.submit(Instant::now()),
            FormIntent::Delete => self.delete().await,
            FormIntent::Close => {
                self.finished = true;
                vec![ViewEffect::Closed]
            }
        }
    }

    fn on_connection(&mut self, state: ConnectionState, _now: Instant) -> Vec<ViewEffect> {
        if state.is_connected() {
            return Vec::new();
        }
        let mut effects: Vec<ViewEffect> = self
            .mutation
            .on_disconnect()
            .into_iter()
            .flat_map(|event| self.mutation_effects(event))
            .collect();
        if self.lookup.as_mut().is_some_and(|l| l.on_disconnect()) {
            effects.push(ViewEffect::Failed {
                kind: PendingKind::Lookup,
                error: TransportError::Disconnected,
            });
        }
        effects
    }

    fn on_deadline(&mut self, now: Instant) -> Vec<ViewEffect> {
        let mut effects: Vec<ViewEffect> = self
            .mutation
            .expire(now)
            .into_iter()
            .flat_map(|event| self.mutation_effects(event))
            .collect();
        if let Some(error) = self.lookup.as_mut().and_then(|l| l.expire(now)) {
            effects.push(ViewEffect::Failed {
                kind: PendingKind::Lookup,
                error,
            });
        }
        effects
    }

    fn next_deadline(&self) -> Option<Instant> {
        let lookup = self.lookup.as_ref().and_then(|l| l.next_deadline());
        [self.mutation.next_deadline(), lookup].into_iter().flatten().min()
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

/// List intents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListIntent {
    /// Request the collection again
    Reload,
    /// Navigated away
    Close,
}

/// Collection screen
#[derive(Debug)]
pub struct ListView<E: Entity> {
    list: ListController<E>,
    finished: bool,
}

impl<E: Entity> ListView<E> {
    /// List view around a controller
    pub fn new(list: ListController<E>) -> Self {
        Self {
            list,
            finished: false,
        }
    }

    /// Controller
    #[must_use]
    pub fn controller(&self) -> &ListController<E> {
        &self.list
    }

    fn load(&mut self, now: Instant) -> Vec<ViewEffect> {
        match self.list.mount(now) {
            Ok(Some(_)) => vec![ViewEffect::Rerender],
            Ok(None) => vec![ViewEffect::Busy(PendingKind::List)],
            Err(err) => vec![error_effect(PendingKind::List, err)],
        }
    }

    fn list_effects(event: ListEvent) -> Vec<ViewEffect> {
        match event {
            ListEvent::Loaded { rows, .. } => vec![ViewEffect::Loaded(rows), ViewEffect::Rerender],
            ListEvent::Changed(_) => vec![ViewEffect::Rerender],
            ListEvent::Failed(error) => vec![ViewEffect::Failed {
                kind: PendingKind::List,
                error,
            }],
        }
    }
}

#[async_trait]
impl<E: Entity> View for ListView<E> {
    type Intent = ListIntent;

    fn on_mount(&mut self, now: Instant) -> Vec<ViewEffect> {
        self.load(now)
    }

    fn on_push(&mut self, envelope: &Envelope, _now: Instant) -> Vec<ViewEffect> {
        match decode_entity_push::<E>(envelope) {
            Ok(Some(push)) => self
                .list
                .handle_push(&push, envelope.request_id)
                .map(Self::list_effects)
                .unwrap_or_default(),
            Ok(None) => Vec::new(),
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed push");
                Vec::new()
            }
        }
    }

    fn on_gap(&mut self, now: Instant) -> Vec<ViewEffect> {
        if self.list.is_loading() {
            return Vec::new();
        }
        tracing::info!(namespace = E::NAMESPACE, "reloading list after lost pushes");
        self.load(now)
    }

    async fn on_intent(&mut self, intent: ListIntent) -> Vec<ViewEffect> {
        match intent {
            ListIntent::Reload => self.load(Instant::now()),
            ListIntent::Close => {
                self.finished = true;
                vec![ViewEffect::Closed]
            }
        }
    }

    fn on_connection(&mut self, state: ConnectionState, _now: Instant) -> Vec<ViewEffect> {
        if state.is_connected() {
            return Vec::new();
        }
        self.list
            .on_disconnect()
            .map(Self::list_effects)
            .unwrap_or_default()
    }

    fn on_deadline(&mut self, now: Instant) -> Vec<ViewEffect> {
        self.list.expire(now).map(Self::list_effects).unwrap_or_default()
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.list.next_deadline()
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::confirm::AutoConfirm;
    use crate::envelope::LookupResult;
    use crate::lookup::LookupController;
    use crate::mutation::DeleteState;
    use crate::transport::ChannelTransport;
    use backoffice_model::{AddressField, PostalAddress, User, UserDraft, UserField};
    use backoffice_store::SharedStore;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    const CEP: UserField = UserField::Address(AddressField::Cep);

    fn form(confirm: bool) -> (FormView<User>, mpsc::Receiver<Envelope>) {
        let (transport, rx) = ChannelTransport::new(8);
        let transport: Arc<dyn crate::transport::Transport> = Arc::new(transport);
        let config = SyncConfig::default();
        let mutation = MutationController::new(Arc::clone(&transport), SharedStore::new(), config);
        let view = FormView::new(EditBuffer::blank(), mutation, ConfirmationGate::new(AutoConfirm(confirm)))
            .with_lookup(LookupController::<UserDraft>::new(transport, config));
        (view, rx)
    }

    #[tokio::test]
    async fn typing_a_complete_cep_emits_lookup() {
        let (mut view, mut rx) = form(true);

        let effects = view.on_intent(FormIntent::SetField(CEP, "01310".into())).await;
        assert_eq!(effects, vec![ViewEffect::Rerender]);
        assert!(rx.try_recv().is_err());

        view.on_intent(FormIntent::SetField(CEP, "01310100".into())).await;
        assert_eq!(rx.try_recv().unwrap().event, "lookup:search");
        assert!(view.is_lookup_pending());
        assert!(view.next_deadline().is_some());
    }

    #[tokio::test]
    async fn lookup_result_focuses_number() {
        let (mut view, mut rx) = form(true);
        view.on_intent(FormIntent::SetField(CEP, "01310100".into())).await;
        let request_id = rx.try_recv().unwrap().request_id;

        let result = LookupResult::found(
            "01310100",
            PostalAddress {
                street: Some("Avenida Paulista".into()),
                district: Some("Bela Vista".into()),
                city: Some("São Paulo".into()),
                uf: Some("SP".into()),
            },
        );
        let envelope = Envelope::new("lookup:result", request_id, serde_json::to_value(result).unwrap());
        let effects = view.on_push(&envelope, Instant::now());

        assert_eq!(
            effects,
            vec![ViewEffect::Rerender, ViewEffect::Focus("address.number".into())]
        );
        assert_eq!(view.buffer().field(UserField::Address(AddressField::City)), "São Paulo");
    }

    #[tokio::test]
    async fn invalid_submit_reports_fields() {
        let (mut view, mut rx) = form(true);
        let effects = view.on_intent(FormIntent::Submit).await;
        assert!(matches!(effects.as_slice(), [ViewEffect::Invalid(errors)] if !errors.is_empty()));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn declined_delete_sends_nothing() {
        let (transport, mut rx) = ChannelTransport::new(8);
        let record: User = serde_json::from_value(json!({
            "id": 4,
            "email": "ana@example.com",
            "password": "secret",
            "name": "Ana",
            "cpf": "12345678900",
            "phone": "41987654321",
            "pronoun": "Sra."
        }))
        .unwrap();
        let mutation = MutationController::<User>::new(Arc::new(transport), SharedStore::new(), SyncConfig::default());
        let mut view = FormView::new(
            EditBuffer::for_record(&record),
            mutation,
            ConfirmationGate::new(AutoConfirm(false)),
        );

        let effects = view.on_intent(FormIntent::Delete).await;
        assert_eq!(effects, vec![ViewEffect::ConfirmationDeclined]);
        assert_eq!(view.mutation().delete_state(), DeleteState::Idle);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn list_reloads_after_gap() {
        let (transport, mut rx) = ChannelTransport::new(8);
        let list = ListController::<User>::new(Arc::new(transport), SharedStore::new(), SyncConfig::default());
        let mut view = ListView::new(list);

        assert_eq!(view.on_gap(Instant::now()), vec![ViewEffect::Rerender]);
        assert_eq!(rx.try_recv().unwrap().event, "user:list");

        // already loading: the pending answer covers it
        assert!(view.on_gap(Instant::now()).is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_releases_lookup() {
        let (mut view, _rx) = form(true);
        view.on_intent(FormIntent::SetField(CEP, "01310100".into())).await;

        let effects = view.on_connection(ConnectionState::Disconnected, Instant::now());
        assert_eq!(
            effects,
            vec![ViewEffect::Failed {
                kind: PendingKind::Lookup,
                error: TransportError::Disconnected
            }]
        );
        assert!(!view.is_busy());
    }
}
