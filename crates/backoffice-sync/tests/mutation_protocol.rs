//! Save/delete flag behaviour against a recording transport

use backoffice_store::{SharedStore, StoreChange, StorePush};
use backoffice_sync::{
    decode_entity_push, DeleteState, EditBuffer, Envelope, MutationController, MutationEvent, PendingKind, PushHub,
    Rejection, RejectionKind, SubmitOutcome, SyncConfig, SyncError, Transport, TransportError,
};
use backoffice_model::{RecordId, User, UserDraft, UserField};
use backoffice_test_utils::{
    deleted, filled_user_draft, rejected, sample_user, upserted, RecordingTransport,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

struct Fixture {
    transport: Arc<RecordingTransport>,
    hub: PushHub,
    store: SharedStore<User>,
    mutation: MutationController<User>,
}

fn fixture() -> Fixture {
    let transport = Arc::new(RecordingTransport::new());
    let hub = PushHub::new(16);
    let store = SharedStore::new();
    hub.attach(store.clone());
    let dyn_transport: Arc<dyn Transport> = transport.clone();
    let mutation = MutationController::new(dyn_transport, store.clone(), SyncConfig::default());
    Fixture {
        transport,
        hub,
        store,
        mutation,
    }
}

impl Fixture {
    /// Deliver a push the way the runtime does: hub first, then the form
    fn deliver(&mut self, envelope: Envelope) -> Option<MutationEvent<User>> {
        self.hub.publish(envelope.clone());
        let push = decode_entity_push::<User>(&envelope).unwrap().unwrap();
        self.mutation.handle_push(&push, envelope.request_id)
    }
}

#[tokio::test]
async fn repeated_upsert_leaves_store_unchanged() {
    let mut fx = fixture();
    let envelope = upserted("user", &sample_user(3), None);

    fx.deliver(envelope.clone());
    let revision = fx.store.revision();
    fx.deliver(envelope);

    assert_eq!(fx.store.len(), 1);
    assert_eq!(fx.store.revision(), revision);
    assert_eq!(fx.store.apply(StorePush::Upserted(sample_user(3))), StoreChange::Unchanged(RecordId(3)));
}

#[tokio::test]
async fn second_submit_while_pending_sends_nothing() {
    let mut fx = fixture();
    let buffer = EditBuffer::from_draft(filled_user_draft());
    let now = Instant::now();

    assert!(fx.mutation.submit(&buffer, now).unwrap().is_sent());
    assert_eq!(fx.mutation.submit(&buffer, now).unwrap(), SubmitOutcome::Busy);
    assert_eq!(fx.mutation.submit(&buffer, now).unwrap(), SubmitOutcome::Busy);

    assert_eq!(fx.transport.count("user:create"), 1);
    assert!(fx.mutation.is_pending(PendingKind::Save));
}

#[tokio::test]
async fn create_confirmed_by_push_with_server_id() {
    let mut fx = fixture();
    let buffer = EditBuffer::from_draft(filled_user_draft());
    let SubmitOutcome::Sent(request_id) = fx.mutation.submit(&buffer, Instant::now()).unwrap() else {
        panic!("expected a command");
    };

    let sent = fx.transport.last().unwrap();
    assert_eq!(sent.event, "user:create");
    assert_eq!(sent.payload["cpf"], "12345678900");
    assert!(sent.payload.get("id").is_none());

    let mut created = sample_user(9);
    created.cpf = "12345678900".into();
    let event = fx.deliver(upserted("user", &created, Some(request_id)));

    assert_eq!(
        event,
        Some(MutationEvent::Saved {
            record: created.clone(),
            created: true
        })
    );
    assert!(!fx.mutation.is_pending(PendingKind::Save));
    assert_eq!(fx.store.find(RecordId(9)), Some(created));
}

#[tokio::test]
async fn update_sends_id_and_matches_without_request_id() {
    let mut fx = fixture();
    let user = sample_user(5);
    let mut buffer = EditBuffer::<UserDraft>::for_record(&user);
    buffer.set_field(UserField::Name, "Renamed");

    fx.mutation.submit(&buffer, Instant::now()).unwrap();
    let sent = fx.transport.last().unwrap();
    assert_eq!(sent.event, "user:update");
    assert_eq!(sent.payload["id"], 5);

    // someone else's record does not answer our save
    let other = sample_user(6);
    assert_eq!(fx.deliver(upserted("user", &other, None)), None);
    assert!(fx.mutation.is_pending(PendingKind::Save));

    let mut renamed = user;
    renamed.name = "Renamed".into();
    let event = fx.deliver(upserted("user", &renamed, None));
    assert!(matches!(event, Some(MutationEvent::Saved { created: false, .. })));
    assert_eq!(fx.store.len(), 2);
}

#[tokio::test]
async fn conflict_releases_flag_and_keeps_edits() {
    let mut fx = fixture();
    let buffer = EditBuffer::from_draft(filled_user_draft());
    fx.mutation.submit(&buffer, Instant::now()).unwrap();

    let rejection = Rejection::conflict("cpf already registered");
    let event = fx.deliver(rejected("user", &rejection, None));

    assert_eq!(
        event,
        Some(MutationEvent::Rejected {
            kind: PendingKind::Save,
            rejection
        })
    );
    assert!(!fx.mutation.is_pending(PendingKind::Save));
    assert_eq!(buffer.field(UserField::Name), "Ana Souza");
    assert!(fx.store.is_empty());

    // edits kept, so a retry goes straight out
    assert!(fx.mutation.submit(&buffer, Instant::now()).unwrap().is_sent());
    assert_eq!(fx.transport.count("user:create"), 2);
}

#[tokio::test]
async fn invalid_draft_is_never_sent() {
    let mut fx = fixture();
    let buffer = EditBuffer::<UserDraft>::blank();

    let err = fx.mutation.submit(&buffer, Instant::now()).unwrap_err();
    let SyncError::Validation(errors) = err else {
        panic!("expected validation errors, got {err:?}");
    };
    assert!(errors.for_field("name").is_some());
    assert!(fx.transport.sent().is_empty());
    assert!(!fx.mutation.is_pending(PendingKind::Save));
}

#[tokio::test]
async fn refused_emit_keeps_flag_clear() {
    let mut fx = fixture();
    fx.transport.fail_with(Some(TransportError::Backpressure(64)));
    let buffer = EditBuffer::from_draft(filled_user_draft());

    let err = fx.mutation.submit(&buffer, Instant::now()).unwrap_err();
    assert!(err.is_retryable());
    assert!(!fx.mutation.is_pending(PendingKind::Save));

    fx.transport.fail_with(None);
    assert!(fx.mutation.submit(&buffer, Instant::now()).unwrap().is_sent());
}

#[tokio::test]
async fn delete_requires_confirmation() {
    let mut fx = fixture();
    fx.store.apply(StorePush::Upserted(sample_user(4)));

    let prompt = fx.mutation.request_delete(RecordId(4)).unwrap();
    assert_eq!(prompt.record, Some(RecordId(4)));
    assert!(fx.transport.sent().is_empty());

    fx.mutation.decline_delete().unwrap();
    assert_eq!(fx.mutation.delete_state(), DeleteState::Idle);
    assert!(fx.transport.sent().is_empty());
    assert!(fx.store.find(RecordId(4)).is_some());

    fx.mutation.request_delete(RecordId(4)).unwrap();
    let request_id = fx.mutation.confirm_delete(Instant::now()).unwrap();
    assert_eq!(fx.transport.count("user:delete"), 1);
    assert_eq!(fx.transport.last_payload(), serde_json::json!({ "id": 4 }));
    assert_eq!(fx.mutation.delete_state(), DeleteState::Pending(RecordId(4)));

    let event = fx.deliver(deleted("user", RecordId(4), Some(request_id)));
    assert_eq!(event, Some(MutationEvent::Deleted(RecordId(4))));
    assert_eq!(fx.mutation.delete_state(), DeleteState::Idle);
    assert!(fx.store.find(RecordId(4)).is_none());
}

#[tokio::test]
async fn confirm_without_prompt_is_an_error() {
    let mut fx = fixture();
    assert!(matches!(
        fx.mutation.confirm_delete(Instant::now()),
        Err(SyncError::NoPendingConfirmation)
    ));
    assert!(matches!(fx.mutation.decline_delete(), Err(SyncError::NoPendingConfirmation)));

    fx.mutation.request_delete(RecordId(1)).unwrap();
    assert!(matches!(
        fx.mutation.request_delete(RecordId(2)),
        Err(SyncError::Busy(PendingKind::Delete))
    ));
}

#[tokio::test]
async fn save_and_delete_flags_are_independent() {
    let mut fx = fixture();
    let user = sample_user(2);
    let buffer = EditBuffer::<UserDraft>::for_record(&user);

    fx.mutation.submit(&buffer, Instant::now()).unwrap();
    fx.mutation.request_delete(user.id).unwrap();
    fx.mutation.confirm_delete(Instant::now()).unwrap();

    assert!(fx.mutation.is_pending(PendingKind::Save));
    assert!(fx.mutation.is_pending(PendingKind::Delete));

    // a rejection naming no request goes to the save first
    let rejection = Rejection::invalid("bad phone");
    let event = fx.deliver(rejected("user", &rejection, None));
    assert!(matches!(
        event,
        Some(MutationEvent::Rejected {
            kind: PendingKind::Save,
            ..
        })
    ));
    assert!(fx.mutation.is_pending(PendingKind::Delete));

    let event = fx.deliver(rejected("user", &rejection, None));
    assert!(matches!(
        event,
        Some(MutationEvent::Rejected {
            kind: PendingKind::Delete,
            rejection: Rejection {
                kind: RejectionKind::Invalid,
                ..
            }
        })
    ));
    assert_eq!(fx.mutation.delete_state(), DeleteState::Idle);
}

#[tokio::test]
async fn pending_save_times_out() {
    let mut fx = fixture();
    let start = Instant::now();
    fx.mutation
        .submit(&EditBuffer::from_draft(filled_user_draft()), start)
        .unwrap();

    assert!(fx.mutation.expire(start + Duration::from_millis(9_999)).is_empty());
    let events = fx.mutation.expire(start + Duration::from_millis(10_000));
    assert_eq!(
        events,
        vec![MutationEvent::Failed {
            kind: PendingKind::Save,
            error: TransportError::Timeout {
                kind: PendingKind::Save,
                after_ms: 10_000
            }
        }]
    );
    assert!(!fx.mutation.is_pending(PendingKind::Save));
}

#[tokio::test]
async fn disconnect_releases_every_flag() {
    let mut fx = fixture();
    let user = sample_user(2);
    fx.mutation
        .submit(&EditBuffer::<UserDraft>::for_record(&user), Instant::now())
        .unwrap();
    fx.mutation.request_delete(user.id).unwrap();
    fx.mutation.confirm_delete(Instant::now()).unwrap();

    let events = fx.mutation.on_disconnect();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| matches!(
        e,
        MutationEvent::Failed {
            error: TransportError::Disconnected,
            ..
        }
    )));
    assert!(!fx.mutation.is_pending(PendingKind::Save));
    assert_eq!(fx.mutation.delete_state(), DeleteState::Idle);

    fx.transport.set_connected(false);
    let err = fx
        .mutation
        .submit(&EditBuffer::<UserDraft>::for_record(&user), Instant::now())
        .unwrap_err();
    assert!(matches!(err, SyncError::Transport(TransportError::Disconnected)));
}
