//! Postal-code autofill: staleness, merge rules and code canonicalization

use backoffice_model::{canonicalize, AddressField, Mask, UserDraft, UserField, CEP_MASK, CPF_MASK, PHONE_MASK};
use backoffice_sync::{
    DependentLookup, EditBuffer, LookupController, LookupOutcome, LookupResult, SyncConfig, Transport,
};
use backoffice_test_utils::{curitiba, filled_user_draft, lookup_result, RecordingTransport};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const CEP: UserField = UserField::Address(AddressField::Cep);

fn lookup() -> (Arc<RecordingTransport>, LookupController<UserDraft>, EditBuffer<UserDraft>) {
    let transport = Arc::new(RecordingTransport::new());
    let dyn_transport: Arc<dyn Transport> = transport.clone();
    let controller = LookupController::new(dyn_transport, SyncConfig::default());
    (transport, controller, EditBuffer::from_draft(filled_user_draft()))
}

fn address(buffer: &EditBuffer<UserDraft>, field: AddressField) -> &str {
    buffer.field(UserField::Address(field))
}

#[tokio::test]
async fn complete_code_emits_canonical_search() {
    let (transport, mut controller, mut buffer) = lookup();

    buffer.set_field(CEP, "8001");
    assert_eq!(controller.on_source_change(&buffer, Instant::now()).unwrap(), None);
    assert!(transport.sent().is_empty());

    buffer.set_field(CEP, "80.010-000");
    assert!(controller.on_source_change(&buffer, Instant::now()).unwrap().is_some());
    assert_eq!(transport.count("lookup:search"), 1);
    assert_eq!(transport.last_payload(), serde_json::json!({ "code": "80010000" }));

    // same code again while in flight
    assert_eq!(controller.on_source_change(&buffer, Instant::now()).unwrap(), None);
    assert_eq!(transport.count("lookup:search"), 1);
}

#[tokio::test]
async fn result_for_an_edited_code_is_discarded() {
    let (_transport, mut controller, mut buffer) = lookup();
    buffer.set_field(CEP, "80010000");
    let request_id = controller.observe(buffer.field(CEP), Instant::now()).unwrap();

    // user keeps typing; the code is no longer complete
    buffer.set_field(CEP, "8001000");
    assert_eq!(controller.observe(buffer.field(CEP), Instant::now()).unwrap(), None);
    assert!(controller.is_pending());

    let outcome = controller.apply_result(&mut buffer, &LookupResult::found("80010000", curitiba()), request_id);
    assert_eq!(
        outcome,
        LookupOutcome::Discarded {
            code: "80010000".into()
        }
    );
    assert_eq!(address(&buffer, AddressField::Street), "");
    assert!(!controller.is_pending());
}

#[tokio::test]
async fn newer_code_supersedes_older_lookup() {
    let (transport, mut controller, mut buffer) = lookup();
    buffer.set_field(CEP, "80010000");
    let first = controller.observe(buffer.field(CEP), Instant::now()).unwrap();
    buffer.set_field(CEP, "01310100");
    let second = controller.observe(buffer.field(CEP), Instant::now()).unwrap();
    assert_eq!(transport.count("lookup:search"), 2);
    assert_eq!(controller.in_flight_code(), Some("01310100"));

    let stale = controller.apply_result(&mut buffer, &LookupResult::found("80010000", curitiba()), first);
    assert_eq!(stale, LookupOutcome::Ignored);
    assert!(controller.is_pending());

    let outcome = controller.apply_result(&mut buffer, &LookupResult::not_found("01310100"), second);
    assert_eq!(
        outcome,
        LookupOutcome::NotFound {
            code: "01310100".into()
        }
    );
    assert!(!controller.is_pending());
}

#[tokio::test]
async fn merge_fills_only_blank_fields() {
    let (_transport, mut controller, mut buffer) = lookup();
    buffer.set_field(UserField::Address(AddressField::Street), "Rua Minha");
    buffer.set_field(CEP, "80010000");
    let request_id = controller.observe(buffer.field(CEP), Instant::now()).unwrap();

    let envelope = lookup_result(&LookupResult::found("80010000", curitiba()), request_id);
    let outcome = controller.handle_envelope(&mut buffer, &envelope);

    assert_eq!(
        outcome,
        Some(LookupOutcome::Merged {
            filled: vec![
                UserField::Address(AddressField::District),
                UserField::Address(AddressField::City),
                UserField::Address(AddressField::Uf),
            ],
            focus: Some(UserField::Address(AddressField::Number)),
        })
    );
    assert_eq!(address(&buffer, AddressField::Street), "Rua Minha");
    assert_eq!(address(&buffer, AddressField::City), "Curitiba");
    assert_eq!(address(&buffer, AddressField::Uf), "PR");
}

#[tokio::test]
async fn no_focus_when_number_already_typed() {
    let (_transport, mut controller, mut buffer) = lookup();
    buffer.set_field(UserField::Address(AddressField::Number), "42");
    buffer.set_field(CEP, "80010000");
    let request_id = controller.observe(buffer.field(CEP), Instant::now()).unwrap();

    let outcome = controller.apply_result(&mut buffer, &LookupResult::found("80010000", curitiba()), request_id);
    assert!(matches!(outcome, LookupOutcome::Merged { focus: None, .. }));
}

#[tokio::test]
async fn unrelated_pushes_are_not_lookup_responses() {
    let (_transport, mut controller, mut buffer) = lookup();
    let envelope = backoffice_sync::Envelope::push("user:list", serde_json::json!([]));
    assert_eq!(controller.handle_envelope(&mut buffer, &envelope), None);

    let unsolicited = lookup_result(&LookupResult::found("80010000", curitiba()), None);
    assert_eq!(
        controller.handle_envelope(&mut buffer, &unsolicited),
        Some(LookupOutcome::Ignored)
    );
}

#[tokio::test]
async fn lookup_expires_and_resets_on_disconnect() {
    let (_transport, mut controller, mut buffer) = lookup();
    let start = Instant::now();
    buffer.set_field(CEP, "80010000");
    controller.observe(buffer.field(CEP), start).unwrap();

    assert_eq!(controller.next_deadline(), Some(start + Duration::from_millis(8_000)));
    assert!(controller.expire(start + Duration::from_millis(7_999)).is_none());
    assert!(controller.expire(start + Duration::from_millis(8_000)).is_some());
    assert!(!controller.is_pending());

    controller.observe("01310100", start).unwrap();
    assert!(controller.on_disconnect());
    assert!(!controller.on_disconnect());
}

proptest! {
    #[test]
    fn canonicalize_is_idempotent(input in ".{0,24}") {
        let once = canonicalize(&input);
        prop_assert_eq!(canonicalize(&once), once.clone());
        prop_assert!(once.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn masks_round_trip_digits(digits in "[0-9]{0,11}") {
        let cpf = CPF_MASK.format(&digits);
        prop_assert_eq!(canonicalize(&cpf), digits.clone());
        prop_assert_eq!(CPF_MASK.is_complete(&cpf), digits.len() == 11);

        let cep_digits: String = digits.chars().take(8).collect();
        let cep = CEP_MASK.format(&cep_digits);
        prop_assert_eq!(canonicalize(&cep), cep_digits);

        // formatting an already formatted value changes nothing
        let phone = PHONE_MASK.format(&digits);
        prop_assert_eq!(PHONE_MASK.format(&phone), phone);
    }
}
