//! Testing utilities for the backoffice workspace
//!
//! Shared fixtures, a recording transport and push builders.

#![allow(missing_docs)]

use backoffice_model::{
    Address, Draft, PostalAddress, Product, ProductDraft, ProductField, RecordId, User, UserDraft, UserField,
};
use backoffice_sync::{Envelope, IdPayload, LookupResult, Rejection, RequestId, Transport, TransportError};
use parking_lot::Mutex;
use serde_json::Value;

pub fn sample_user(id: u64) -> User {
    User {
        id: RecordId(id),
        email: format!("user{id}@example.com"),
        password: "hunter2".into(),
        name: format!("User {id}"),
        cpf: format!("{id:011}"),
        birth: String::new(),
        phone: "41987654321".into(),
        pronoun: "Sra.".into(),
        admin: true,
        image: None,
        google_id: None,
        google_token: None,
        address: Some(Address {
            id: None,
            cep: "80010000".into(),
            street: "Rua XV de Novembro".into(),
            district: "Centro".into(),
            number: "100".into(),
            city: "Curitiba".into(),
            uf: "PR".into(),
            user_id: Some(RecordId(id)),
        }),
    }
}

pub fn sample_product(id: u64) -> Product {
    Product {
        id: RecordId(id),
        active: true,
        sku: format!("SKU-{id}"),
        name: format!("Product {id}"),
        description: String::new(),
        technical: String::new(),
        brand: "Acme".into(),
        stock: 10,
        price: 59.9,
        promotion: 0.0,
        profit: 0.0,
        cost: 0.0,
        rating: 0.0,
        ratings: 0,
        sold: 0,
        supplier_id: RecordId(1),
    }
}

/// Valid new-user draft with a blank address
pub fn filled_user_draft() -> UserDraft {
    let mut draft = UserDraft::default();
    draft.set_field(UserField::Name, "Ana Souza".into());
    draft.set_field(UserField::Cpf, "123.456.789-00".into());
    draft.set_field(UserField::Email, "ana@example.com".into());
    draft.set_field(UserField::Phone, "41987654321".into());
    draft.set_field(UserField::Pronoun, "Sra.".into());
    draft.set_field(UserField::Password, "hunter2".into());
    draft
}

pub fn filled_product_draft() -> ProductDraft {
    let mut draft = ProductDraft::default();
    draft.set_field(ProductField::Sku, "CAM-001".into());
    draft.set_field(ProductField::Name, "Camiseta".into());
    draft.set_field(ProductField::Price, "59,90".into());
    draft.set_field(ProductField::Stock, "12".into());
    draft.set_field(ProductField::SupplierId, "3".into());
    draft
}

pub fn curitiba() -> PostalAddress {
    PostalAddress {
        street: Some("Rua XV de Novembro".into()),
        district: Some("Centro".into()),
        city: Some("Curitiba".into()),
        uf: Some("PR".into()),
    }
}

pub fn upserted<T: serde::Serialize>(namespace: &str, record: &T, request_id: Option<RequestId>) -> Envelope {
    Envelope::new(
        format!("{namespace}:upserted"),
        request_id,
        serde_json::to_value(record).unwrap(),
    )
}

pub fn deleted(namespace: &str, id: RecordId, request_id: Option<RequestId>) -> Envelope {
    Envelope::new(
        format!("{namespace}:deleted"),
        request_id,
        serde_json::to_value(IdPayload { id }).unwrap(),
    )
}

pub fn rejected(namespace: &str, rejection: &Rejection, request_id: Option<RequestId>) -> Envelope {
    Envelope::new(
        format!("{namespace}:error"),
        request_id,
        serde_json::to_value(rejection).unwrap(),
    )
}

pub fn snapshot<T: serde::Serialize>(namespace: &str, records: &[T], request_id: Option<RequestId>) -> Envelope {
    Envelope::new(
        format!("{namespace}:list"),
        request_id,
        serde_json::to_value(records).unwrap(),
    )
}

pub fn lookup_result(result: &LookupResult, request_id: Option<RequestId>) -> Envelope {
    Envelope::new(
        backoffice_sync::LOOKUP_RESULT,
        request_id,
        serde_json::to_value(result).unwrap(),
    )
}

#[derive(Debug)]
struct Recorded {
    sent: Vec<Envelope>,
    connected: bool,
    failure: Option<TransportError>,
}

/// Transport that keeps every emitted envelope
#[derive(Debug)]
pub struct RecordingTransport {
    state: Mutex<Recorded>,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Recorded {
                sent: Vec::new(),
                connected: true,
                failure: None,
            }),
        }
    }

    pub fn sent(&self) -> Vec<Envelope> {
        self.state.lock().sent.clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.state.lock().sent.iter().filter(|e| e.event == event).count()
    }

    pub fn last(&self) -> Option<Envelope> {
        self.state.lock().sent.last().cloned()
    }

    pub fn last_payload(&self) -> Value {
        self.last().map(|e| e.payload).unwrap_or(Value::Null)
    }

    pub fn set_connected(&self, connected: bool) {
        self.state.lock().connected = connected;
    }

    /// Make every following emit fail with `error`; `None` restores it
    pub fn fail_with(&self, error: Option<TransportError>) {
        self.state.lock().failure = error;
    }
}

impl Transport for RecordingTransport {
    fn emit(&self, envelope: Envelope) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(TransportError::Disconnected);
        }
        if let Some(error) = state.failure.clone() {
            return Err(error);
        }
        state.sent.push(envelope);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }
}

/// Wire payload a draft produces, for asserting on commands
pub fn wire<D: Draft>(draft: &D) -> Value {
    draft.to_wire().unwrap()
}
