//! In-process server
//!
//! Answers commands the way the real back office does: assigns ids, refuses
//! duplicate CPF / e-mail / SKU, serves a postal-code directory and echoes
//! request ids. Used by integration tests and the simulator.

use crate::envelope::{
    Envelope, IdPayload, LookupRequest, LookupResult, RequestId, Verb, LOOKUP_RESULT, LOOKUP_SEARCH,
};
use crate::error::Rejection;
use crate::transport::PushHub;
use backoffice_model::{Entity, PostalAddress, Product, RecordId, User};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A record the server keeps a unique index on
pub trait ServerRecord: Entity {
    /// `(field, value)` pairs that must be unique across the collection
    fn unique_keys(&self) -> Vec<(&'static str, String)>;
}

impl ServerRecord for User {
    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        vec![("cpf", self.cpf.clone()), ("email", self.email.to_lowercase())]
    }
}

impl ServerRecord for Product {
    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        vec![("sku", self.sku.clone())]
    }
}

/// Server behaviour knobs
#[derive(Debug, Clone, Default)]
pub struct LoopbackConfig {
    /// Copy the command's request id onto its response
    pub echo_request_ids: bool,
    /// Delay before answering each command
    pub latency: Duration,
    /// Events the server swallows without answering
    pub silent: Vec<String>,
}

impl LoopbackConfig {
    /// Echoing server with no latency
    #[must_use]
    pub fn echoing() -> Self {
        Self {
            echo_request_ids: true,
            ..Self::default()
        }
    }

    /// Never answer `event`
    #[must_use]
    pub fn silence(mut self, event: impl Into<String>) -> Self {
        self.silent.push(event.into());
        self
    }

    /// Answer after `latency`
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[derive(Debug, Default)]
struct ServerState {
    users: IndexMap<RecordId, User>,
    products: IndexMap<RecordId, Product>,
    postal: HashMap<String, PostalAddress>,
    next_id: u64,
    received: Vec<Envelope>,
}

enum Answer {
    Upserted(Value),
    Deleted(RecordId),
    List(Value),
}

/// Cloneable handle to the in-process server
#[derive(Debug, Clone)]
pub struct LoopbackServer {
    state: Arc<Mutex<ServerState>>,
    hub: PushHub,
    config: LoopbackConfig,
}

impl LoopbackServer {
    /// Server publishing its answers on `hub`
    #[must_use]
    pub fn new(hub: PushHub, config: LoopbackConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(ServerState {
                next_id: 1,
                ..ServerState::default()
            })),
            hub,
            config,
        }
    }

    /// Register an address for a postal code
    #[must_use]
    pub fn with_postal_code(self, code: impl Into<String>, address: PostalAddress) -> Self {
        self.state.lock().postal.insert(code.into(), address);
        self
    }

    /// Seed the user table
    #[must_use]
    pub fn with_users(self, users: impl IntoIterator<Item = User>) -> Self {
        {
            let mut state = self.state.lock();
            for user in users {
                state.next_id = state.next_id.max(user.id.get() + 1);
                state.users.insert(user.id, user);
            }
        }
        self
    }

    /// Seed the product table
    #[must_use]
    pub fn with_products(self, products: impl IntoIterator<Item = Product>) -> Self {
        {
            let mut state = self.state.lock();
            for product in products {
                state.next_id = state.next_id.max(product.id.get() + 1);
                state.products.insert(product.id, product);
            }
        }
        self
    }

    /// Answer one command
    ///
    /// Returns the pushes to publish; empty for silenced or unknown events.
    pub fn handle(&self, command: Envelope) -> Vec<Envelope> {
        let mut state = self.state.lock();
        state.received.push(command.clone());

        if self.config.silent.iter().any(|e| *e == command.event) {
            tracing::debug!(event = %command.event, "loopback swallowing command");
            return Vec::new();
        }
        let request_id = command
            .request_id
            .filter(|_| self.config.echo_request_ids);

        if command.event == LOOKUP_SEARCH {
            return vec![Self::lookup(&state, &command, request_id)];
        }

        let (Some(namespace), Some(verb)) = (command.namespace(), command.verb()) else {
            tracing::warn!(event = %command.event, "loopback ignoring unknown event");
            return Vec::new();
        };
        let ServerState {
            users,
            products,
            next_id,
            ..
        } = &mut *state;
        let answer = if namespace == User::NAMESPACE {
            apply(users, next_id, verb, &command.payload)
        } else if namespace == Product::NAMESPACE {
            apply(products, next_id, verb, &command.payload)
        } else {
            tracing::warn!(event = %command.event, "loopback ignoring unknown namespace");
            return Vec::new();
        };

        let push = match answer {
            Some(Ok(Answer::Upserted(record))) => Envelope::new(Verb::Upserted.event_name(namespace), request_id, record),
            Some(Ok(Answer::Deleted(id))) => Envelope::new(
                Verb::Deleted.event_name(namespace),
                request_id,
                serde_json::to_value(IdPayload { id }).unwrap_or(Value::Null),
            ),
            Some(Ok(Answer::List(records))) => Envelope::new(Verb::List.event_name(namespace), request_id, records),
            Some(Err(rejection)) => Envelope::new(
                Verb::Error.event_name(namespace),
                request_id,
                serde_json::to_value(rejection).unwrap_or(Value::Null),
            ),
            None => return Vec::new(),
        };
        vec![push]
    }

    fn lookup(state: &ServerState, command: &Envelope, request_id: Option<RequestId>) -> Envelope {
        let code = command
            .decode_payload::<LookupRequest>()
            .map(|r| r.code)
            .unwrap_or_default();
        let result = match state.postal.get(&code) {
            Some(address) => LookupResult::found(code, address.clone()),
            None => LookupResult::not_found(code),
        };
        Envelope::new(
            LOOKUP_RESULT,
            request_id,
            serde_json::to_value(result).unwrap_or(Value::Null),
        )
    }

    /// Consume commands until the outbound channel closes
    pub async fn serve(self, mut outbound: mpsc::Receiver<Envelope>) {
        while let Some(command) = outbound.recv().await {
            if !self.config.latency.is_zero() {
                tokio::time::sleep(self.config.latency).await;
            }
            for push in self.handle(command) {
                self.hub.publish(push);
            }
        }
        tracing::debug!("loopback server stopped");
    }

    /// Serve on a background task
    pub fn spawn(&self, outbound: mpsc::Receiver<Envelope>) -> JoinHandle<()> {
        tokio::spawn(self.clone().serve(outbound))
    }

    /// Push something the client did not ask for
    pub fn broadcast(&self, push: Envelope) -> usize {
        self.hub.publish(push)
    }

    /// Every command received so far
    #[must_use]
    pub fn received(&self) -> Vec<Envelope> {
        self.state.lock().received.clone()
    }

    /// Number of commands received for `event`
    #[must_use]
    pub fn count(&self, event: &str) -> usize {
        self.state
            .lock()
            .received
            .iter()
            .filter(|e| e.event == event)
            .count()
    }

    /// Server-side users
    #[must_use]
    pub fn users(&self) -> Vec<User> {
        self.state.lock().users.values().cloned().collect()
    }

    /// Server-side products
    #[must_use]
    pub fn products(&self) -> Vec<Product> {
        self.state.lock().products.values().cloned().collect()
    }
}

fn apply<E: ServerRecord>(
    table: &mut IndexMap<RecordId, E>,
    next_id: &mut u64,
    verb: Verb,
    payload: &Value,
) -> Option<Result<Answer, Rejection>> {
    let answer = match verb {
        Verb::Create => create(table, next_id, payload),
        Verb::Update => update(table, payload),
        Verb::Delete => delete(table, payload),
        Verb::List => {
            let records: Vec<&E> = table.values().collect();
            serde_json::to_value(records)
                .map(Answer::List)
                .map_err(|e| Rejection::invalid(e.to_string()))
        }
        _ => return None,
    };
    Some(answer)
}

fn create<E: ServerRecord>(
    table: &mut IndexMap<RecordId, E>,
    next_id: &mut u64,
    payload: &Value,
) -> Result<Answer, Rejection> {
    let id = RecordId(*next_id);
    let mut body = payload.clone();
    let Some(fields) = body.as_object_mut() else {
        return Err(Rejection::invalid("payload must be an object"));
    };
    fields.insert("id".into(), Value::from(id.get()));

    let record: E = serde_json::from_value(body).map_err(|e| Rejection::invalid(e.to_string()))?;
    check_unique(table, &record)?;
    *next_id += 1;
    store(table, record)
}

fn update<E: ServerRecord>(table: &mut IndexMap<RecordId, E>, payload: &Value) -> Result<Answer, Rejection> {
    let record: E =
        serde_json::from_value(payload.clone()).map_err(|e| Rejection::invalid(e.to_string()))?;
    if !table.contains_key(&record.id()) {
        return Err(Rejection::invalid(format!("{} not found", record.id())).for_record(record.id()));
    }
    check_unique(table, &record)?;
    store(table, record)
}

fn delete<E: ServerRecord>(table: &mut IndexMap<RecordId, E>, payload: &Value) -> Result<Answer, Rejection> {
    let IdPayload { id } =
        serde_json::from_value(payload.clone()).map_err(|e| Rejection::invalid(e.to_string()))?;
    table
        .shift_remove(&id)
        .map(|_| Answer::Deleted(id))
        .ok_or_else(|| Rejection::invalid(format!("{id} not found")).for_record(id))
}

fn check_unique<E: ServerRecord>(table: &IndexMap<RecordId, E>, record: &E) -> Result<(), Rejection> {
    let keys = record.unique_keys();
    for other in table.values().filter(|other| other.id() != record.id()) {
        for ((field, value), (_, taken)) in keys.iter().zip(other.unique_keys()) {
            if *value == taken {
                let mut rejection = Rejection::conflict(format!("{field} already registered"));
                if table.contains_key(&record.id()) {
                    rejection = rejection.for_record(record.id());
                }
                return Err(rejection);
            }
        }
    }
    Ok(())
}

fn store<E: ServerRecord>(table: &mut IndexMap<RecordId, E>, record: E) -> Result<Answer, Rejection> {
    let value = serde_json::to_value(&record).map_err(|e| Rejection::invalid(e.to_string()))?;
    table.insert(record.id(), record);
    Ok(Answer::Upserted(value))
}
