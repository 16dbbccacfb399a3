//! Wire envelopes
//!
//! Every message on the channel is a JSON object
//! `{ "event": "<ns>:<verb>", "request_id"?: <ulid>, "payload": ... }`.
//! Commands carry a fresh request id; servers may echo it on the response.

use crate::error::{Rejection, SyncError};
use backoffice_model::{Entity, PostalAddress, RecordId};
use backoffice_store::StorePush;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Lookup command event
pub const LOOKUP_SEARCH: &str = "lookup:search";

/// Lookup response event
pub const LOOKUP_RESULT: &str = "lookup:result";

/// Correlation token attached to outbound commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Ulid);

impl RequestId {
    /// Fresh, time-ordered id
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Underlying ULID
    #[inline]
    #[must_use]
    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

/// Event verbs under an entity namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// Command: create a record
    Create,
    /// Command: update a record
    Update,
    /// Command: delete a record
    Delete,
    /// Command and push: full collection
    List,
    /// Push: record created or updated
    Upserted,
    /// Push: record removed
    Deleted,
    /// Push: mutation rejected
    Error,
}

impl Verb {
    /// Wire suffix
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::List => "list",
            Self::Upserted => "upserted",
            Self::Deleted => "deleted",
            Self::Error => "error",
        }
    }

    /// Full event name under a namespace
    #[must_use]
    pub fn event_name(&self, namespace: &str) -> String {
        format!("{namespace}:{}", self.as_str())
    }

    /// Parse a wire suffix
    #[must_use]
    pub fn parse(suffix: &str) -> Option<Self> {
        match suffix {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            "list" => Some(Self::List),
            "upserted" => Some(Self::Upserted),
            "deleted" => Some(Self::Deleted),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message on the channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// `<namespace>:<verb>`
    pub event: String,
    /// Correlation token, when the sender provided one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    /// Event body
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    /// Envelope with every part given
    pub fn new(event: impl Into<String>, request_id: Option<RequestId>, payload: Value) -> Self {
        Self {
            event: event.into(),
            request_id,
            payload,
        }
    }

    /// Outbound command with a fresh request id
    pub fn command(event: impl Into<String>, payload: Value) -> Self {
        Self::new(event, Some(RequestId::new()), payload)
    }

    /// Push with no request id
    pub fn push(event: impl Into<String>, payload: Value) -> Self {
        Self::new(event, None, payload)
    }

    /// Attach or replace the request id
    #[must_use]
    pub fn with_request_id(mut self, request_id: Option<RequestId>) -> Self {
        self.request_id = request_id;
        self
    }

    /// Split the event into namespace and verb suffix
    #[must_use]
    pub fn split_event(&self) -> Option<(&str, &str)> {
        self.event.split_once(':')
    }

    /// Namespace part of the event
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.split_event().map(|(ns, _)| ns)
    }

    /// Verb, when the event is an entity event
    #[must_use]
    pub fn verb(&self) -> Option<Verb> {
        self.split_event().and_then(|(_, verb)| Verb::parse(verb))
    }

    /// Whether this envelope is addressed to an entity namespace
    #[must_use]
    pub fn is_for(&self, namespace: &str) -> bool {
        self.namespace() == Some(namespace)
    }

    /// Encode as JSON text
    ///
    /// # Errors
    /// Serialization failure of the payload
    pub fn to_json(&self) -> Result<String, SyncError> {
        serde_json::to_string(self).map_err(|e| SyncError::decode(self.event.clone(), e))
    }

    /// Decode from JSON text
    ///
    /// # Errors
    /// `SyncError::Decode` when the text is not an envelope
    pub fn from_json(text: &str) -> Result<Self, SyncError> {
        serde_json::from_str(text).map_err(|e| SyncError::decode("<envelope>", e))
    }

    /// Decode the payload into a concrete type
    ///
    /// # Errors
    /// `SyncError::Decode` naming this event
    pub fn decode_payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, SyncError> {
        T::deserialize(&self.payload).map_err(|e| SyncError::decode(self.event.clone(), e))
    }
}

/// `{ id }` body of delete commands and deleted pushes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdPayload {
    /// Record id
    pub id: RecordId,
}

/// `lookup:search` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupRequest {
    /// Canonical postal code
    pub code: String,
}

/// `lookup:result` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupResult {
    /// Code the server searched, echoed from the request
    pub code: String,
    /// Whether an address was found
    pub found: bool,
    /// Address fields, when found
    #[serde(flatten)]
    pub address: PostalAddress,
}

impl LookupResult {
    /// Successful result
    #[must_use]
    pub fn found(code: impl Into<String>, address: PostalAddress) -> Self {
        Self {
            code: code.into(),
            found: true,
            address,
        }
    }

    /// Empty result
    #[must_use]
    pub fn not_found(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            found: false,
            address: PostalAddress::default(),
        }
    }
}

/// A push decoded for one entity type
#[derive(Debug, Clone, PartialEq)]
pub enum EntityPush<E> {
    /// Collection change to apply to the store
    Store(StorePush<E>),
    /// Server refused a mutation
    Error(Rejection),
}

/// Decode a push addressed to `E`'s namespace
///
/// Returns `Ok(None)` for other namespaces and for command verbs.
///
/// # Errors
/// `SyncError::Decode` when the payload does not match the event
pub fn decode_entity_push<E: Entity>(envelope: &Envelope) -> Result<Option<EntityPush<E>>, SyncError> {
    if !envelope.is_for(E::NAMESPACE) {
        return Ok(None);
    }
    let push = match envelope.verb() {
        Some(Verb::List) => EntityPush::Store(StorePush::Snapshot(envelope.decode_payload()?)),
        Some(Verb::Upserted) => EntityPush::Store(StorePush::Upserted(envelope.decode_payload()?)),
        Some(Verb::Deleted) => {
            let IdPayload { id } = envelope.decode_payload()?;
            EntityPush::Store(StorePush::Deleted(id))
        }
        Some(Verb::Error) => EntityPush::Error(envelope.decode_payload()?),
        _ => return Ok(None),
    };
    Ok(Some(push))
}
