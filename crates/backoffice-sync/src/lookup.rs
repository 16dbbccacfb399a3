//! Dependent lookup
//!
//! Watches the postal-code field of an edit buffer. Once the canonical value
//! has exactly the configured length it emits `lookup:search { code }` and
//! merges the answer into blank address fields.
//!
//! Staleness is decided by value: a result is applied only when its echoed
//! code equals the *current* canonical field value. The in-progress flag is
//! released by the response it was waiting for, whether or not it merged.

use crate::buffer::EditBuffer;
use crate::config::SyncConfig;
use crate::correlation::{CorrelationTable, Expectation, Observed, PendingKind};
use crate::envelope::{Envelope, LookupRequest, LookupResult, RequestId, LOOKUP_RESULT, LOOKUP_SEARCH};
use crate::error::{SyncError, TransportError};
use crate::transport::Transport;
use backoffice_model::{canonicalize, Draft, PostalLookupTarget};
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::time::Instant;

/// What a lookup response did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome<F> {
    /// Blank fields were filled
    Merged {
        /// Fields written
        filled: Vec<F>,
        /// Field to focus next, if still blank
        focus: Option<F>,
    },
    /// Server knows no address for the code; fields stay for manual entry
    NotFound {
        /// Code searched
        code: String,
    },
    /// Field changed since the lookup started; result dropped
    Discarded {
        /// Code the stale result was for
        code: String,
    },
    /// Response did not answer the in-flight lookup
    Ignored,
}

/// A controller that reacts to one field and fills others asynchronously
pub trait DependentLookup<D: Draft>: Send {
    /// Field this controller watches
    fn source_field(&self) -> D::Field;

    /// React to a new value of the source field
    ///
    /// Returns the request id when a lookup was emitted.
    ///
    /// # Errors
    /// `SyncError::Transport` when the command could not be sent
    fn on_source_change(
        &mut self,
        buffer: &EditBuffer<D>,
        now: Instant,
    ) -> Result<Option<RequestId>, SyncError>;

    /// Apply a response envelope, if it is one of ours
    ///
    /// Returns `None` when the envelope is not a lookup response.
    fn handle_envelope(
        &mut self,
        buffer: &mut EditBuffer<D>,
        envelope: &Envelope,
    ) -> Option<LookupOutcome<D::Field>>;

    /// Whether a lookup is in flight
    fn is_pending(&self) -> bool;

    /// Deadline of the in-flight lookup
    fn next_deadline(&self) -> Option<Instant>;

    /// Release the flag if its deadline passed
    fn expire(&mut self, now: Instant) -> Option<TransportError>;

    /// Release the flag after the channel dropped; `true` if one was held
    fn on_disconnect(&mut self) -> bool;
}

/// Postal-code → address autofill
pub struct LookupController<D: PostalLookupTarget> {
    transport: Arc<dyn Transport>,
    config: SyncConfig,
    pending: CorrelationTable,
    _draft: PhantomData<fn() -> D>,
}

impl<D: PostalLookupTarget> std::fmt::Debug for LookupController<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookupController")
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl<D: PostalLookupTarget> LookupController<D> {
    /// Controller with no lookup in flight
    pub fn new(transport: Arc<dyn Transport>, config: SyncConfig) -> Self {
        Self {
            transport,
            config,
            pending: CorrelationTable::new(),
            _draft: PhantomData,
        }
    }

    /// Code of the in-flight lookup
    #[must_use]
    pub fn in_flight_code(&self) -> Option<&str> {
        self.pending
            .get(PendingKind::Lookup)
            .and_then(|entry| entry.expectation.code.as_deref())
    }

    /// Emit a lookup for `value` if it is a complete, new code
    ///
    /// # Errors
    /// `SyncError::Transport` when the command could not be sent; any earlier
    /// lookup stays in flight
    pub fn observe(&mut self, value: &str, now: Instant) -> Result<Option<RequestId>, SyncError> {
        let code = canonicalize(value);
        if code.len() != self.config.postal_code_len {
            return Ok(None);
        }
        if self.in_flight_code() == Some(code.as_str()) {
            tracing::debug!(%code, "lookup already in flight");
            return Ok(None);
        }

        let payload = serde_json::to_value(LookupRequest { code: code.clone() })
            .map_err(SyncError::Payload)?;
        let request_id = RequestId::new();
        self.transport
            .emit(Envelope::new(LOOKUP_SEARCH, Some(request_id), payload))?;

        let expectation = Expectation::event(LOOKUP_RESULT).with_code(code.clone());
        let replaced = self.pending.supersede(
            PendingKind::Lookup,
            request_id,
            expectation,
            now,
            self.config.lookup_timeout(),
        );
        if let Some(old) = replaced {
            tracing::debug!(old = ?old.expectation.code, %code, "lookup superseded");
        }
        tracing::info!(%code, %request_id, "emitted lookup");
        Ok(Some(request_id))
    }

    /// Apply a decoded lookup result
    pub fn apply_result(
        &mut self,
        buffer: &mut EditBuffer<D>,
        result: &LookupResult,
        request_id: Option<RequestId>,
    ) -> LookupOutcome<D::Field> {
        let observed = Observed {
            event: Some(LOOKUP_RESULT),
            request_id,
            id: None,
            code: Some(&result.code),
        };
        if self.pending.correlate(PendingKind::Lookup, &observed).is_none() {
            tracing::warn!(code = %result.code, "unmatched lookup result");
            return LookupOutcome::Ignored;
        }

        let current = canonicalize(buffer.field(D::POSTAL_CODE));
        if current != result.code {
            tracing::warn!(code = %result.code, %current, "stale lookup result discarded");
            return LookupOutcome::Discarded {
                code: result.code.clone(),
            };
        }
        if !result.found {
            tracing::info!(code = %result.code, "no address for postal code");
            return LookupOutcome::NotFound {
                code: result.code.clone(),
            };
        }

        let filled = buffer.merge_lookup(&result.address);
        let focus = buffer
            .field(D::FOCUS_AFTER_LOOKUP)
            .trim()
            .is_empty()
            .then_some(D::FOCUS_AFTER_LOOKUP);
        tracing::info!(code = %result.code, filled = filled.len(), "lookup merged");
        LookupOutcome::Merged { filled, focus }
    }
}

impl<D: PostalLookupTarget> DependentLookup<D> for LookupController<D> {
    fn source_field(&self) -> D::Field {
        D::POSTAL_CODE
    }

    fn on_source_change(
        &mut self,
        buffer: &EditBuffer<D>,
        now: Instant,
    ) -> Result<Option<RequestId>, SyncError> {
        self.observe(buffer.field(D::POSTAL_CODE), now)
    }

    fn handle_envelope(
        &mut self,
        buffer: &mut EditBuffer<D>,
        envelope: &Envelope,
    ) -> Option<LookupOutcome<D::Field>> {
        if envelope.event != LOOKUP_RESULT {
            return None;
        }
        match envelope.decode_payload::<LookupResult>() {
            Ok(result) => Some(self.apply_result(buffer, &result, envelope.request_id)),
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed lookup result");
                Some(LookupOutcome::Ignored)
            }
        }
    }

    fn is_pending(&self) -> bool {
        self.pending.is_pending(PendingKind::Lookup)
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.pending.next_deadline()
    }

    fn expire(&mut self, now: Instant) -> Option<TransportError> {
        let entry = self.pending.expire(now).into_iter().next()?;
        tracing::warn!(code = ?entry.expectation.code, "lookup timed out");
        Some(TransportError::Timeout {
            kind: PendingKind::Lookup,
            after_ms: self.config.lookup_timeout_ms,
        })
    }

    fn on_disconnect(&mut self) -> bool {
        let cleared = !self.pending.clear().is_empty();
        if cleared {
            tracing::warn!("lookup flag reset on disconnect");
        }
        cleared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelTransport;
    use backoffice_model::{AddressField, PostalAddress, UserDraft, UserField};
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    const CEP: UserField = UserField::Address(AddressField::Cep);
    const STREET: UserField = UserField::Address(AddressField::Street);
    const DISTRICT: UserField = UserField::Address(AddressField::District);
    const NUMBER: UserField = UserField::Address(AddressField::Number);

    fn controller() -> (LookupController<UserDraft>, mpsc::Receiver<Envelope>) {
        let (transport, rx) = ChannelTransport::new(8);
        (LookupController::new(Arc::new(transport), SyncConfig::default()), rx)
    }

    fn paulista() -> PostalAddress {
        PostalAddress {
            street: Some("Avenida Paulista".into()),
            district: Some("Bela Vista".into()),
            city: Some("São Paulo".into()),
            uf: Some("SP".into()),
        }
    }

    #[tokio::test]
    async fn emits_only_for_complete_codes() {
        let (mut lookup, mut rx) = controller();
        let mut buffer = EditBuffer::<UserDraft>::blank();

        buffer.set_field(CEP, "0131010");
        assert_eq!(lookup.on_source_change(&buffer, Instant::now()).unwrap(), None);
        assert!(!lookup.is_pending());

        buffer.set_field(CEP, "01310100");
        assert!(lookup.on_source_change(&buffer, Instant::now()).unwrap().is_some());
        assert!(lookup.is_pending());

        let sent = rx.try_recv().unwrap();
        assert_eq!(sent.event, "lookup:search");
        assert_eq!(sent.payload["code"], "01310100");
    }

    #[tokio::test]
    async fn same_code_is_not_reissued() {
        let (mut lookup, mut rx) = controller();
        lookup.observe("01.310-100", Instant::now()).unwrap();
        assert_eq!(lookup.observe("01310100", Instant::now()).unwrap(), None);

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn merge_fills_blanks_only_and_requests_focus() {
        let (mut lookup, mut rx) = controller();
        let mut buffer = EditBuffer::<UserDraft>::blank();
        buffer.set_field(STREET, "Rua X");
        buffer.set_field(CEP, "01310100");
        lookup.on_source_change(&buffer, Instant::now()).unwrap();
        let request_id = rx.try_recv().unwrap().request_id;

        let outcome =
            lookup.apply_result(&mut buffer, &LookupResult::found("01310100", paulista()), request_id);

        let LookupOutcome::Merged { filled, focus } = outcome else {
            panic!("expected merge, got {outcome:?}");
        };
        assert!(!filled.contains(&STREET));
        assert!(filled.contains(&DISTRICT));
        assert_eq!(focus, Some(NUMBER));
        assert_eq!(buffer.field(STREET), "Rua X");
        assert_eq!(buffer.field(DISTRICT), "Bela Vista");
        assert!(!lookup.is_pending());
    }

    #[tokio::test]
    async fn no_focus_when_number_typed() {
        let (mut lookup, _rx) = controller();
        let mut buffer = EditBuffer::<UserDraft>::blank();
        buffer.set_field(NUMBER, "1578");
        buffer.set_field(CEP, "01310100");
        lookup.on_source_change(&buffer, Instant::now()).unwrap();

        let outcome = lookup.apply_result(&mut buffer, &LookupResult::found("01310100", paulista()), None);
        assert!(matches!(outcome, LookupOutcome::Merged { focus: None, .. }));
    }

    #[tokio::test]
    async fn stale_result_is_discarded_and_clears_flag() {
        let (mut lookup, _rx) = controller();
        let mut buffer = EditBuffer::<UserDraft>::blank();
        buffer.set_field(CEP, "01310100");
        lookup.on_source_change(&buffer, Instant::now()).unwrap();

        // code no longer complete: nothing new emitted, flag kept
        buffer.set_field(CEP, "0131");
        assert_eq!(lookup.on_source_change(&buffer, Instant::now()).unwrap(), None);
        assert!(lookup.is_pending());

        let before = buffer.draft().clone();
        let outcome = lookup.apply_result(&mut buffer, &LookupResult::found("01310100", paulista()), None);
        assert_eq!(outcome, LookupOutcome::Discarded { code: "01310100".into() });
        assert_eq!(buffer.draft(), &before);
        assert!(!lookup.is_pending());
    }

    #[tokio::test]
    async fn superseded_result_is_ignored() {
        let (mut lookup, mut rx) = controller();
        let mut buffer = EditBuffer::<UserDraft>::blank();
        buffer.set_field(CEP, "01310100");
        lookup.on_source_change(&buffer, Instant::now()).unwrap();
        let first = rx.try_recv().unwrap().request_id;

        buffer.set_field(CEP, "20040002");
        lookup.on_source_change(&buffer, Instant::now()).unwrap();
        assert_eq!(lookup.in_flight_code(), Some("20040002"));

        let before = buffer.draft().clone();
        let outcome = lookup.apply_result(&mut buffer, &LookupResult::found("01310100", paulista()), first);
        assert_eq!(outcome, LookupOutcome::Ignored);
        assert_eq!(buffer.draft(), &before);
        assert!(lookup.is_pending());
    }

    #[tokio::test]
    async fn not_found_leaves_fields() {
        let (mut lookup, _rx) = controller();
        let mut buffer = EditBuffer::<UserDraft>::blank();
        buffer.set_field(CEP, "99999999");
        lookup.on_source_change(&buffer, Instant::now()).unwrap();

        let envelope = Envelope::push(
            LOOKUP_RESULT,
            serde_json::to_value(LookupResult::not_found("99999999")).unwrap(),
        );
        let outcome = lookup.handle_envelope(&mut buffer, &envelope);
        assert_eq!(outcome, Some(LookupOutcome::NotFound { code: "99999999".into() }));
        assert_eq!(buffer.field(STREET), "");
        assert!(!lookup.is_pending());
    }

    #[tokio::test]
    async fn deadline_and_disconnect_release() {
        let (mut lookup, _rx) = controller();
        let start = Instant::now();
        lookup.observe("01310100", start).unwrap();

        assert_eq!(lookup.expire(start + std::time::Duration::from_secs(1)), None);
        assert!(matches!(
            lookup.expire(start + std::time::Duration::from_secs(8)),
            Some(TransportError::Timeout { kind: PendingKind::Lookup, .. })
        ));

        lookup.observe("01310100", start).unwrap();
        assert!(lookup.on_disconnect());
        assert!(!lookup.on_disconnect());
    }
}
