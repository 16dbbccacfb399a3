//! Command/push correlation
//!
//! One entry per in-flight [`PendingKind`]: the entry *is* the pending flag.
//! An entry records which push resolves it so that stale or duplicate pushes
//! cannot clear the wrong flag:
//! - when both sides carry a request id, the ids decide
//! - otherwise the event must match and record ids / postal codes must agree
//!   whenever both sides know them
//!
//! Every entry carries a deadline; nothing stays in flight forever.

use crate::envelope::RequestId;
use backoffice_model::RecordId;
use indexmap::IndexMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Mutation kinds with their own in-flight flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PendingKind {
    /// Create or update
    Save,
    /// Delete
    Delete,
    /// Postal-code lookup
    Lookup,
    /// Collection load
    List,
}

impl fmt::Display for PendingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Save => "save",
            Self::Delete => "delete",
            Self::Lookup => "lookup",
            Self::List => "list",
        };
        f.write_str(name)
    }
}

/// The push that resolves an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expectation {
    /// Resolving event name
    pub event: String,
    /// Record id the push must carry, when known
    pub id: Option<RecordId>,
    /// Postal code the response must echo
    pub code: Option<String>,
}

impl Expectation {
    /// Expect `event`, any record
    pub fn event(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            id: None,
            code: None,
        }
    }

    /// Also require this record id
    #[must_use]
    pub fn with_id(mut self, id: Option<RecordId>) -> Self {
        self.id = id;
        self
    }

    /// Also require this postal code
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// What an inbound push tells us about itself
#[derive(Debug, Clone, Copy, Default)]
pub struct Observed<'a> {
    /// Event name; `None` matches any (used for rejections)
    pub event: Option<&'a str>,
    /// Echoed request id
    pub request_id: Option<RequestId>,
    /// Record id carried by the push
    pub id: Option<RecordId>,
    /// Postal code echoed by the push
    pub code: Option<&'a str>,
}

/// One in-flight command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    /// Flag this entry holds
    pub kind: PendingKind,
    /// Token sent with the command
    pub request_id: RequestId,
    /// Resolving push
    pub expectation: Expectation,
    /// When the command was emitted
    pub started: Instant,
    /// When the flag is force-released
    pub deadline: Instant,
}

impl PendingEntry {
    /// Whether `observed` resolves this entry
    #[must_use]
    pub fn matches(&self, observed: &Observed<'_>) -> bool {
        if let Some(request_id) = observed.request_id {
            return request_id == self.request_id;
        }
        let expected = &self.expectation;
        let event_ok = observed.event.map_or(true, |e| e == expected.event);
        let id_ok = match (expected.id, observed.id) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        let code_ok = match (expected.code.as_deref(), observed.code) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        event_ok && id_ok && code_ok
    }

    /// Time since emission
    #[must_use]
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }
}

/// In-flight flags of one view
#[derive(Debug, Clone, Default)]
pub struct CorrelationTable {
    entries: IndexMap<PendingKind, PendingEntry>,
}

impl CorrelationTable {
    /// No flags set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `kind` is in flight
    #[inline]
    #[must_use]
    pub fn is_pending(&self, kind: PendingKind) -> bool {
        self.entries.contains_key(&kind)
    }

    /// Entry for `kind`
    #[must_use]
    pub fn get(&self, kind: PendingKind) -> Option<&PendingEntry> {
        self.entries.get(&kind)
    }

    /// Set the flag for `kind`
    ///
    /// Returns `false` and leaves the table untouched when `kind` is already
    /// in flight.
    pub fn begin(
        &mut self,
        kind: PendingKind,
        request_id: RequestId,
        expectation: Expectation,
        now: Instant,
        timeout: Duration,
    ) -> bool {
        if self.is_pending(kind) {
            return false;
        }
        self.supersede(kind, request_id, expectation, now, timeout);
        true
    }

    /// Set the flag for `kind`, replacing any entry already held
    ///
    /// Returns the replaced entry. Its response will no longer match.
    pub fn supersede(
        &mut self,
        kind: PendingKind,
        request_id: RequestId,
        expectation: Expectation,
        now: Instant,
        timeout: Duration,
    ) -> Option<PendingEntry> {
        let entry = PendingEntry {
            kind,
            request_id,
            expectation,
            started: now,
            deadline: now + timeout,
        };
        self.entries.insert(kind, entry)
    }

    /// Whether `observed` resolves the `kind` flag
    #[must_use]
    pub fn correlates(&self, kind: PendingKind, observed: &Observed<'_>) -> bool {
        self.entries
            .get(&kind)
            .is_some_and(|entry| entry.matches(observed))
    }

    /// Clear the `kind` flag if `observed` resolves it
    pub fn correlate(&mut self, kind: PendingKind, observed: &Observed<'_>) -> Option<PendingEntry> {
        if self.correlates(kind, observed) {
            self.resolve(kind)
        } else {
            None
        }
    }

    /// Clear the `kind` flag unconditionally
    pub fn resolve(&mut self, kind: PendingKind) -> Option<PendingEntry> {
        self.entries.shift_remove(&kind)
    }

    /// Remove and return every entry whose deadline has passed
    pub fn expire(&mut self, now: Instant) -> Vec<PendingEntry> {
        let expired: Vec<PendingKind> = self
            .entries
            .values()
            .filter(|entry| entry.deadline <= now)
            .map(|entry| entry.kind)
            .collect();
        expired
            .into_iter()
            .filter_map(|kind| self.entries.shift_remove(&kind))
            .collect()
    }

    /// Remove and return every entry
    pub fn clear(&mut self) -> Vec<PendingEntry> {
        self.entries.drain(..).map(|(_, entry)| entry).collect()
    }

    /// Earliest deadline among in-flight entries
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|entry| entry.deadline).min()
    }

    /// Number of flags set
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no flag is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
