//! Edit buffer
//!
//! The in-progress copy of a record behind a form. Every field write emits a
//! [`FieldChange`]; dependents subscribe to exactly the field they care about
//! instead of diffing the whole draft.

use backoffice_model::{Draft, PostalAddress, PostalLookupTarget, RecordId, ValidationErrors};
use std::collections::HashSet;
use tokio::sync::broadcast;

const CHANGE_CAPACITY: usize = 64;

/// Who wrote a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// Typed by the user
    User,
    /// Filled from a lookup result
    Lookup,
}

/// One field write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange<F> {
    /// Field written
    pub field: F,
    /// Display value after masking
    pub value: String,
    /// Writer
    pub origin: ChangeOrigin,
}

/// Editable working copy of a record
#[derive(Debug)]
pub struct EditBuffer<D: Draft> {
    draft: D,
    touched: HashSet<D::Field>,
    changes: broadcast::Sender<FieldChange<D::Field>>,
}

impl<D: Draft> EditBuffer<D> {
    /// Buffer for a new record, seeded with draft defaults
    #[must_use]
    pub fn blank() -> Self {
        Self::from_draft(D::default())
    }

    /// Buffer editing a cached record, masked for display
    #[must_use]
    pub fn for_record(record: &D::Entity) -> Self {
        Self::from_draft(D::from_record(record))
    }

    /// Buffer around an existing draft
    #[must_use]
    pub fn from_draft(draft: D) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            draft,
            touched: HashSet::new(),
            changes,
        }
    }

    /// Current draft
    #[inline]
    #[must_use]
    pub fn draft(&self) -> &D {
        &self.draft
    }

    /// Identity of the record being edited
    #[inline]
    #[must_use]
    pub fn id(&self) -> Option<RecordId> {
        self.draft.id()
    }

    /// Display value of a field
    #[must_use]
    pub fn field(&self, field: D::Field) -> &str {
        self.draft.field(field)
    }

    /// User edit of one field
    ///
    /// Returns `false` when the masked value did not change; no notification
    /// is sent in that case.
    pub fn set_field(&mut self, field: D::Field, value: impl Into<String>) -> bool {
        let before = self.draft.field(field).to_owned();
        self.draft.set_field(field, value.into());
        let after = self.draft.field(field);
        if before == after {
            return false;
        }
        self.touched.insert(field);
        self.notify(field, ChangeOrigin::User);
        true
    }

    /// Fields the user has edited
    #[must_use]
    pub fn is_touched(&self, field: D::Field) -> bool {
        self.touched.contains(&field)
    }

    /// Whether any field was edited by the user
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.touched.is_empty()
    }

    /// Run validation on the current draft
    ///
    /// # Errors
    /// Every rejected field
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        self.draft.validate()
    }

    /// Receive every field change
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<FieldChange<D::Field>> {
        self.changes.subscribe()
    }

    /// Receive changes of one field only
    #[must_use]
    pub fn watch_field(&self, field: D::Field) -> FieldSubscription<D::Field> {
        FieldSubscription {
            field,
            rx: self.changes.subscribe(),
        }
    }

    /// Take the draft out, discarding the buffer
    #[must_use]
    pub fn into_draft(self) -> D {
        self.draft
    }

    fn notify(&self, field: D::Field, origin: ChangeOrigin) {
        let value = self.draft.field(field).to_owned();
        tracing::debug!(%field, ?origin, "field changed");
        // no subscribers is fine
        let _ = self.changes.send(FieldChange {
            field,
            value,
            origin,
        });
    }
}

impl<D: PostalLookupTarget> EditBuffer<D> {
    /// Fill blank address fields from a lookup result
    ///
    /// Fields holding text are never overwritten. Returns the fields written.
    pub fn merge_lookup(&mut self, address: &PostalAddress) -> Vec<D::Field> {
        let written = self.draft.merge_lookup(address);
        for field in &written {
            self.notify(*field, ChangeOrigin::Lookup);
        }
        written
    }
}

/// Change notifications for a single field
#[derive(Debug)]
pub struct FieldSubscription<F> {
    field: F,
    rx: broadcast::Receiver<FieldChange<F>>,
}

impl<F: Copy + Eq + Clone> FieldSubscription<F> {
    /// Field watched
    #[inline]
    #[must_use]
    pub fn field(&self) -> F {
        self.field
    }

    /// Wait for the next change of the watched field
    ///
    /// Returns `None` once the buffer is gone. Lagged notifications are
    /// skipped; the value carried by the next one is always current.
    pub async fn recv(&mut self) -> Option<FieldChange<F>> {
        loop {
            match self.rx.recv().await {
                Ok(change) if change.field == self.field => return Some(change),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "field subscription lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Latest pending change of the watched field, without waiting
    ///
    /// Drains everything queued and keeps only the newest matching change.
    pub fn try_latest(&mut self) -> Option<FieldChange<F>> {
        let mut latest = None;
        loop {
            match self.rx.try_recv() {
                Ok(change) if change.field == self.field => latest = Some(change),
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return latest,
            }
        }
    }
}
