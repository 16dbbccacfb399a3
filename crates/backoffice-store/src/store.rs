//! Ordered, id-keyed entity collection
//!
//! A pure reducer over server pushes: no network, no timers.

use crate::error::StoreError;
use backoffice_model::{Entity, RecordId};
use indexmap::IndexMap;

/// A server push already decoded for one entity type
#[derive(Debug, Clone, PartialEq)]
pub enum StorePush<E> {
    /// Full collection from a `list` response
    Snapshot(Vec<E>),
    /// Record created or updated
    Upserted(E),
    /// Record removed
    Deleted(RecordId),
}

/// What an apply did to the collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreChange {
    /// Collection replaced, with the resulting length
    Replaced(usize),
    /// New record appended
    Inserted(RecordId),
    /// Existing record replaced in place
    Updated(RecordId),
    /// Upsert carried the record already held
    Unchanged(RecordId),
    /// Record removed
    Removed(RecordId),
    /// Delete for an id not held
    Missing(RecordId),
}

impl StoreChange {
    /// Whether dependent views need to re-render
    #[inline]
    #[must_use]
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Unchanged(_) | Self::Missing(_))
    }
}

/// Client-side collection of one entity type
#[derive(Debug, Clone)]
pub struct EntityStore<E: Entity> {
    records: IndexMap<RecordId, E>,
    revision: u64,
}

impl<E: Entity> EntityStore<E> {
    /// Empty collection, as on view mount
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: IndexMap::new(),
            revision: 0,
        }
    }

    /// Apply any push
    pub fn apply(&mut self, push: StorePush<E>) -> StoreChange {
        match push {
            StorePush::Snapshot(records) => self.apply_snapshot(records),
            StorePush::Upserted(record) => self.apply_upserted(record),
            StorePush::Deleted(id) => self.apply_deleted(id),
        }
    }

    /// Replace the whole collection
    ///
    /// Duplicate ids keep the first position and the last value.
    pub fn apply_snapshot(&mut self, records: Vec<E>) -> StoreChange {
        let mut next = IndexMap::with_capacity(records.len());
        for record in records {
            next.insert(record.id(), record);
        }
        self.records = next;
        self.bump();
        tracing::debug!(
            namespace = E::NAMESPACE,
            count = self.records.len(),
            "applied snapshot"
        );
        StoreChange::Replaced(self.records.len())
    }

    /// Insert or replace by id
    ///
    /// Existing entries keep their position; new ones are appended.
    pub fn apply_upserted(&mut self, record: E) -> StoreChange {
        let id = record.id();
        let change = match self.records.get_mut(&id) {
            Some(existing) if *existing == record => StoreChange::Unchanged(id),
            Some(existing) => {
                *existing = record;
                StoreChange::Updated(id)
            }
            None => {
                self.records.insert(id, record);
                StoreChange::Inserted(id)
            }
        };
        if change.is_change() {
            self.bump();
        }
        tracing::debug!(namespace = E::NAMESPACE, %id, ?change, "applied upsert");
        change
    }

    /// Remove by id
    pub fn apply_deleted(&mut self, id: RecordId) -> StoreChange {
        // shift_remove keeps the remaining order stable
        if self.records.shift_remove(&id).is_some() {
            self.bump();
            tracing::debug!(namespace = E::NAMESPACE, %id, "applied delete");
            StoreChange::Removed(id)
        } else {
            StoreChange::Missing(id)
        }
    }

    /// Look up a record
    #[inline]
    #[must_use]
    pub fn find(&self, id: RecordId) -> Option<&E> {
        self.records.get(&id)
    }

    /// Look up a record that must exist
    ///
    /// # Errors
    /// `StoreError::NotFound` when the id is not held
    pub fn require(&self, id: RecordId) -> Result<&E, StoreError> {
        self.find(id).ok_or(StoreError::NotFound {
            namespace: E::NAMESPACE,
            id,
        })
    }

    /// Records in display order
    pub fn iter(&self) -> impl Iterator<Item = &E> {
        self.records.values()
    }

    /// Ids in display order
    #[must_use]
    pub fn ids(&self) -> Vec<RecordId> {
        self.records.keys().copied().collect()
    }

    /// Number of records
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the collection is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Monotonic counter bumped by every effective change
    #[inline]
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn bump(&mut self) {
        self.revision += 1;
    }
}

impl<E: Entity> Default for EntityStore<E> {
    fn default() -> Self {
        Self::new()
    }
}
