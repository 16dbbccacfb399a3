//! Process-wide store handle
//!
//! Every list and form view holds a clone of the same handle. Writes come only
//! from the sync layer applying pushes; the lock is never held across an
//! await point.

use crate::error::StoreError;
use crate::store::{EntityStore, StoreChange, StorePush};
use backoffice_model::{Entity, RecordId};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug)]
struct Inner<E: Entity> {
    store: RwLock<EntityStore<E>>,
    revisions: watch::Sender<u64>,
}

/// Cloneable, change-notifying handle to an [`EntityStore`]
#[derive(Debug)]
pub struct SharedStore<E: Entity> {
    inner: Arc<Inner<E>>,
}

impl<E: Entity> Clone for SharedStore<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Entity> SharedStore<E> {
    /// Empty shared collection
    #[must_use]
    pub fn new() -> Self {
        let (revisions, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                store: RwLock::new(EntityStore::new()),
                revisions,
            }),
        }
    }

    /// Apply a push and notify subscribers when the collection changed
    ///
    /// The revision is published under the write lock, so subscribers never
    /// see it go backwards.
    pub fn apply(&self, push: StorePush<E>) -> StoreChange {
        let mut store = self.inner.store.write();
        let change = store.apply(push);
        if change.is_change() {
            self.inner.revisions.send_replace(store.revision());
        }
        change
    }

    /// Clone of a record
    #[must_use]
    pub fn find(&self, id: RecordId) -> Option<E> {
        self.inner.store.read().find(id).cloned()
    }

    /// Clone of a record that must exist
    ///
    /// # Errors
    /// `StoreError::NotFound` when the id is not held
    pub fn require(&self, id: RecordId) -> Result<E, StoreError> {
        self.inner.store.read().require(id).cloned()
    }

    /// All records in display order
    #[must_use]
    pub fn snapshot(&self) -> Vec<E> {
        self.inner.store.read().iter().cloned().collect()
    }

    /// Run a read-only closure against the collection
    pub fn read<R>(&self, f: impl FnOnce(&EntityStore<E>) -> R) -> R {
        f(&self.inner.store.read())
    }

    /// Number of records
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.store.read().len()
    }

    /// Whether the collection is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.store.read().is_empty()
    }

    /// Current revision
    #[must_use]
    pub fn revision(&self) -> u64 {
        *self.inner.revisions.borrow()
    }

    /// Receive a notification after every effective change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revisions.subscribe()
    }
}

impl<E: Entity> Default for SharedStore<E> {
    fn default() -> Self {
        Self::new()
    }
}
