//! Error types for the store

use backoffice_model::RecordId;

/// Store lookup errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No record with this id in the collection
    #[error("{namespace} {id} not found")]
    NotFound {
        /// Entity namespace
        namespace: &'static str,
        /// Requested id
        id: RecordId,
    },
}
