use thiserror::Error;

/// Failures of the capsule/container record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record with this key, or a paging marker that matches nothing.
    #[error("record not found: {0}")]
    NotFound(String),

    /// Duplicate UUID, or a name lookup that matches several capsules.
    #[error("record conflict: {0}")]
    Conflict(String),

    /// The record was saved by someone else since the caller read it.
    #[error("stale revision: stored {expected}, caller had {actual}")]
    VersionMismatch { expected: u64, actual: u64 },

    /// The backend itself failed (I/O, replication, serialization).
    ///
    /// `MemoryStore` cannot fail this way; persistent `DataStore`
    /// implementations report here and callers answer with a 500.
    #[error("store failure: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
