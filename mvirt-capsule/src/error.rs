//! Error taxonomy for capsule operations.

use thiserror::Error;

use crate::compute::ComputeError;
use crate::store::StoreError;

/// Errors surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum CapsuleError {
    /// Capsule or container missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Referenced image is unknown to the compute backend.
    #[error("image not found: {0}")]
    ImageNotFound(String),

    /// Restart policy mismatch or malformed flag.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Malformed request (bad paging parameters, empty template).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Operation not allowed in the capsule's current state.
    #[error("conflicting state: {0}")]
    ConflictingState(String),

    /// Compute backend failed or could not be reached.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Persistence failure other than a missing record.
    #[error("store: {0}")]
    Store(StoreError),
}

impl From<StoreError> for CapsuleError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(msg) => CapsuleError::NotFound(msg),
            other => CapsuleError::Store(other),
        }
    }
}

impl From<ComputeError> for CapsuleError {
    fn from(e: ComputeError) -> Self {
        match e {
            ComputeError::ContainerNotFound(id) => {
                CapsuleError::NotFound(format!("container {} on compute backend", id))
            }
            ComputeError::InvalidState(msg) => CapsuleError::ConflictingState(msg),
            ComputeError::Unavailable(msg) | ComputeError::Driver(msg) => {
                CapsuleError::BackendUnavailable(msg)
            }
        }
    }
}

/// Result type for capsule operations.
pub type Result<T> = std::result::Result<T, CapsuleError>;
