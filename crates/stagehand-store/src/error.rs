//! Store error types.

use thiserror::Error;

/// Store errors.
///
/// Everything here is transient from the controller's point of view: the
/// tick that hit the error retries from the same state.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {namespace}/{name}")]
    NotFound { namespace: String, name: String },

    #[error("update conflict on {namespace}/{name}: stored revision {stored}, got {given}")]
    Conflict {
        namespace: String,
        name: String,
        stored: u64,
        given: u64,
    },

    #[error("object already exists: {namespace}/{name}")]
    AlreadyExists { namespace: String, name: String },

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns `true` for not-found, which sync interprets as cancellation.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
