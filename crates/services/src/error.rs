//! Shared error types for the services crate.

use thiserror::Error;

use ladico_core::model::{SessionId, SessionKeyError, SessionModelError};
use ladico_core::scoring::ScoreError;
use storage::repository::StorageError;

/// Errors emitted by the session manager.
///
/// Writes against a finalised session are not errors; they surface as
/// `AlreadyFinalized` outcomes.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    /// The document store failed. Safe to retry once the store is reachable.
    #[error("session store unavailable: {0}")]
    StoreUnavailable(#[source] StorageError),

    /// The id no longer resolves; re-run `ensure_session` and retry once.
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    #[error("question index {index} out of range for {count} questions")]
    InvalidIndex { index: usize, count: u32 },

    #[error("invalid input: {0}")]
    InvalidInput(#[from] ladico_core::Error),

    #[error("stored session is corrupt: {0}")]
    Corrupt(#[source] StorageError),
}

impl SessionError {
    pub(crate) fn from_storage(err: StorageError) -> Self {
        match err {
            StorageError::Serialization(_) => Self::Corrupt(err),
            other => Self::StoreUnavailable(other),
        }
    }
}

impl From<SessionKeyError> for SessionError {
    fn from(err: SessionKeyError) -> Self {
        Self::InvalidInput(err.into())
    }
}

impl From<SessionModelError> for SessionError {
    fn from(err: SessionModelError) -> Self {
        match err {
            SessionModelError::InvalidIndex { index, count } => Self::InvalidIndex { index, count },
            other => Self::InvalidInput(other.into()),
        }
    }
}

impl From<ScoreError> for SessionError {
    fn from(err: ScoreError) -> Self {
        Self::InvalidInput(err.into())
    }
}
