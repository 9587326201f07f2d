//! Engine-level error: domain failures plus concurrency and storage failures.

use thiserror::Error;

use fundhub_core::DomainError;

use crate::journal::JournalError;

pub type EngineResult<T> = Result<T, EngineError>;

/// Error surfaced by every engine operation.
///
/// - **Domain**: deterministic rejections (validation, funds, funding rules);
///   nothing was changed.
/// - **LockTimeout / VersionConflict**: transient; safe to retry (idempotency
///   keys make retries take effect once).
/// - **DeadlockAvoided**: a caller tried to take locks out of order while
///   already holding some; this is a programming error, not contention.
/// - **Journal / Storage**: fatal to the request; persisted state is intact
///   because journal appends are atomic.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("could not acquire locks within {timeout_ms} ms")]
    LockTimeout { timeout_ms: u64 },

    #[error("lock ordering violation avoided: {0}")]
    DeadlockAvoided(String),

    #[error("journal failure: {0}")]
    Journal(#[from] JournalError),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn poisoned(what: &str) -> Self {
        EngineError::Storage(format!("{what} lock poisoned"))
    }

    /// Errors a caller may retry with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::LockTimeout { .. } => true,
            EngineError::Domain(e) => e.is_transient(),
            EngineError::DeadlockAvoided(_)
            | EngineError::Journal(_)
            | EngineError::Storage(_) => false,
        }
    }

    /// The domain rejection, if this is one.
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            EngineError::Domain(e) => Some(e),
            _ => None,
        }
    }
}
