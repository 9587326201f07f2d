//! Domain error model.

use thiserror::Error;

use crate::id::{AccountId, ProjectId};
use crate::money::Currency;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// balance rules, funding rules, version conflicts). Lock timeouts and storage
/// failures belong to the infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input (non-positive amount, empty title, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The movement would take the account below its floor.
    #[error("insufficient funds in account {account}: available {available}, requested {requested}")]
    InsufficientFunds {
        account: AccountId,
        available: i64,
        requested: i64,
    },

    /// The account has been deactivated and accepts no movements.
    #[error("account {0} is inactive")]
    AccountInactive(AccountId),

    /// Investments are only accepted while a project is ACTIVE.
    #[error("project {project} is not accepting investments (status: {status})")]
    ProjectNotActive { project: ProjectId, status: String },

    /// The investment exceeds the room left under the project's target.
    #[error("investment of {requested} exceeds remaining room {room} on project {project}")]
    ProjectOverfunded {
        project: ProjectId,
        room: i64,
        requested: i64,
    },

    /// Optimistic concurrency check failed.
    #[error("version conflict (expected: {expected}, actual: {actual})")]
    VersionConflict { expected: u64, actual: u64 },

    /// A state machine transition that is not allowed.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Both sides of a movement must use the same currency.
    #[error("currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: Currency, right: Currency },

    /// A requested resource was not found.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(what: &'static str) -> Self {
        Self::NotFound(what)
    }

    /// Conflicts the caller may resolve by re-reading and retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}
