//! Ledger domain model (accounts, transactions, projects, investments, budgets).
//!
//! Pure domain logic only: no IO, no locks, no persistence concerns. The
//! engine in `fundhub-infra` serializes access and calls the decision
//! functions defined here.

pub mod account;
pub mod budget;
pub mod events;
pub mod investment;
pub mod project;
pub mod transaction;

pub use account::{Account, AccountKind, OpenAccount};
pub use budget::{Budget, BudgetEvaluation, BudgetPeriod, BudgetStatus, NewBudget, PeriodWindow};
pub use events::LedgerEvent;
pub use investment::Investment;
pub use project::{NewProject, Project, ProjectStatus};
pub use transaction::{
    IdempotencyKey, Transaction, TransactionDraft, TransactionKind, TransactionStatus,
};
