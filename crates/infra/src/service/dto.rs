//! Request/response shapes the presentation layer binds to.
//!
//! Money always travels as `{ "amount_minor": i64, "currency": "USD" }`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use fundhub_core::{
    AccountId, BudgetId, CategoryId, DomainError, InvestmentId, Money, OwnerId, ProjectId,
    TransactionId,
};
use fundhub_ledger::{
    Account, AccountKind, BudgetStatus, IdempotencyKey, Project, ProjectStatus, Transaction,
    TransactionKind, TransactionStatus,
};

use crate::budget::BudgetStatusReport;
use crate::error::EngineError;
use crate::funding::InvestOutcome;

pub(crate) fn parse_key(raw: Option<String>) -> Result<Option<IdempotencyKey>, DomainError> {
    raw.map(IdempotencyKey::new).transpose()
}

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    pub owner_id: OwnerId,
    pub name: String,
    pub kind: AccountKind,
    pub currency: String,
    #[serde(default)]
    pub opening_balance: i64,
    #[serde(default)]
    pub credit_limit: Option<i64>,
}

/// Deposit or withdrawal against one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoneyMovementRequest {
    pub account_id: AccountId,
    pub amount: Money,
    /// Version the caller last observed; omitted = no optimistic check.
    #[serde(default)]
    pub expected_version: Option<u64>,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Money,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionQuery {
    #[serde(default)]
    pub account_id: Option<AccountId>,
    #[serde(default)]
    pub kind: Option<TransactionKind>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub size: Option<u32>,
}

/// Undo a completed income, expense or transfer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReverseTransactionRequest {
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Window and scope of a spending report. `until` is exclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportQuery {
    pub from: NaiveDate,
    pub until: NaiveDate,
    /// Defaults to the engine's default currency.
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub account_id: Option<AccountId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestmentRequest {
    pub project_id: ProjectId,
    pub account_id: AccountId,
    pub amount: Money,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProjectRequest {
    pub owner_id: OwnerId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub target: Money,
    #[serde(default)]
    pub auto_activate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetProjectStatusRequest {
    pub status: ProjectStatus,
    pub expected_status: ProjectStatus,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountResponse {
    pub id: AccountId,
    pub owner_id: OwnerId,
    pub name: String,
    pub kind: AccountKind,
    pub balance: Money,
    pub available: i64,
    pub credit_limit: i64,
    pub active: bool,
    pub version: u64,
}

impl From<&Account> for AccountResponse {
    fn from(a: &Account) -> Self {
        use fundhub_core::AggregateRoot;
        Self {
            id: a.id_typed(),
            owner_id: a.owner(),
            name: a.name().to_string(),
            kind: a.kind(),
            balance: a.balance_money(),
            available: a.available(),
            credit_limit: a.credit_limit(),
            active: a.is_active(),
            version: a.version(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub id: TransactionId,
    pub sequence: u64,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub amount: Money,
    pub account_id: AccountId,
    pub counterparty_id: Option<AccountId>,
    pub category_id: Option<CategoryId>,
    pub description: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set on reversal rows: the row they undo.
    pub reverses: Option<TransactionId>,
}

impl From<Transaction> for TransactionResponse {
    fn from(t: Transaction) -> Self {
        Self {
            id: t.id,
            sequence: t.sequence,
            kind: t.kind,
            status: t.status,
            amount: t.amount,
            account_id: t.account_id,
            counterparty_id: t.counterparty_id,
            category_id: t.category_id,
            description: t.description,
            occurred_at: t.occurred_at,
            created_at: t.created_at,
            completed_at: t.completed_at,
            reverses: t.reverses,
        }
    }
}

/// Result of a deposit or withdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementResponse {
    pub transaction: TransactionResponse,
    pub balance: Money,
    pub version: u64,
    pub replayed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResponse {
    pub transaction: TransactionResponse,
    pub from_balance: Money,
    pub to_balance: Money,
    pub replayed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReversalResponse {
    pub original: TransactionId,
    pub reversal: TransactionResponse,
    pub replayed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectResponse {
    pub id: ProjectId,
    pub owner_id: OwnerId,
    pub title: String,
    pub description: Option<String>,
    pub target: Money,
    pub current: Money,
    pub status: ProjectStatus,
    pub pool_account_id: AccountId,
    pub funded_at: Option<DateTime<Utc>>,
}

impl From<&Project> for ProjectResponse {
    fn from(p: &Project) -> Self {
        Self {
            id: p.id_typed(),
            owner_id: p.owner(),
            title: p.title().to_string(),
            description: p.description().map(str::to_string),
            target: p.target(),
            current: p.current(),
            status: p.status(),
            pool_account_id: p.pool_account_id(),
            funded_at: p.funded_at(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvestmentResponse {
    pub investment_id: InvestmentId,
    pub transaction_id: TransactionId,
    pub investor_account_id: AccountId,
    pub amount: Money,
    pub created_at: DateTime<Utc>,
    pub replayed: bool,
    pub project: ProjectResponse,
}

impl From<InvestOutcome> for InvestmentResponse {
    fn from(o: InvestOutcome) -> Self {
        Self {
            investment_id: o.investment.id,
            transaction_id: o.investment.transaction_id,
            investor_account_id: o.investment.investor_account_id,
            amount: o.investment.amount,
            created_at: o.investment.created_at,
            replayed: o.replayed,
            project: ProjectResponse::from(&o.project),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetStatusResponse {
    pub budget_id: BudgetId,
    pub name: String,
    pub category_id: Option<CategoryId>,
    pub window_start: NaiveDate,
    /// Exclusive.
    pub window_end: NaiveDate,
    pub amount: Money,
    pub amount_spent: Money,
    pub status: BudgetStatus,
    pub spent_percent: u32,
}

impl From<BudgetStatusReport> for BudgetStatusResponse {
    fn from(r: BudgetStatusReport) -> Self {
        Self {
            budget_id: r.budget.id,
            name: r.budget.name,
            category_id: r.budget.category_id,
            window_start: r.window.start,
            window_end: r.window.end,
            amount: r.budget.amount,
            amount_spent: r.amount_spent,
            status: r.status,
            spent_percent: r.spent_percent,
        }
    }
}

/// Machine-readable error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    /// Whether resubmitting the same request (same idempotency key) may succeed.
    pub retryable: bool,
}

impl From<&EngineError> for ErrorResponse {
    fn from(err: &EngineError) -> Self {
        let code = match err {
            EngineError::Domain(d) => match d {
                DomainError::Validation(_) | DomainError::InvalidId(_) => "validation_error",
                DomainError::InsufficientFunds { .. } => "insufficient_funds",
                DomainError::AccountInactive(_) => "account_inactive",
                DomainError::ProjectNotActive { .. } => "project_not_active",
                DomainError::ProjectOverfunded { .. } => "project_overfunded",
                DomainError::VersionConflict { .. } => "version_conflict",
                DomainError::InvalidTransition { .. } => "invalid_transition",
                DomainError::CurrencyMismatch { .. } => "currency_mismatch",
                DomainError::NotFound(_) => "not_found",
            },
            EngineError::LockTimeout { .. } => "lock_timeout",
            EngineError::DeadlockAvoided(_) => "deadlock_avoided",
            EngineError::Journal(_) => "journal_error",
            EngineError::Storage(_) => "storage_error",
        };
        Self {
            error: code.to_string(),
            message: err.to_string(),
            retryable: err.is_transient(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fundhub_core::Currency;

    #[test]
    fn money_travels_as_minor_units_and_code() {
        let req: MoneyMovementRequest = serde_json::from_str(&format!(
            r#"{{"account_id":"{}","amount":{{"amount_minor":1250,"currency":"USD"}}}}"#,
            AccountId::new()
        ))
        .unwrap();
        assert_eq!(req.amount, Money::new(1_250, Currency::USD));
        assert_eq!(req.expected_version, None);
    }

    #[test]
    fn errors_map_to_stable_codes() {
        let body = ErrorResponse::from(&EngineError::LockTimeout { timeout_ms: 5 });
        assert_eq!(body.error, "lock_timeout");
        assert!(body.retryable);

        let body = ErrorResponse::from(&EngineError::from(DomainError::ProjectOverfunded {
            project: ProjectId::new(),
            room: 2_000,
            requested: 3_000,
        }));
        assert_eq!(body.error, "project_overfunded");
        assert!(!body.retryable);
    }
}
