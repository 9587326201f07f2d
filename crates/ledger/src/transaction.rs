use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use fundhub_core::{AccountId, CategoryId, DomainError, DomainResult, Entity, Money, TransactionId};

/// Kind of money movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Income,
    Expense,
    Transfer,
    Investment,
}

impl TransactionKind {
    /// Transfers and investments move money between two accounts.
    pub fn requires_counterparty(self) -> bool {
        match self {
            TransactionKind::Transfer | TransactionKind::Investment => true,
            TransactionKind::Income | TransactionKind::Expense => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::Income => "INCOME",
            TransactionKind::Expense => "EXPENSE",
            TransactionKind::Transfer => "TRANSFER",
            TransactionKind::Investment => "INVESTMENT",
        }
    }
}

/// Lifecycle status. PENDING is never persisted; COMPLETED and FAILED are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionStatus::Completed | TransactionStatus::Failed)
    }
}

/// Caller-supplied token that makes a retried request take effect once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub const MAX_LEN: usize = 128;

    pub fn new(key: impl Into<String>) -> DomainResult<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(DomainError::validation("idempotency key must not be empty"));
        }
        if key.len() > Self::MAX_LEN {
            return Err(DomainError::validation(format!(
                "idempotency key longer than {} bytes",
                Self::MAX_LEN
            )));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<IdempotencyKey> for String {
    fn from(value: IdempotencyKey) -> Self {
        value.0
    }
}

impl core::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A transaction ready to be appended to the journal (no id/sequence yet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDraft {
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub amount: Money,
    pub account_id: AccountId,
    pub counterparty_id: Option<AccountId>,
    pub category_id: Option<CategoryId>,
    pub idempotency_key: Option<IdempotencyKey>,
    pub description: Option<String>,
    /// Business time (used for budget windows); defaults to now.
    pub occurred_at: DateTime<Utc>,
    /// Set on compensating transactions: the row being reversed.
    #[serde(default)]
    pub reverses: Option<TransactionId>,
}

impl TransactionDraft {
    fn base(kind: TransactionKind, account_id: AccountId, amount: Money) -> Self {
        Self {
            kind,
            status: TransactionStatus::Completed,
            amount,
            account_id,
            counterparty_id: None,
            category_id: None,
            idempotency_key: None,
            description: None,
            occurred_at: Utc::now(),
            reverses: None,
        }
    }

    pub fn income(account_id: AccountId, amount: Money) -> Self {
        Self::base(TransactionKind::Income, account_id, amount)
    }

    pub fn expense(account_id: AccountId, amount: Money) -> Self {
        Self::base(TransactionKind::Expense, account_id, amount)
    }

    pub fn transfer(from: AccountId, to: AccountId, amount: Money) -> Self {
        let mut draft = Self::base(TransactionKind::Transfer, from, amount);
        draft.counterparty_id = Some(to);
        draft
    }

    pub fn investment(investor: AccountId, pool: AccountId, amount: Money) -> Self {
        let mut draft = Self::base(TransactionKind::Investment, investor, amount);
        draft.counterparty_id = Some(pool);
        draft
    }

    pub fn with_category(mut self, category_id: Option<CategoryId>) -> Self {
        self.category_id = category_id;
        self
    }

    pub fn with_idempotency_key(mut self, key: Option<IdempotencyKey>) -> Self {
        self.idempotency_key = key;
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = at;
        self
    }

    /// Compensating movement that cancels `original`'s balance effect.
    ///
    /// INCOME is undone by an EXPENSE, EXPENSE by an INCOME and a TRANSFER by
    /// the opposite TRANSFER. Investments are settled through their project
    /// and reversals cannot themselves be reversed.
    pub fn reversal_of(original: &Transaction) -> DomainResult<Self> {
        if !original.is_completed() {
            return Err(DomainError::validation(
                "only COMPLETED transactions can be reversed",
            ));
        }
        if original.reverses.is_some() {
            return Err(DomainError::validation("a reversal cannot be reversed"));
        }
        let mut draft = match (original.kind, original.counterparty_id) {
            (TransactionKind::Income, _) => Self::expense(original.account_id, original.amount),
            (TransactionKind::Expense, _) => Self::income(original.account_id, original.amount),
            (TransactionKind::Transfer, Some(to)) => {
                Self::transfer(to, original.account_id, original.amount)
            }
            (TransactionKind::Transfer, None) => {
                return Err(DomainError::validation("transfer without a counterparty"));
            }
            (TransactionKind::Investment, _) => {
                return Err(DomainError::validation("investments cannot be reversed"));
            }
        };
        draft.category_id = original.category_id;
        draft.description = Some(format!("reversal of #{}", original.sequence));
        draft.reverses = Some(original.id);
        Ok(draft)
    }

    /// Record a rejected attempt for audit; it never moves a balance.
    pub fn failed(mut self) -> Self {
        self.status = TransactionStatus::Failed;
        self
    }

    pub fn validate(&self) -> DomainResult<()> {
        self.amount.ensure_positive()?;
        if !self.status.is_terminal() {
            return Err(DomainError::validation(
                "only COMPLETED or FAILED transactions are journaled",
            ));
        }
        match (self.kind.requires_counterparty(), self.counterparty_id) {
            (true, None) => Err(DomainError::validation(format!(
                "{} requires a counterparty account",
                self.kind.as_str()
            ))),
            (true, Some(to)) if to == self.account_id => Err(DomainError::validation(
                "source and destination accounts must differ",
            )),
            (false, Some(_)) => Err(DomainError::validation(format!(
                "{} cannot have a counterparty account",
                self.kind.as_str()
            ))),
            _ => Ok(()),
        }
    }

    /// Business dates after `today` are refused.
    pub fn ensure_not_future(&self, today: NaiveDate) -> DomainResult<()> {
        if self.occurred_at.date_naive() > today {
            return Err(DomainError::validation(
                "transaction date cannot be in the future",
            ));
        }
        Ok(())
    }

    /// Whether `other` describes the same request (used to detect reused keys).
    pub fn same_request_as(&self, other: &Transaction) -> bool {
        self.kind == other.kind
            && self.amount == other.amount
            && self.account_id == other.account_id
            && self.counterparty_id == other.counterparty_id
            && self.reverses == other.reverses
    }
}

/// A journaled transaction (immutable once written).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    /// Monotonically increasing position in the journal (starts at 1).
    pub sequence: u64,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub amount: Money,
    pub account_id: AccountId,
    pub counterparty_id: Option<AccountId>,
    pub category_id: Option<CategoryId>,
    pub idempotency_key: Option<IdempotencyKey>,
    pub description: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reverses: Option<TransactionId>,
}

impl Transaction {
    /// Materialize a validated draft at the given journal position.
    pub fn from_draft(
        id: TransactionId,
        sequence: u64,
        draft: TransactionDraft,
        now: DateTime<Utc>,
    ) -> Self {
        let completed_at = match draft.status {
            TransactionStatus::Completed => Some(now),
            TransactionStatus::Pending | TransactionStatus::Failed => None,
        };
        Self {
            id,
            sequence,
            kind: draft.kind,
            status: draft.status,
            amount: draft.amount,
            account_id: draft.account_id,
            counterparty_id: draft.counterparty_id,
            category_id: draft.category_id,
            idempotency_key: draft.idempotency_key,
            description: draft.description,
            occurred_at: draft.occurred_at,
            created_at: now,
            completed_at,
            reverses: draft.reverses,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TransactionStatus::Completed
    }

    pub fn touches(&self, account: AccountId) -> bool {
        self.account_id == account || self.counterparty_id == Some(account)
    }

    /// Signed balance effect of this transaction on `account` (0 if unrelated or not completed).
    pub fn effect_on(&self, account: AccountId) -> i64 {
        if !self.is_completed() {
            return 0;
        }
        let amount = self.amount.amount_minor;
        let mut effect = 0;
        if self.account_id == account {
            effect += match self.kind {
                TransactionKind::Income => amount,
                TransactionKind::Expense
                | TransactionKind::Transfer
                | TransactionKind::Investment => -amount,
            };
        }
        if self.counterparty_id == Some(account) {
            effect += amount;
        }
        effect
    }
}

impl Entity for Transaction {
    type Id = TransactionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
