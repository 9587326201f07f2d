use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fundhub_core::{AccountId, AggregateRoot, Currency, DomainError, DomainResult, Money, OwnerId};

/// Account kind (determines whether the balance may go negative).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountKind {
    Checking,
    Savings,
    Investment,
    CreditCard,
    Loan,
    Crypto,
    Business,
}

impl AccountKind {
    /// Credit cards and loans may run a negative balance down to their credit limit.
    pub fn allows_negative(self) -> bool {
        match self {
            AccountKind::CreditCard | AccountKind::Loan => true,
            AccountKind::Checking
            | AccountKind::Savings
            | AccountKind::Investment
            | AccountKind::Crypto
            | AccountKind::Business => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccountKind::Checking => "CHECKING",
            AccountKind::Savings => "SAVINGS",
            AccountKind::Investment => "INVESTMENT",
            AccountKind::CreditCard => "CREDIT_CARD",
            AccountKind::Loan => "LOAN",
            AccountKind::Crypto => "CRYPTO",
            AccountKind::Business => "BUSINESS",
        }
    }
}

/// Request to open an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAccount {
    pub owner: OwnerId,
    pub name: String,
    pub kind: AccountKind,
    pub currency: Currency,
    /// Journaled as an INCOME transaction when positive.
    pub opening_balance: i64,
    /// Negative floor for CREDIT_CARD/LOAN; ignored for other kinds.
    pub credit_limit: Option<i64>,
}

/// Aggregate root: Account.
///
/// `balance` is a cache of the journal; the ledger store is the only writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    id: AccountId,
    owner: OwnerId,
    name: String,
    kind: AccountKind,
    currency: Currency,
    balance: i64,
    credit_limit: i64,
    active: bool,
    version: u64,
    created_at: DateTime<Utc>,
}

impl Account {
    /// Validate the request and build an empty account (balance 0, version 0).
    ///
    /// The opening balance is applied afterwards as a regular credit so the
    /// journal explains every unit of the balance.
    pub fn open(
        id: AccountId,
        req: &OpenAccount,
        default_credit_limit: i64,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if req.name.trim().is_empty() {
            return Err(DomainError::validation("account name must not be empty"));
        }
        if req.opening_balance < 0 {
            return Err(DomainError::validation("opening balance cannot be negative"));
        }

        let credit_limit = if req.kind.allows_negative() {
            let limit = req.credit_limit.unwrap_or(default_credit_limit);
            if limit < 0 {
                return Err(DomainError::validation("credit limit cannot be negative"));
            }
            limit
        } else {
            0
        };

        Ok(Self {
            id,
            owner: req.owner,
            name: req.name.trim().to_string(),
            kind: req.kind,
            currency: req.currency,
            balance: 0,
            credit_limit,
            active: true,
            version: 0,
            created_at: now,
        })
    }

    pub fn id_typed(&self) -> AccountId {
        self.id
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AccountKind {
        self.kind
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn balance(&self) -> i64 {
        self.balance
    }

    pub fn balance_money(&self) -> Money {
        Money::new(self.balance, self.currency)
    }

    pub fn credit_limit(&self) -> i64 {
        self.credit_limit
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Lowest balance this account may reach.
    pub fn floor(&self) -> i64 {
        if self.kind.allows_negative() {
            -self.credit_limit
        } else {
            0
        }
    }

    /// Amount that can still be debited.
    pub fn available(&self) -> i64 {
        self.balance.saturating_sub(self.floor())
    }

    fn ensure_movable(&self, amount: Money) -> DomainResult<()> {
        amount.ensure_positive()?;
        amount.ensure_same_currency(self.currency)?;
        if !self.active {
            return Err(DomainError::AccountInactive(self.id));
        }
        Ok(())
    }

    /// Decide a debit: returns the resulting balance or the reason it is refused.
    ///
    /// Violations are rejected, never clamped.
    pub fn check_debit(&self, amount: Money) -> DomainResult<i64> {
        self.ensure_movable(amount)?;
        let next = self
            .balance
            .checked_sub(amount.amount_minor)
            .ok_or_else(|| DomainError::validation("balance overflow"))?;
        if next < self.floor() {
            return Err(DomainError::InsufficientFunds {
                account: self.id,
                available: self.available(),
                requested: amount.amount_minor,
            });
        }
        Ok(next)
    }

    /// Decide a credit: returns the resulting balance.
    pub fn check_credit(&self, amount: Money) -> DomainResult<i64> {
        self.ensure_movable(amount)?;
        self.balance
            .checked_add(amount.amount_minor)
            .ok_or_else(|| DomainError::validation("balance overflow"))
    }

    /// Commit a balance previously decided by `check_debit`/`check_credit`.
    pub fn apply_balance(&mut self, next: i64) {
        self.balance = next;
        self.version += 1;
    }

    /// Soft delete. Idempotent on the flag but still a versioned change.
    pub fn deactivate(&mut self) {
        self.active = false;
        self.version += 1;
    }
}

impl AggregateRoot for Account {
    type Id = AccountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}
