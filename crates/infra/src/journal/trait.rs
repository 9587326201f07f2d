use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use fundhub_core::{AccountId, CategoryId, Currency, TransactionId};
use fundhub_ledger::{IdempotencyKey, Transaction, TransactionDraft, TransactionKind, TransactionStatus};
use std::sync::Arc;

/// Result of an append.
///
/// `duplicate == true` means the draft carried an idempotency key the journal
/// had already recorded; `transaction` is the first row and nothing new was
/// written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appended {
    pub transaction: Transaction,
    pub duplicate: bool,
}

/// Journal operation error.
///
/// These are infrastructure errors; business rejections are decided before a
/// draft ever reaches the journal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JournalError {
    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("journal storage failure: {0}")]
    Storage(String),
}

/// Row filter for journal reads. Every `None` field matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFilter {
    /// Matches the primary account or the counterparty.
    pub account: Option<AccountId>,
    pub kind: Option<TransactionKind>,
    pub status: Option<TransactionStatus>,
    pub category: Option<CategoryId>,
    pub currency: Option<Currency>,
    /// Inclusive lower bound on business time.
    pub occurred_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on business time.
    pub occurred_until: Option<DateTime<Utc>>,
    /// Drop reversed rows and their reversals, as if neither happened.
    #[serde(default)]
    pub net_of_reversals: bool,
}

impl TransactionFilter {
    pub fn for_account(account: AccountId) -> Self {
        Self {
            account: Some(account),
            ..Self::default()
        }
    }

    pub fn of_kind(kind: TransactionKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn completed(mut self) -> Self {
        self.status = Some(TransactionStatus::Completed);
        self
    }

    pub fn between(mut self, from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.occurred_from = Some(from);
        self.occurred_until = Some(until);
        self
    }

    pub fn net_of_reversals(mut self) -> Self {
        self.net_of_reversals = true;
        self
    }

    /// Row-local predicate. Excluding the reversed originals themselves needs
    /// the journal's reversal index, so `select` finishes that part.
    pub fn matches(&self, tx: &Transaction) -> bool {
        self.account.is_none_or(|a| tx.touches(a))
            && self.kind.is_none_or(|k| tx.kind == k)
            && self.status.is_none_or(|s| tx.status == s)
            && self.category.is_none_or(|c| tx.category_id == Some(c))
            && self.currency.is_none_or(|c| tx.amount.currency == c)
            && self.occurred_from.is_none_or(|from| tx.occurred_at >= from)
            && self.occurred_until.is_none_or(|until| tx.occurred_at < until)
            && !(self.net_of_reversals && tx.reverses.is_some())
    }
}

/// Zero-based page request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
}

impl PageRequest {
    pub const MAX_SIZE: u32 = 500;

    pub fn new(page: u32, size: u32) -> Self {
        Self { page, size }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 0, size: 20 }
    }
}

/// One page of results plus the total match count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub size: u32,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            size: self.size,
            total: self.total,
        }
    }
}

/// Append-only, idempotent transaction journal.
///
/// Implementations must:
/// - accept only terminal (COMPLETED/FAILED) drafts
/// - assign sequence numbers monotonically from 1 (no gaps, no duplicates)
/// - make each append atomic
/// - treat `idempotency_key` as unique: a second append with a known key
///   returns the recorded row with `duplicate = true`
/// - accept at most one reversal per row, and only of a row it holds
/// - honour `TransactionFilter::net_of_reversals` in `select`
/// - never update or delete a row once written
pub trait TransactionJournal: Send + Sync {
    fn append(&self, draft: TransactionDraft) -> Result<Appended, JournalError>;

    fn get(&self, id: TransactionId) -> Result<Option<Transaction>, JournalError>;

    fn find_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Transaction>, JournalError>;

    /// The row that reverses `id`, if any.
    fn reversal_of(&self, id: TransactionId) -> Result<Option<Transaction>, JournalError>;

    /// Matching rows in ascending sequence order.
    fn select(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>, JournalError>;

    /// Sequence of the most recent row (0 when empty).
    fn last_sequence(&self) -> Result<u64, JournalError>;

    /// Replay every COMPLETED transaction touching `account` from genesis.
    fn reconstruct_balance(&self, account: AccountId) -> Result<i64, JournalError> {
        let rows = self.select(&TransactionFilter::for_account(account).completed())?;
        let total: i128 = rows.iter().map(|tx| i128::from(tx.effect_on(account))).sum();
        i64::try_from(total)
            .map_err(|_| JournalError::InvalidQuery(format!("balance {total} is out of range")))
    }

    /// Newest-first page of matching rows.
    fn page(
        &self,
        filter: &TransactionFilter,
        request: PageRequest,
    ) -> Result<Page<Transaction>, JournalError> {
        if request.size == 0 || request.size > PageRequest::MAX_SIZE {
            return Err(JournalError::InvalidQuery(format!(
                "page size must be between 1 and {}",
                PageRequest::MAX_SIZE
            )));
        }
        let rows = self.select(filter)?;
        let total = rows.len() as u64;
        let skip = (request.page as usize).saturating_mul(request.size as usize);
        let items = rows
            .into_iter()
            .rev()
            .skip(skip)
            .take(request.size as usize)
            .collect();
        Ok(Page {
            items,
            page: request.page,
            size: request.size,
            total,
        })
    }

    /// `(income, expense)` totals over COMPLETED rows matching `filter`.
    ///
    /// Fails with `InvalidQuery` when either total leaves the `i64` range.
    fn totals(&self, filter: &TransactionFilter) -> Result<(i64, i64), JournalError> {
        let mut filter = filter.clone();
        filter.status = Some(TransactionStatus::Completed);
        let mut income = 0i128;
        let mut expense = 0i128;
        for tx in self.select(&filter)? {
            match tx.kind {
                TransactionKind::Income => income += i128::from(tx.amount.amount_minor),
                TransactionKind::Expense => expense += i128::from(tx.amount.amount_minor),
                TransactionKind::Transfer | TransactionKind::Investment => {}
            }
        }
        let narrow = |total: i128| {
            i64::try_from(total)
                .map_err(|_| JournalError::InvalidQuery(format!("total {total} is out of range")))
        };
        Ok((narrow(income)?, narrow(expense)?))
    }
}

impl<J> TransactionJournal for Arc<J>
where
    J: TransactionJournal + ?Sized,
{
    fn append(&self, draft: TransactionDraft) -> Result<Appended, JournalError> {
        (**self).append(draft)
    }

    fn get(&self, id: TransactionId) -> Result<Option<Transaction>, JournalError> {
        (**self).get(id)
    }

    fn find_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Transaction>, JournalError> {
        (**self).find_by_idempotency_key(key)
    }

    fn reversal_of(&self, id: TransactionId) -> Result<Option<Transaction>, JournalError> {
        (**self).reversal_of(id)
    }

    fn select(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>, JournalError> {
        (**self).select(filter)
    }

    fn last_sequence(&self) -> Result<u64, JournalError> {
        (**self).last_sequence()
    }
}
