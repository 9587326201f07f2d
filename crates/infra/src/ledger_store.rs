//! Account balances and the atomic money-movement primitives.
//!
//! The store is the only writer of `Account.balance` and `Account.version`.
//! Every balance change happens in one unit with its journal append:
//!
//! ```text
//! admission checks (amount, category, business date)
//!   ↓
//! acquire entity locks (ConsistencyGuard)
//!   ↓
//! replay check (idempotency key already journaled?)
//!   ↓
//! decide new balances (pure checks on the Account aggregate)
//!   ↓
//! append one COMPLETED transaction
//!   ↓
//! commit the cached balances, bump versions
//!   ↓
//! release locks
//! ```
//!
//! If the append fails nothing is committed, so the cached balance always
//! equals the journal replay once the locks are released.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use fundhub_core::{
    AccountId, AggregateRoot, CategoryId, Currency, DomainError, ExpectedVersion, Money, OwnerId,
    TransactionId,
};
use fundhub_ledger::{
    Account, AccountKind, IdempotencyKey, OpenAccount, Transaction, TransactionDraft,
    TransactionKind,
};

use crate::category::CategoryStore;
use crate::error::{EngineError, EngineResult};
use crate::guard::{ConsistencyGuard, LockKey, LockSet};
use crate::journal::TransactionJournal;

/// Optional metadata attached to a money movement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub category_id: Option<CategoryId>,
    pub idempotency_key: Option<IdempotencyKey>,
    pub description: Option<String>,
    /// Business time; defaults to now.
    pub occurred_at: Option<DateTime<Utc>>,
}

impl Posting {
    pub fn with_category(mut self, category: CategoryId) -> Self {
        self.category_id = Some(category);
        self
    }

    pub fn with_idempotency_key(mut self, key: IdempotencyKey) -> Self {
        self.idempotency_key = Some(key);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }

    /// Fields left unset keep whatever the draft already carries.
    fn apply(self, draft: TransactionDraft) -> TransactionDraft {
        let category = self.category_id.or(draft.category_id);
        let description = self.description.or_else(|| draft.description.clone());
        let draft = draft
            .with_category(category)
            .with_idempotency_key(self.idempotency_key)
            .with_description(description);
        match self.occurred_at {
            Some(at) => draft.occurred_at(at),
            None => draft,
        }
    }
}

/// Outcome of a single-account movement (debit or credit).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posted {
    pub transaction: Transaction,
    pub balance: Money,
    pub version: u64,
    /// The idempotency key was already journaled; nothing moved.
    pub replayed: bool,
}

/// Outcome of a two-account movement (transfer or investment leg).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transferred {
    pub transaction: Transaction,
    pub from_balance: Money,
    pub to_balance: Money,
    pub replayed: bool,
}

/// Outcome of a reversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reversed {
    pub original: Transaction,
    pub reversal: Transaction,
    /// The reversal's idempotency key was already journaled; nothing moved.
    pub replayed: bool,
}

/// Cached balance next to its journal replay.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceCheck {
    pub account: AccountId,
    pub cached: i64,
    pub reconstructed: i64,
}

impl BalanceCheck {
    pub fn is_consistent(&self) -> bool {
        self.cached == self.reconstructed
    }
}

/// Durable account balances with atomic debit/credit/transfer.
pub struct LedgerStore<J> {
    guard: Arc<ConsistencyGuard>,
    journal: J,
    accounts: RwLock<HashMap<AccountId, Account>>,
    default_credit_limit: i64,
    categories: Option<Arc<dyn CategoryStore>>,
}

impl<J> core::fmt::Debug for LedgerStore<J> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LedgerStore")
            .field("guard", &self.guard)
            .field("default_credit_limit", &self.default_credit_limit)
            .field("checks_categories", &self.categories.is_some())
            .finish_non_exhaustive()
    }
}

impl<J> LedgerStore<J>
where
    J: TransactionJournal,
{
    pub fn new(guard: Arc<ConsistencyGuard>, journal: J, default_credit_limit: i64) -> Self {
        Self {
            guard,
            journal,
            accounts: RwLock::new(HashMap::new()),
            default_credit_limit,
            categories: None,
        }
    }

    /// Refuse movements that reference a category `categories` does not know.
    pub fn with_categories(mut self, categories: Arc<dyn CategoryStore>) -> Self {
        self.categories = Some(categories);
        self
    }

    pub fn guard(&self) -> &Arc<ConsistencyGuard> {
        &self.guard
    }

    pub fn journal(&self) -> &J {
        &self.journal
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Row access
    // ─────────────────────────────────────────────────────────────────────────

    fn load(&self, id: AccountId) -> EngineResult<Account> {
        let accounts = self
            .accounts
            .read()
            .map_err(|_| EngineError::poisoned("account table"))?;
        accounts
            .get(&id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("account").into())
    }

    fn commit(&self, rows: impl IntoIterator<Item = Account>) -> EngineResult<()> {
        let mut accounts = self
            .accounts
            .write()
            .map_err(|_| EngineError::poisoned("account table"))?;
        for row in rows {
            accounts.insert(row.id_typed(), row);
        }
        Ok(())
    }

    /// Checks that need no lock: shape, amount, category and business date.
    fn admit(&self, draft: &TransactionDraft) -> EngineResult<()> {
        draft.validate()?;
        // A reversal inherits the already-validated category of its original.
        if draft.reverses.is_none() {
            if let (Some(category), Some(store)) = (draft.category_id, &self.categories) {
                if !store.exists(category) {
                    return Err(DomainError::not_found("category").into());
                }
            }
        }
        draft.ensure_not_future(Utc::now().date_naive())?;
        Ok(())
    }

    /// A row recorded under the draft's key must describe the same request.
    fn match_recorded(draft: &TransactionDraft, recorded: Transaction) -> EngineResult<Transaction> {
        if draft.same_request_as(&recorded) {
            return Ok(recorded);
        }
        let key = draft
            .idempotency_key
            .as_ref()
            .map(IdempotencyKey::as_str)
            .unwrap_or_default();
        Err(DomainError::validation(format!(
            "idempotency key '{key}' was already used for a different request"
        ))
        .into())
    }

    /// Look up a previously journaled request by its key.
    ///
    /// A known key with the same parameters is a replay; a known key with
    /// different parameters is refused.
    fn find_replay(&self, draft: &TransactionDraft) -> EngineResult<Option<Transaction>> {
        let Some(key) = &draft.idempotency_key else {
            return Ok(None);
        };
        match self.journal.find_by_idempotency_key(key)? {
            Some(tx) => Self::match_recorded(draft, tx).map(Some),
            None => Ok(None),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────────────────

    /// Open an account. A positive opening balance is journaled as INCOME.
    pub fn open_account(&self, req: OpenAccount) -> EngineResult<Account> {
        let id = AccountId::new();
        let account = Account::open(id, &req, self.default_credit_limit, Utc::now())?;

        let locks = self.guard.acquire([LockKey::Account(id)])?;
        self.commit([account])?;

        if req.opening_balance > 0 {
            let amount = Money::new(req.opening_balance, req.currency);
            let draft = Posting::default()
                .with_description("opening balance")
                .apply(TransactionDraft::income(id, amount));
            self.post_locked(&locks, draft, ExpectedVersion::Exact(0))?;
        }
        drop(locks);

        info!(account = %id, owner = %req.owner, kind = req.kind.as_str(), "account opened");
        self.load(id)
    }

    /// Withdraw `amount` (journaled as EXPENSE).
    pub fn debit(
        &self,
        id: AccountId,
        amount: Money,
        expected: ExpectedVersion,
        posting: Posting,
    ) -> EngineResult<Posted> {
        let draft = posting.apply(TransactionDraft::expense(id, amount));
        self.admit(&draft)?;
        let locks = self.guard.acquire([LockKey::Account(id)])?;
        self.post_locked(&locks, draft, expected)
    }

    /// Deposit `amount` (journaled as INCOME).
    pub fn credit(
        &self,
        id: AccountId,
        amount: Money,
        expected: ExpectedVersion,
        posting: Posting,
    ) -> EngineResult<Posted> {
        let draft = posting.apply(TransactionDraft::income(id, amount));
        self.admit(&draft)?;
        let locks = self.guard.acquire([LockKey::Account(id)])?;
        self.post_locked(&locks, draft, expected)
    }

    fn post_locked(
        &self,
        locks: &LockSet,
        draft: TransactionDraft,
        expected: ExpectedVersion,
    ) -> EngineResult<Posted> {
        if draft.kind.requires_counterparty() {
            return Err(DomainError::validation(format!(
                "{} needs two accounts",
                draft.kind.as_str()
            ))
            .into());
        }
        let id = draft.account_id;
        let (kind, amount) = (draft.kind, draft.amount);
        locks.require(&[LockKey::Account(id)])?;

        let mut account = self.load(id)?;

        if let Some(tx) = self.find_replay(&draft)? {
            debug!(account = %id, transaction = %tx.id, "replayed idempotent movement");
            return Ok(Posted {
                transaction: tx,
                balance: account.balance_money(),
                version: account.version(),
                replayed: true,
            });
        }

        expected.check(account.version())?;
        let next = match kind {
            TransactionKind::Income => account.check_credit(amount)?,
            _ => account.check_debit(amount)?,
        };

        let appended = self.journal.append(draft.clone())?;
        if appended.duplicate {
            // Key appeared between the replay check and the append, possibly
            // from a request on another account.
            let tx = Self::match_recorded(&draft, appended.transaction)?;
            return Ok(Posted {
                transaction: tx,
                balance: account.balance_money(),
                version: account.version(),
                replayed: true,
            });
        }

        account.apply_balance(next);
        let posted = Posted {
            transaction: appended.transaction,
            balance: account.balance_money(),
            version: account.version(),
            replayed: false,
        };
        self.commit([account])?;

        debug!(
            account = %id,
            kind = kind.as_str(),
            amount = amount.amount_minor,
            sequence = posted.transaction.sequence,
            "movement committed"
        );
        Ok(posted)
    }

    /// Move `amount` between two accounts atomically (journaled as TRANSFER).
    pub fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Money,
        posting: Posting,
    ) -> EngineResult<Transferred> {
        let draft = posting.apply(TransactionDraft::transfer(from, to, amount));
        self.admit(&draft)?;
        let locks = self
            .guard
            .acquire([LockKey::Account(from), LockKey::Account(to)])?;
        self.transfer_locked(&locks, draft)
    }

    /// Transfer under locks the caller already holds.
    ///
    /// `locks` must cover both accounts; otherwise `DeadlockAvoided` is
    /// returned and nothing is touched.
    pub fn transfer_held(
        &self,
        locks: &LockSet,
        kind: TransactionKind,
        from: AccountId,
        to: AccountId,
        amount: Money,
        posting: Posting,
    ) -> EngineResult<Transferred> {
        let base = match kind {
            TransactionKind::Transfer => TransactionDraft::transfer(from, to, amount),
            TransactionKind::Investment => TransactionDraft::investment(from, to, amount),
            TransactionKind::Income | TransactionKind::Expense => {
                return Err(DomainError::validation(format!(
                    "{} moves a single account",
                    kind.as_str()
                ))
                .into());
            }
        };
        let draft = posting.apply(base);
        self.admit(&draft)?;
        self.transfer_locked(locks, draft)
    }

    fn transfer_locked(&self, locks: &LockSet, draft: TransactionDraft) -> EngineResult<Transferred> {
        let Some(to) = draft.counterparty_id else {
            return Err(DomainError::validation(format!(
                "{} requires a counterparty account",
                draft.kind.as_str()
            ))
            .into());
        };
        let from = draft.account_id;
        let (kind, amount) = (draft.kind, draft.amount);
        locks.require(&[LockKey::Account(from), LockKey::Account(to)])?;

        let mut source = self.load(from)?;
        let mut target = self.load(to)?;

        if let Some(tx) = self.find_replay(&draft)? {
            debug!(from = %from, to = %to, transaction = %tx.id, "replayed idempotent transfer");
            return Ok(Transferred {
                transaction: tx,
                from_balance: source.balance_money(),
                to_balance: target.balance_money(),
                replayed: true,
            });
        }

        if source.currency() != target.currency() {
            return Err(DomainError::CurrencyMismatch {
                left: source.currency(),
                right: target.currency(),
            }
            .into());
        }
        let source_next = source.check_debit(amount)?;
        let target_next = target.check_credit(amount)?;

        let appended = self.journal.append(draft.clone())?;
        if appended.duplicate {
            let tx = Self::match_recorded(&draft, appended.transaction)?;
            return Ok(Transferred {
                transaction: tx,
                from_balance: source.balance_money(),
                to_balance: target.balance_money(),
                replayed: true,
            });
        }

        source.apply_balance(source_next);
        target.apply_balance(target_next);
        let done = Transferred {
            transaction: appended.transaction,
            from_balance: source.balance_money(),
            to_balance: target.balance_money(),
            replayed: false,
        };
        self.commit([source, target])?;

        debug!(
            from = %from,
            to = %to,
            kind = kind.as_str(),
            amount = amount.amount_minor,
            sequence = done.transaction.sequence,
            "transfer committed"
        );
        Ok(done)
    }

    /// Cancel a committed movement with a compensating transaction.
    ///
    /// The original row stays in the journal. The reversal links back to it,
    /// takes the same account locks and is subject to the same balance rules,
    /// so reversing a deposit that was already spent fails with
    /// `InsufficientFunds`. A row is reversed at most once.
    pub fn reverse(&self, id: TransactionId, posting: Posting) -> EngineResult<Reversed> {
        let original = self
            .journal
            .get(id)?
            .ok_or(DomainError::not_found("transaction"))?;
        let posting = Posting {
            category_id: None,
            ..posting
        };
        let draft = posting.apply(TransactionDraft::reversal_of(&original)?);
        self.admit(&draft)?;

        let mut keys = vec![LockKey::Account(original.account_id)];
        keys.extend(original.counterparty_id.map(LockKey::Account));
        let locks = self.guard.acquire(keys)?;

        if let Some(tx) = self.find_replay(&draft)? {
            debug!(original = %id, reversal = %tx.id, "replayed idempotent reversal");
            return Ok(Reversed {
                original,
                reversal: tx,
                replayed: true,
            });
        }
        if let Some(existing) = self.journal.reversal_of(id)? {
            return Err(DomainError::validation(format!(
                "transaction #{} was already reversed by #{}",
                original.sequence, existing.sequence
            ))
            .into());
        }

        let (reversal, replayed) = if draft.kind.requires_counterparty() {
            let done = self.transfer_locked(&locks, draft)?;
            (done.transaction, done.replayed)
        } else {
            let posted = self.post_locked(&locks, draft, ExpectedVersion::Any)?;
            (posted.transaction, posted.replayed)
        };
        drop(locks);

        info!(
            original = %id,
            reversal = %reversal.id,
            kind = original.kind.as_str(),
            amount = original.amount.amount_minor,
            "transaction reversed"
        );
        Ok(Reversed {
            original,
            reversal,
            replayed,
        })
    }

    /// Soft delete: the account stays readable but refuses every movement.
    pub fn deactivate(&self, id: AccountId, expected: ExpectedVersion) -> EngineResult<u64> {
        let _locks = self.guard.acquire([LockKey::Account(id)])?;
        let mut account = self.load(id)?;
        expected.check(account.version())?;
        if !account.is_active() {
            return Err(DomainError::AccountInactive(id).into());
        }
        account.deactivate();
        let version = account.version();
        self.commit([account])?;
        info!(account = %id, "account deactivated");
        Ok(version)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub fn account(&self, id: AccountId) -> EngineResult<Account> {
        self.load(id)
    }

    /// Accounts of one owner, oldest first.
    pub fn accounts_for_owner(&self, owner: OwnerId) -> EngineResult<Vec<Account>> {
        let accounts = self
            .accounts
            .read()
            .map_err(|_| EngineError::poisoned("account table"))?;
        let mut rows: Vec<Account> = accounts
            .values()
            .filter(|a| a.owner() == owner)
            .cloned()
            .collect();
        rows.sort_by_key(|a| (a.created_at(), a.id_typed()));
        Ok(rows)
    }

    /// Sum of the active balances of one owner in one currency.
    pub fn total_balance(
        &self,
        owner: OwnerId,
        kind: Option<AccountKind>,
        currency: Currency,
    ) -> EngineResult<Money> {
        let accounts = self.accounts_for_owner(owner)?;
        let balances = accounts
            .iter()
            .filter(|a| a.is_active() && a.currency() == currency)
            .filter(|a| kind.is_none_or(|k| a.kind() == k))
            .map(Account::balance);
        Ok(Money::total(currency, balances)?)
    }

    /// Compare the cached balance with a replay of the journal.
    ///
    /// Takes the account lock so no movement is half-applied while reading.
    pub fn verify_balance(&self, id: AccountId) -> EngineResult<BalanceCheck> {
        let _locks = self.guard.acquire([LockKey::Account(id)])?;
        let account = self.load(id)?;
        let reconstructed = self.journal.reconstruct_balance(id)?;
        Ok(BalanceCheck {
            account: id,
            cached: account.balance(),
            reconstructed,
        })
    }

    /// Every account whose cached balance disagrees with the journal.
    pub fn verify_all(&self) -> EngineResult<Vec<BalanceCheck>> {
        let ids: Vec<AccountId> = {
            let accounts = self
                .accounts
                .read()
                .map_err(|_| EngineError::poisoned("account table"))?;
            let mut ids: Vec<_> = accounts.keys().copied().collect();
            ids.sort();
            ids
        };

        let mut mismatches = Vec::new();
        for id in ids {
            let check = self.verify_balance(id)?;
            if !check.is_consistent() {
                warn!(
                    account = %id,
                    cached = check.cached,
                    reconstructed = check.reconstructed,
                    "balance disagrees with journal"
                );
                mismatches.push(check);
            }
        }
        Ok(mismatches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::InMemoryCategoryStore;
    use crate::journal::{Appended, InMemoryJournal, JournalError, TransactionFilter};
    use proptest::prelude::*;
    use std::time::Duration;

    fn usd(amount: i64) -> Money {
        Money::new(amount, Currency::USD)
    }

    fn store() -> LedgerStore<InMemoryJournal> {
        let guard = Arc::new(ConsistencyGuard::new(Duration::from_millis(100)));
        LedgerStore::new(guard, InMemoryJournal::new(), 1_000)
    }

    fn open(store: &LedgerStore<InMemoryJournal>, kind: AccountKind, opening: i64) -> Account {
        store
            .open_account(OpenAccount {
                owner: OwnerId::new(),
                name: "main".to_string(),
                kind,
                currency: Currency::USD,
                opening_balance: opening,
                credit_limit: None,
            })
            .unwrap()
    }

    #[test]
    fn opening_balance_is_journaled() {
        let store = store();
        let acct = open(&store, AccountKind::Checking, 10_000);

        assert_eq!(acct.balance(), 10_000);
        assert_eq!(acct.version(), 1);
        let check = store.verify_balance(acct.id_typed()).unwrap();
        assert!(check.is_consistent());
        assert_eq!(store.journal().last_sequence().unwrap(), 1);
    }

    #[test]
    fn debit_below_zero_is_rejected_without_effect() {
        let store = store();
        let acct = open(&store, AccountKind::Savings, 50);

        let err = store
            .debit(acct.id_typed(), usd(100), ExpectedVersion::Any, Posting::default())
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Domain(DomainError::InsufficientFunds { available: 50, requested: 100, .. })
        ));
        assert_eq!(store.account(acct.id_typed()).unwrap().balance(), 50);
        assert_eq!(store.journal().last_sequence().unwrap(), 1);
    }

    #[test]
    fn credit_card_may_go_negative_to_its_limit() {
        let store = store();
        let card = open(&store, AccountKind::CreditCard, 0);
        let id = card.id_typed();

        let posted = store
            .debit(id, usd(1_000), ExpectedVersion::Exact(0), Posting::default())
            .unwrap();
        assert_eq!(posted.balance.amount_minor, -1_000);
        assert_eq!(posted.version, 1);

        assert!(store.debit(id, usd(1), ExpectedVersion::Any, Posting::default()).is_err());
    }

    #[test]
    fn stale_version_is_a_conflict() {
        let store = store();
        let acct = open(&store, AccountKind::Checking, 100);

        let err = store
            .credit(acct.id_typed(), usd(5), ExpectedVersion::Exact(0), Posting::default())
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::Domain(DomainError::VersionConflict { expected: 0, actual: 1 })
        );
        assert!(err.is_transient());
    }

    #[test]
    fn replayed_key_moves_money_once() {
        let store = store();
        let acct = open(&store, AccountKind::Checking, 0);
        let key = IdempotencyKey::new("dep-1").unwrap();
        let posting = Posting::default().with_idempotency_key(key);

        let first = store
            .credit(acct.id_typed(), usd(70), ExpectedVersion::Exact(0), posting.clone())
            .unwrap();
        let again = store
            .credit(acct.id_typed(), usd(70), ExpectedVersion::Exact(0), posting.clone())
            .unwrap();

        assert!(!first.replayed);
        assert!(again.replayed);
        assert_eq!(again.transaction.id, first.transaction.id);
        assert_eq!(store.account(acct.id_typed()).unwrap().balance(), 70);

        let reused = store.credit(acct.id_typed(), usd(71), ExpectedVersion::Any, posting);
        assert!(matches!(reused, Err(EngineError::Domain(DomainError::Validation(_)))));
    }

    #[test]
    fn transfer_applies_both_legs() {
        let store = store();
        let a = open(&store, AccountKind::Checking, 500);
        let b = open(&store, AccountKind::Savings, 0);

        let done = store
            .transfer(a.id_typed(), b.id_typed(), usd(200), Posting::default())
            .unwrap();
        assert_eq!(done.from_balance.amount_minor, 300);
        assert_eq!(done.to_balance.amount_minor, 200);
        assert!(store.verify_all().unwrap().is_empty());
    }

    #[test]
    fn transfer_to_inactive_account_leaves_both_untouched() {
        let store = store();
        let a = open(&store, AccountKind::Checking, 500);
        let b = open(&store, AccountKind::Checking, 0);
        store.deactivate(b.id_typed(), ExpectedVersion::Exact(0)).unwrap();

        let err = store
            .transfer(a.id_typed(), b.id_typed(), usd(100), Posting::default())
            .unwrap_err();
        assert_eq!(err, EngineError::Domain(DomainError::AccountInactive(b.id_typed())));
        assert_eq!(store.account(a.id_typed()).unwrap().balance(), 500);
        assert_eq!(store.journal().last_sequence().unwrap(), 1);
    }

    #[test]
    fn cross_currency_transfer_is_refused() {
        let store = store();
        let a = open(&store, AccountKind::Checking, 500);
        let b = store
            .open_account(OpenAccount {
                owner: OwnerId::new(),
                name: "euro".to_string(),
                kind: AccountKind::Checking,
                currency: Currency::EUR,
                opening_balance: 0,
                credit_limit: None,
            })
            .unwrap();

        let err = store
            .transfer(a.id_typed(), b.id_typed(), usd(10), Posting::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::Domain(DomainError::CurrencyMismatch { .. })));
    }

    #[test]
    fn transfer_held_requires_covering_locks() {
        let store = store();
        let a = open(&store, AccountKind::Checking, 500);
        let b = open(&store, AccountKind::Checking, 0);

        let partial = store.guard().acquire([LockKey::Account(a.id_typed())]).unwrap();
        let err = store
            .transfer_held(
                &partial,
                TransactionKind::Transfer,
                a.id_typed(),
                b.id_typed(),
                usd(1),
                Posting::default(),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::DeadlockAvoided(_)));
    }

    #[test]
    fn total_balance_filters_by_kind() {
        let store = store();
        let owner = OwnerId::new();
        for (kind, opening) in [
            (AccountKind::Checking, 100),
            (AccountKind::Savings, 250),
            (AccountKind::Savings, 50),
        ] {
            store
                .open_account(OpenAccount {
                    owner,
                    name: "acct".to_string(),
                    kind,
                    currency: Currency::USD,
                    opening_balance: opening,
                    credit_limit: None,
                })
                .unwrap();
        }

        let all = store.total_balance(owner, None, Currency::USD).unwrap();
        let savings = store
            .total_balance(owner, Some(AccountKind::Savings), Currency::USD)
            .unwrap();
        assert_eq!(all.amount_minor, 400);
        assert_eq!(savings.amount_minor, 300);
        assert_eq!(store.accounts_for_owner(owner).unwrap().len(), 3);
    }

    #[test]
    fn owner_total_past_i64_is_refused() {
        let store = store();
        let owner = OwnerId::new();
        for _ in 0..2 {
            store
                .open_account(OpenAccount {
                    owner,
                    name: "vault".to_string(),
                    kind: AccountKind::Savings,
                    currency: Currency::USD,
                    opening_balance: 5_000_000_000_000_000_000,
                    credit_limit: None,
                })
                .unwrap();
        }
        let err = store.total_balance(owner, None, Currency::USD).unwrap_err();
        assert!(matches!(err, EngineError::Domain(DomainError::Validation(_))));
    }

    #[test]
    fn unknown_category_is_refused_before_locking() {
        let categories = Arc::new(InMemoryCategoryStore::new());
        let food = categories.add();
        let store = store().with_categories(categories);
        let acct = open(&store, AccountKind::Checking, 500).id_typed();

        let err = store
            .debit(
                acct,
                usd(20),
                ExpectedVersion::Any,
                Posting::default().with_category(CategoryId::new()),
            )
            .unwrap_err();
        assert_eq!(err, EngineError::Domain(DomainError::NotFound("category")));
        assert_eq!(store.journal().last_sequence().unwrap(), 1);

        // Refused without waiting on the account lock.
        let held = store.guard().acquire([LockKey::Account(acct)]).unwrap();
        let err = store
            .credit(
                acct,
                usd(5),
                ExpectedVersion::Any,
                Posting::default().with_category(CategoryId::new()),
            )
            .unwrap_err();
        assert_eq!(err, EngineError::Domain(DomainError::NotFound("category")));
        drop(held);

        let posted = store
            .debit(acct, usd(20), ExpectedVersion::Any, Posting::default().with_category(food))
            .unwrap();
        assert_eq!(posted.transaction.category_id, Some(food));
    }

    #[test]
    fn future_dated_movement_is_refused() {
        let store = store();
        let acct = open(&store, AccountKind::Checking, 100).id_typed();
        let tomorrow = Utc::now() + chrono::Duration::days(1);

        let err = store
            .credit(acct, usd(5), ExpectedVersion::Any, Posting::default().occurred_at(tomorrow))
            .unwrap_err();
        assert!(matches!(err, EngineError::Domain(DomainError::Validation(_))));
        assert_eq!(store.account(acct).unwrap().balance(), 100);

        let yesterday = Utc::now() - chrono::Duration::days(1);
        assert!(store
            .credit(acct, usd(5), ExpectedVersion::Any, Posting::default().occurred_at(yesterday))
            .is_ok());
    }

    /// Journal whose key lookup always misses, so every reused key reaches
    /// the append as if another account's request had won the race.
    struct KeyBlindJournal(InMemoryJournal);

    impl TransactionJournal for KeyBlindJournal {
        fn append(&self, draft: TransactionDraft) -> Result<Appended, JournalError> {
            self.0.append(draft)
        }

        fn get(&self, id: TransactionId) -> Result<Option<Transaction>, JournalError> {
            self.0.get(id)
        }

        fn find_by_idempotency_key(
            &self,
            _key: &IdempotencyKey,
        ) -> Result<Option<Transaction>, JournalError> {
            Ok(None)
        }

        fn reversal_of(&self, id: TransactionId) -> Result<Option<Transaction>, JournalError> {
            self.0.reversal_of(id)
        }

        fn select(
            &self,
            filter: &TransactionFilter,
        ) -> Result<Vec<Transaction>, JournalError> {
            self.0.select(filter)
        }

        fn last_sequence(&self) -> Result<u64, JournalError> {
            self.0.last_sequence()
        }
    }

    #[test]
    fn key_taken_by_another_account_during_append_is_refused() {
        let guard = Arc::new(ConsistencyGuard::new(Duration::from_millis(100)));
        let store = LedgerStore::new(guard, KeyBlindJournal(InMemoryJournal::new()), 0);
        let open = |name: &str| {
            store
                .open_account(OpenAccount {
                    owner: OwnerId::new(),
                    name: name.to_string(),
                    kind: AccountKind::Checking,
                    currency: Currency::USD,
                    opening_balance: 0,
                    credit_limit: None,
                })
                .unwrap()
                .id_typed()
        };
        let (a, b) = (open("a"), open("b"));
        let posting = Posting::default().with_idempotency_key(IdempotencyKey::new("shared").unwrap());

        let first = store.credit(a, usd(10), ExpectedVersion::Any, posting.clone()).unwrap();
        assert!(!first.replayed);

        let err = store.credit(b, usd(20), ExpectedVersion::Any, posting.clone()).unwrap_err();
        assert!(matches!(err, EngineError::Domain(DomainError::Validation(_))));
        assert_eq!(store.account(b).unwrap().balance(), 0);

        // Same request under the same key is still a replay.
        let again = store.credit(a, usd(10), ExpectedVersion::Any, posting.clone()).unwrap();
        assert!(again.replayed);
        assert_eq!(again.transaction.id, first.transaction.id);
        assert_eq!(store.account(a).unwrap().balance(), 10);

        let transfer = store.transfer(a, b, usd(1), posting);
        assert!(matches!(transfer, Err(EngineError::Domain(DomainError::Validation(_)))));
    }

    #[test]
    fn reversal_restores_balances_once() {
        let store = store();
        let a = open(&store, AccountKind::Checking, 500).id_typed();
        let b = open(&store, AccountKind::Savings, 0).id_typed();

        let spent = store
            .debit(a, usd(120), ExpectedVersion::Any, Posting::default())
            .unwrap()
            .transaction;
        let moved = store.transfer(a, b, usd(80), Posting::default()).unwrap().transaction;

        let undo = store.reverse(spent.id, Posting::default()).unwrap();
        assert!(!undo.replayed);
        assert_eq!(undo.reversal.kind, TransactionKind::Income);
        assert_eq!(undo.reversal.reverses, Some(spent.id));
        store.reverse(moved.id, Posting::default()).unwrap();

        assert_eq!(store.account(a).unwrap().balance(), 500);
        assert_eq!(store.account(b).unwrap().balance(), 0);
        assert!(store.verify_all().unwrap().is_empty());

        let again = store.reverse(spent.id, Posting::default()).unwrap_err();
        assert!(matches!(again, EngineError::Domain(DomainError::Validation(_))));
        let chained = store.reverse(undo.reversal.id, Posting::default()).unwrap_err();
        assert!(matches!(chained, EngineError::Domain(DomainError::Validation(_))));
        assert_eq!(store.account(a).unwrap().balance(), 500);
    }

    #[test]
    fn reversal_follows_balance_rules_and_keys() {
        let store = store();
        let a = open(&store, AccountKind::Checking, 0).id_typed();
        let deposit = store
            .credit(a, usd(100), ExpectedVersion::Any, Posting::default())
            .unwrap()
            .transaction;
        store.debit(a, usd(60), ExpectedVersion::Any, Posting::default()).unwrap();

        // The deposit was partly spent, so undoing it would overdraw.
        let err = store.reverse(deposit.id, Posting::default()).unwrap_err();
        assert!(matches!(err, EngineError::Domain(DomainError::InsufficientFunds { .. })));

        store.credit(a, usd(60), ExpectedVersion::Any, Posting::default()).unwrap();
        let keyed = Posting::default().with_idempotency_key(IdempotencyKey::new("undo-1").unwrap());
        let first = store.reverse(deposit.id, keyed.clone()).unwrap();
        let retry = store.reverse(deposit.id, keyed).unwrap();
        assert!(retry.replayed);
        assert_eq!(retry.reversal.id, first.reversal.id);
        assert_eq!(store.account(a).unwrap().balance(), 0);

        assert_eq!(
            store.reverse(TransactionId::new(), Posting::default()).unwrap_err(),
            EngineError::Domain(DomainError::NotFound("transaction"))
        );
    }

    proptest! {
        #[test]
        fn cached_balance_matches_replay(ops in prop::collection::vec((0u8..3, 1i64..500), 1..40)) {
            let store = store();
            let a = open(&store, AccountKind::Checking, 1_000).id_typed();
            let b = open(&store, AccountKind::Business, 0).id_typed();

            for (op, amount) in ops {
                // Rejections are fine; only the invariants matter.
                let _ = match op {
                    0 => store.debit(a, usd(amount), ExpectedVersion::Any, Posting::default()).map(|_| ()),
                    1 => store.credit(b, usd(amount), ExpectedVersion::Any, Posting::default()).map(|_| ()),
                    _ => store.transfer(b, a, usd(amount), Posting::default()).map(|_| ()),
                };
                prop_assert!(store.account(a).unwrap().balance() >= 0);
                prop_assert!(store.account(b).unwrap().balance() >= 0);
            }
            prop_assert!(store.verify_all().unwrap().is_empty());
        }
    }
}
