use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;

use fundhub_core::{AccountId, TransactionId};
use fundhub_ledger::{IdempotencyKey, Transaction, TransactionDraft};

use super::r#trait::{Appended, JournalError, TransactionFilter, TransactionJournal};

#[derive(Debug, Default)]
struct Rows {
    rows: Vec<Transaction>,
    by_id: HashMap<TransactionId, usize>,
    by_key: HashMap<IdempotencyKey, usize>,
    by_account: HashMap<AccountId, Vec<usize>>,
    /// Reversed row id -> position of its reversal.
    reversed: HashMap<TransactionId, usize>,
}

/// In-memory append-only journal.
///
/// One ledger keyspace, one sequence. Appends take the write lock for the
/// duration of a single push, so each append is atomic.
#[derive(Debug, Default)]
pub struct InMemoryJournal {
    inner: RwLock<Rows>,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|r| r.rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> JournalError {
    JournalError::Storage("lock poisoned".to_string())
}

impl TransactionJournal for InMemoryJournal {
    fn append(&self, draft: TransactionDraft) -> Result<Appended, JournalError> {
        draft
            .validate()
            .map_err(|e| JournalError::InvalidAppend(e.to_string()))?;

        let mut inner = self.inner.write().map_err(|_| poisoned())?;

        if let Some(key) = &draft.idempotency_key {
            if let Some(&idx) = inner.by_key.get(key) {
                return Ok(Appended {
                    transaction: inner.rows[idx].clone(),
                    duplicate: true,
                });
            }
        }

        if let Some(original) = draft.reverses {
            if !inner.by_id.contains_key(&original) {
                return Err(JournalError::InvalidAppend(format!(
                    "reversed transaction {original} is not in the journal"
                )));
            }
            if inner.reversed.contains_key(&original) {
                return Err(JournalError::InvalidAppend(format!(
                    "transaction {original} is already reversed"
                )));
            }
        }

        let idx = inner.rows.len();
        let sequence = idx as u64 + 1;
        let tx = Transaction::from_draft(TransactionId::new(), sequence, draft, Utc::now());

        inner.by_id.insert(tx.id, idx);
        if let Some(key) = &tx.idempotency_key {
            inner.by_key.insert(key.clone(), idx);
        }
        inner.by_account.entry(tx.account_id).or_default().push(idx);
        if let Some(counterparty) = tx.counterparty_id {
            inner.by_account.entry(counterparty).or_default().push(idx);
        }
        if let Some(original) = tx.reverses {
            inner.reversed.insert(original, idx);
        }
        inner.rows.push(tx.clone());

        Ok(Appended {
            transaction: tx,
            duplicate: false,
        })
    }

    fn get(&self, id: TransactionId) -> Result<Option<Transaction>, JournalError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.by_id.get(&id).map(|&idx| inner.rows[idx].clone()))
    }

    fn find_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Transaction>, JournalError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.by_key.get(key).map(|&idx| inner.rows[idx].clone()))
    }

    fn reversal_of(&self, id: TransactionId) -> Result<Option<Transaction>, JournalError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.reversed.get(&id).map(|&idx| inner.rows[idx].clone()))
    }

    fn select(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>, JournalError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        let keep = |tx: &Transaction| {
            filter.matches(tx) && !(filter.net_of_reversals && inner.reversed.contains_key(&tx.id))
        };

        let rows: Vec<Transaction> = match filter.account {
            // Index positions are pushed in append order, so they stay sorted.
            Some(account) => inner
                .by_account
                .get(&account)
                .map(|idxs| {
                    idxs.iter()
                        .map(|&i| &inner.rows[i])
                        .filter(|tx| keep(tx))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default(),
            None => inner
                .rows
                .iter()
                .filter(|tx| keep(tx))
                .cloned()
                .collect(),
        };

        Ok(rows)
    }

    fn last_sequence(&self) -> Result<u64, JournalError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.rows.last().map(|tx| tx.sequence).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::PageRequest;
    use fundhub_core::{Currency, Money};
    use fundhub_ledger::{TransactionKind, TransactionStatus};
    use std::sync::Arc;

    fn usd(amount: i64) -> Money {
        Money::new(amount, Currency::USD)
    }

    #[test]
    fn sequences_are_gapless_from_one() {
        let journal = InMemoryJournal::new();
        let a = AccountId::new();
        for n in 1..=3 {
            let appended = journal.append(TransactionDraft::income(a, usd(n))).unwrap();
            assert_eq!(appended.transaction.sequence, n as u64);
            assert!(!appended.duplicate);
        }
        assert_eq!(journal.last_sequence().unwrap(), 3);
    }

    #[test]
    fn known_idempotency_key_returns_first_row() {
        let journal = InMemoryJournal::new();
        let a = AccountId::new();
        let key = IdempotencyKey::new("deposit-1").unwrap();

        let first = journal
            .append(TransactionDraft::income(a, usd(100)).with_idempotency_key(Some(key.clone())))
            .unwrap();
        let second = journal
            .append(TransactionDraft::income(a, usd(100)).with_idempotency_key(Some(key.clone())))
            .unwrap();

        assert!(second.duplicate);
        assert_eq!(second.transaction, first.transaction);
        assert_eq!(journal.len(), 1);
        assert_eq!(journal.find_by_idempotency_key(&key).unwrap(), Some(first.transaction));
    }

    #[test]
    fn pending_drafts_are_rejected() {
        let journal = InMemoryJournal::new();
        let mut draft = TransactionDraft::income(AccountId::new(), usd(1));
        draft.status = TransactionStatus::Pending;
        assert!(matches!(journal.append(draft), Err(JournalError::InvalidAppend(_))));
        assert!(journal.is_empty());
    }

    #[test]
    fn reconstruction_replays_completed_rows_only() {
        let journal = InMemoryJournal::new();
        let (a, b) = (AccountId::new(), AccountId::new());

        journal.append(TransactionDraft::income(a, usd(1_000))).unwrap();
        journal.append(TransactionDraft::transfer(a, b, usd(300))).unwrap();
        journal.append(TransactionDraft::expense(b, usd(50))).unwrap();
        journal.append(TransactionDraft::expense(a, usd(999)).failed()).unwrap();

        assert_eq!(journal.reconstruct_balance(a).unwrap(), 700);
        assert_eq!(journal.reconstruct_balance(b).unwrap(), 250);
        assert_eq!(journal.reconstruct_balance(AccountId::new()).unwrap(), 0);
    }

    #[test]
    fn pages_are_newest_first() {
        let journal = InMemoryJournal::new();
        let a = AccountId::new();
        for n in 1..=5 {
            journal.append(TransactionDraft::income(a, usd(n))).unwrap();
        }

        let filter = TransactionFilter::for_account(a);
        let page = journal.page(&filter, PageRequest::new(0, 2)).unwrap();
        assert_eq!(page.total, 5);
        let amounts: Vec<_> = page.items.iter().map(|t| t.amount.amount_minor).collect();
        assert_eq!(amounts, vec![5, 4]);

        let last = journal.page(&filter, PageRequest::new(2, 2)).unwrap();
        assert_eq!(last.items.len(), 1);
        assert!(journal.page(&filter, PageRequest::new(0, 0)).is_err());
    }

    #[test]
    fn filter_by_kind_and_totals() {
        let journal = InMemoryJournal::new();
        let a = AccountId::new();
        journal.append(TransactionDraft::income(a, usd(500))).unwrap();
        journal.append(TransactionDraft::expense(a, usd(120))).unwrap();
        journal.append(TransactionDraft::expense(a, usd(30))).unwrap();

        let expenses = journal
            .select(&TransactionFilter::of_kind(TransactionKind::Expense))
            .unwrap();
        assert_eq!(expenses.len(), 2);
        assert_eq!(journal.totals(&TransactionFilter::default()).unwrap(), (500, 150));
    }

    #[test]
    fn totals_out_of_i64_range_are_an_error() {
        let journal = InMemoryJournal::new();
        let big = 5_000_000_000_000_000_000;
        journal.append(TransactionDraft::expense(AccountId::new(), usd(big))).unwrap();
        journal.append(TransactionDraft::expense(AccountId::new(), usd(big))).unwrap();

        assert!(matches!(
            journal.totals(&TransactionFilter::default()),
            Err(JournalError::InvalidQuery(_))
        ));
    }

    #[test]
    fn a_row_is_reversed_at_most_once() {
        let journal = InMemoryJournal::new();
        let a = AccountId::new();
        let expense = journal.append(TransactionDraft::expense(a, usd(70))).unwrap().transaction;
        journal.append(TransactionDraft::income(a, usd(200))).unwrap();

        let undo = TransactionDraft::reversal_of(&expense).unwrap();
        let reversal = journal.append(undo.clone()).unwrap().transaction;
        assert_eq!(journal.reversal_of(expense.id).unwrap(), Some(reversal.clone()));
        assert!(matches!(journal.append(undo), Err(JournalError::InvalidAppend(_))));

        let net = journal
            .select(&TransactionFilter::for_account(a).net_of_reversals())
            .unwrap();
        assert_eq!(net.len(), 1);
        assert_eq!(net[0].amount.amount_minor, 200);
        assert_eq!(journal.select(&TransactionFilter::for_account(a)).unwrap().len(), 3);
        assert_eq!(journal.reconstruct_balance(a).unwrap(), 200);
    }

    #[test]
    fn reversal_of_unknown_row_is_refused() {
        let journal = InMemoryJournal::new();
        let other = InMemoryJournal::new();
        let stray = other
            .append(TransactionDraft::income(AccountId::new(), usd(5)))
            .unwrap()
            .transaction;
        let undo = TransactionDraft::reversal_of(&stray).unwrap();
        assert!(matches!(journal.append(undo), Err(JournalError::InvalidAppend(_))));
        assert!(journal.is_empty());
    }

    #[test]
    fn concurrent_appends_keep_unique_sequences() {
        let journal = Arc::new(InMemoryJournal::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let journal = journal.clone();
                std::thread::spawn(move || {
                    let a = AccountId::new();
                    for _ in 0..50 {
                        journal.append(TransactionDraft::income(a, usd(1))).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut seqs: Vec<_> = journal
            .select(&TransactionFilter::default())
            .unwrap()
            .into_iter()
            .map(|t| t.sequence)
            .collect();
        seqs.dedup();
        assert_eq!(seqs, (1..=400).collect::<Vec<u64>>());
    }
}
