//! Spending breakdowns, monthly trends and cash flow, read straight off the
//! journal.
//!
//! Breakdowns and trends net out reversed rows together with their
//! reversals. Cash flow follows balances instead, so it counts every
//! completed movement.

use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::debug;

use fundhub_core::{AccountId, CategoryId, Currency, DomainError, Money};
use fundhub_ledger::{PeriodWindow, TransactionKind};

use crate::budget::midnight;
use crate::error::EngineResult;
use crate::journal::{TransactionFilter, TransactionJournal};

/// Spend of one category over a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryExpense {
    /// `None` collects uncategorized spend.
    pub category_id: Option<CategoryId>,
    pub amount: Money,
    /// Share of the window's spend in hundredths of a percent, rounded half up.
    pub share_bp: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyTrend {
    /// First day of the calendar month.
    pub month: NaiveDate,
    pub income: Money,
    pub expense: Money,
    pub net: Money,
}

/// Balance movement of one account over a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashFlow {
    pub account: AccountId,
    pub window: PeriodWindow,
    pub opening: Money,
    pub inflows: Money,
    pub outflows: Money,
    pub closing: Money,
}

fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn narrow(total: i128, currency: Currency) -> EngineResult<Money> {
    let amount = i64::try_from(total).map_err(|_| {
        DomainError::validation(format!("total of {total} {currency} is out of range"))
    })?;
    Ok(Money::new(amount, currency))
}

fn ensure_window(from: NaiveDate, until: NaiveDate) -> EngineResult<()> {
    if until <= from {
        return Err(DomainError::validation("report window must end after it starts").into());
    }
    Ok(())
}

/// Read-only reports over a journal.
#[derive(Debug)]
pub struct LedgerAnalytics<J> {
    journal: J,
}

impl<J> LedgerAnalytics<J>
where
    J: TransactionJournal,
{
    pub fn new(journal: J) -> Self {
        Self { journal }
    }

    fn settled(
        from: NaiveDate,
        until: NaiveDate,
        currency: Currency,
        account: Option<AccountId>,
    ) -> EngineResult<TransactionFilter> {
        ensure_window(from, until)?;
        Ok(TransactionFilter {
            account,
            currency: Some(currency),
            ..TransactionFilter::default()
        }
        .completed()
        .between(midnight(from), midnight(until))
        .net_of_reversals())
    }

    /// Spend per category over `[from, until)`, largest first.
    ///
    /// Empty when nothing was spent.
    pub fn expenses_by_category(
        &self,
        from: NaiveDate,
        until: NaiveDate,
        currency: Currency,
        account: Option<AccountId>,
    ) -> EngineResult<Vec<CategoryExpense>> {
        let filter = TransactionFilter {
            kind: Some(TransactionKind::Expense),
            ..Self::settled(from, until, currency, account)?
        };

        let mut sums: HashMap<Option<CategoryId>, i128> = HashMap::new();
        for tx in self.journal.select(&filter)? {
            *sums.entry(tx.category_id).or_default() += i128::from(tx.amount.amount_minor);
        }
        let total: i128 = sums.values().sum();
        if total == 0 {
            return Ok(Vec::new());
        }

        let mut rows = sums
            .into_iter()
            .map(|(category_id, amount)| {
                let share = (amount * 20_000 + total) / (2 * total);
                Ok(CategoryExpense {
                    category_id,
                    amount: narrow(amount, currency)?,
                    share_bp: u32::try_from(share).unwrap_or(10_000),
                })
            })
            .collect::<EngineResult<Vec<_>>>()?;
        rows.sort_by(|a, b| {
            b.amount
                .amount_minor
                .cmp(&a.amount.amount_minor)
                .then_with(|| a.category_id.cmp(&b.category_id))
        });

        debug!(categories = rows.len(), total = %total, "expense breakdown computed");
        Ok(rows)
    }

    /// Income, expense and net per calendar month touching `[from, until)`.
    ///
    /// Months without movements are present with zero totals.
    pub fn monthly_trends(
        &self,
        from: NaiveDate,
        until: NaiveDate,
        currency: Currency,
        account: Option<AccountId>,
    ) -> EngineResult<Vec<MonthlyTrend>> {
        let filter = Self::settled(from, until, currency, account)?;

        let mut buckets: BTreeMap<NaiveDate, (i128, i128)> = BTreeMap::new();
        let mut month = month_start(from);
        while month < until {
            buckets.insert(month, (0, 0));
            month = month
                .checked_add_months(Months::new(1))
                .ok_or_else(|| DomainError::validation("report window is out of range"))?;
        }

        for tx in self.journal.select(&filter)? {
            let bucket = buckets
                .entry(month_start(tx.occurred_at.date_naive()))
                .or_default();
            let amount = i128::from(tx.amount.amount_minor);
            match tx.kind {
                TransactionKind::Income => bucket.0 += amount,
                TransactionKind::Expense => bucket.1 += amount,
                TransactionKind::Transfer | TransactionKind::Investment => {}
            }
        }

        buckets
            .into_iter()
            .map(|(month, (income, expense))| {
                Ok(MonthlyTrend {
                    month,
                    income: narrow(income, currency)?,
                    expense: narrow(expense, currency)?,
                    net: narrow(income - expense, currency)?,
                })
            })
            .collect()
    }

    /// Opening balance, in/out flows and closing balance of `account` over
    /// `[from, until)`, by business date.
    pub fn cash_flow(
        &self,
        account: AccountId,
        currency: Currency,
        from: NaiveDate,
        until: NaiveDate,
    ) -> EngineResult<CashFlow> {
        ensure_window(from, until)?;
        let start = midnight(from);
        let filter = TransactionFilter {
            currency: Some(currency),
            occurred_until: Some(midnight(until)),
            ..TransactionFilter::for_account(account).completed()
        };

        let (mut opening, mut inflows, mut outflows) = (0i128, 0i128, 0i128);
        for tx in self.journal.select(&filter)? {
            let effect = i128::from(tx.effect_on(account));
            if tx.occurred_at < start {
                opening += effect;
            } else if effect > 0 {
                inflows += effect;
            } else {
                outflows -= effect;
            }
        }

        Ok(CashFlow {
            account,
            window: PeriodWindow {
                start: from,
                end: until,
            },
            opening: narrow(opening, currency)?,
            inflows: narrow(inflows, currency)?,
            outflows: narrow(outflows, currency)?,
            closing: narrow(opening + inflows - outflows, currency)?,
        })
    }
}
