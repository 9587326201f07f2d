//! Spend-vs-budget rollups derived from the journal.
//!
//! Nothing here is incrementally maintained: every status read replays the
//! COMPLETED EXPENSE rows of the relevant window, so a report is always a pure
//! function of the journal at call time.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use fundhub_core::{AccountId, BudgetId, Currency, DomainError, Money};
use fundhub_ledger::{Budget, BudgetStatus, NewBudget, PeriodWindow, TransactionKind};

use crate::category::CategoryStore;
use crate::error::{EngineError, EngineResult};
use crate::journal::{TransactionFilter, TransactionJournal};

/// Budget health at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetStatusReport {
    pub budget: Budget,
    pub window: PeriodWindow,
    pub amount_spent: Money,
    pub status: BudgetStatus,
    pub spent_percent: u32,
}

/// Income/expense totals over a date window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodSummary {
    pub window: PeriodWindow,
    pub income: Money,
    pub expense: Money,
    pub net: Money,
}

pub(crate) fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Budget registry plus read-time evaluation.
#[derive(Debug)]
pub struct BudgetAggregator<J, C> {
    journal: J,
    categories: C,
    budgets: RwLock<HashMap<BudgetId, Budget>>,
    default_warning_percent: u8,
}

impl<J, C> BudgetAggregator<J, C>
where
    J: TransactionJournal,
    C: CategoryStore,
{
    pub fn new(journal: J, categories: C, default_warning_percent: u8) -> Self {
        Self {
            journal,
            categories,
            budgets: RwLock::new(HashMap::new()),
            default_warning_percent,
        }
    }

    pub fn create_budget(&self, req: NewBudget) -> EngineResult<Budget> {
        if let Some(category) = req.category_id {
            if !self.categories.exists(category) {
                return Err(DomainError::not_found("category").into());
            }
        }
        let budget = Budget::create(BudgetId::new(), &req, self.default_warning_percent, Utc::now())?;

        let mut budgets = self
            .budgets
            .write()
            .map_err(|_| EngineError::poisoned("budget table"))?;
        budgets.insert(budget.id, budget.clone());

        info!(budget = %budget.id, period = ?budget.period, amount = budget.amount.amount_minor, "budget created");
        Ok(budget)
    }

    pub fn budget(&self, id: BudgetId) -> EngineResult<Budget> {
        let budgets = self
            .budgets
            .read()
            .map_err(|_| EngineError::poisoned("budget table"))?;
        budgets
            .get(&id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("budget").into())
    }

    pub fn budgets(&self) -> EngineResult<Vec<Budget>> {
        let budgets = self
            .budgets
            .read()
            .map_err(|_| EngineError::poisoned("budget table"))?;
        let mut rows: Vec<Budget> = budgets.values().cloned().collect();
        rows.sort_by_key(|b| (b.created_at, b.id));
        Ok(rows)
    }

    /// Inactive budgets stay readable but drop out of threshold alerts.
    pub fn deactivate_budget(&self, id: BudgetId) -> EngineResult<Budget> {
        let mut budgets = self
            .budgets
            .write()
            .map_err(|_| EngineError::poisoned("budget table"))?;
        let budget = budgets
            .get_mut(&id)
            .ok_or(DomainError::not_found("budget"))?;
        budget.active = false;
        Ok(budget.clone())
    }

    fn evaluate(&self, budget: Budget, as_of: NaiveDate) -> EngineResult<BudgetStatusReport> {
        let window = budget.window(as_of);
        let filter = TransactionFilter {
            kind: Some(TransactionKind::Expense),
            category: budget.category_id,
            currency: Some(budget.amount.currency),
            ..TransactionFilter::default()
        }
        .completed()
        .between(midnight(window.start), midnight(window.end))
        .net_of_reversals();

        let rows = self.journal.select(&filter)?;
        let eval = budget.evaluate(as_of, &rows);
        debug!(
            budget = %budget.id,
            spent = eval.amount_spent.amount_minor,
            status = ?eval.status,
            "budget evaluated"
        );

        Ok(BudgetStatusReport {
            window: eval.window,
            amount_spent: eval.amount_spent,
            status: eval.status,
            spent_percent: eval.spent_percent,
            budget,
        })
    }

    /// Spend and status for the period window containing `as_of`.
    pub fn status(&self, id: BudgetId, as_of: NaiveDate) -> EngineResult<BudgetStatusReport> {
        let budget = self.budget(id)?;
        self.evaluate(budget, as_of)
    }

    pub fn status_now(&self, id: BudgetId) -> EngineResult<BudgetStatusReport> {
        self.status(id, Utc::now().date_naive())
    }

    /// Active budgets at WARNING or OVER_BUDGET on `as_of`.
    pub fn exceeding_threshold(&self, as_of: NaiveDate) -> EngineResult<Vec<BudgetStatusReport>> {
        let mut flagged = Vec::new();
        for budget in self.budgets()?.into_iter().filter(|b| b.active) {
            let report = self.evaluate(budget, as_of)?;
            if report.status.needs_attention() {
                flagged.push(report);
            }
        }
        Ok(flagged)
    }

    /// Income and expense over `[from, until)`, optionally for one account.
    pub fn period_summary(
        &self,
        from: NaiveDate,
        until: NaiveDate,
        currency: Currency,
        account: Option<AccountId>,
    ) -> EngineResult<PeriodSummary> {
        if until <= from {
            return Err(DomainError::validation("summary window must end after it starts").into());
        }
        let filter = TransactionFilter {
            account,
            currency: Some(currency),
            ..TransactionFilter::default()
        }
        .between(midnight(from), midnight(until))
        .net_of_reversals();

        let (income, expense) = self.journal.totals(&filter)?;
        Ok(PeriodSummary {
            window: PeriodWindow { start: from, end: until },
            income: Money::new(income, currency),
            expense: Money::new(expense, currency),
            net: Money::new(income - expense, currency),
        })
    }
}
