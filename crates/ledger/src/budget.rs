//! Budgets and their spend-vs-budget rollup.
//!
//! Spend and status are never stored: [`Budget::evaluate`] derives them from
//! the transactions it is given, so two evaluations over the same journal
//! always agree.

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use fundhub_core::{BudgetId, CategoryId, DomainError, DomainResult, Entity, Money};

use crate::transaction::{Transaction, TransactionKind};

/// Budget period length. Windows repeat from the anchor date in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BudgetPeriod {
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

/// Half-open date window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeriodWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl PeriodWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }
}

fn shift_months(anchor: NaiveDate, months: i64) -> NaiveDate {
    let shifted = if months >= 0 {
        u32::try_from(months)
            .ok()
            .and_then(|m| anchor.checked_add_months(Months::new(m)))
    } else {
        u32::try_from(-months)
            .ok()
            .and_then(|m| anchor.checked_sub_months(Months::new(m)))
    };
    shifted.unwrap_or(if months >= 0 {
        NaiveDate::MAX
    } else {
        NaiveDate::MIN
    })
}

fn shift_days(anchor: NaiveDate, days: i64) -> NaiveDate {
    let shifted = if days >= 0 {
        anchor.checked_add_days(Days::new(days.unsigned_abs()))
    } else {
        anchor.checked_sub_days(Days::new(days.unsigned_abs()))
    };
    shifted.unwrap_or(if days >= 0 {
        NaiveDate::MAX
    } else {
        NaiveDate::MIN
    })
}

impl BudgetPeriod {
    fn months(self) -> Option<i64> {
        match self {
            BudgetPeriod::Weekly => None,
            BudgetPeriod::Monthly => Some(1),
            BudgetPeriod::Quarterly => Some(3),
            BudgetPeriod::Yearly => Some(12),
        }
    }

    /// The window of this period (aligned on `anchor`) that contains `as_of`.
    ///
    /// Month arithmetic always shifts from the anchor itself, so a 31st anchor
    /// clamps to shorter months without drifting.
    pub fn window_containing(self, anchor: NaiveDate, as_of: NaiveDate) -> PeriodWindow {
        let Some(step) = self.months() else {
            let k = (as_of - anchor).num_days().div_euclid(7);
            return PeriodWindow {
                start: shift_days(anchor, k * 7),
                end: shift_days(anchor, (k + 1) * 7),
            };
        };

        let diff = i64::from(as_of.year() - anchor.year()) * 12 + i64::from(as_of.month())
            - i64::from(anchor.month());
        let mut k = diff.div_euclid(step);

        // Clamping can put the estimate one period off; two nudges are enough.
        for _ in 0..2 {
            if shift_months(anchor, k * step) > as_of {
                k -= 1;
            } else if shift_months(anchor, (k + 1) * step) <= as_of {
                k += 1;
            }
        }

        PeriodWindow {
            start: shift_months(anchor, k * step),
            end: shift_months(anchor, (k + 1) * step),
        }
    }
}

/// Derived budget health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BudgetStatus {
    OnTrack,
    Warning,
    OverBudget,
}

impl BudgetStatus {
    /// ON_TRACK below `warning_percent`, WARNING from there up to 100%
    /// inclusive, OVER_BUDGET above 100%. Exact integer arithmetic.
    pub fn classify(spent: i64, budgeted: i64, warning_percent: u8) -> Self {
        Self::classify_exact(i128::from(spent), i128::from(budgeted), warning_percent)
    }

    fn classify_exact(spent: i128, budgeted: i128, warning_percent: u8) -> Self {
        if spent.saturating_mul(100) < budgeted * i128::from(warning_percent) {
            BudgetStatus::OnTrack
        } else if spent <= budgeted {
            BudgetStatus::Warning
        } else {
            BudgetStatus::OverBudget
        }
    }

    pub fn needs_attention(self) -> bool {
        !matches!(self, BudgetStatus::OnTrack)
    }
}

/// Request to create a budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBudget {
    pub name: String,
    pub category_id: Option<CategoryId>,
    pub period: BudgetPeriod,
    pub anchor: NaiveDate,
    pub amount: Money,
    pub warning_percent: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    pub id: BudgetId,
    pub name: String,
    /// `None` = global budget over every expense.
    pub category_id: Option<CategoryId>,
    pub period: BudgetPeriod,
    pub anchor: NaiveDate,
    pub amount: Money,
    pub warning_percent: u8,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Result of evaluating a budget against the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetEvaluation {
    pub window: PeriodWindow,
    pub amount_spent: Money,
    pub status: BudgetStatus,
    /// Floor of spent / budgeted * 100.
    pub spent_percent: u32,
}

impl Budget {
    pub fn create(
        id: BudgetId,
        req: &NewBudget,
        default_warning_percent: u8,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if req.name.trim().is_empty() {
            return Err(DomainError::validation("budget name must not be empty"));
        }
        req.amount.ensure_positive()?;
        let warning_percent = req.warning_percent.unwrap_or(default_warning_percent);
        if !(1..=100).contains(&warning_percent) {
            return Err(DomainError::validation(
                "warning threshold must be between 1 and 100 percent",
            ));
        }

        Ok(Self {
            id,
            name: req.name.trim().to_string(),
            category_id: req.category_id,
            period: req.period,
            anchor: req.anchor,
            amount: req.amount,
            warning_percent,
            active: true,
            created_at: now,
        })
    }

    pub fn window(&self, as_of: NaiveDate) -> PeriodWindow {
        self.period.window_containing(self.anchor, as_of)
    }

    /// Whether `tx` counts as spend against this budget inside `window`.
    pub fn counts(&self, tx: &Transaction, window: &PeriodWindow) -> bool {
        tx.is_completed()
            && tx.kind == TransactionKind::Expense
            && tx.amount.currency == self.amount.currency
            && window.contains(tx.occurred_at.date_naive())
            && match self.category_id {
                Some(category) => tx.category_id == Some(category),
                None => true,
            }
    }

    /// Recompute spend and status from scratch.
    pub fn evaluate<'a>(
        &self,
        as_of: NaiveDate,
        transactions: impl IntoIterator<Item = &'a Transaction>,
    ) -> BudgetEvaluation {
        let window = self.window(as_of);
        let spent: i128 = transactions
            .into_iter()
            .filter(|tx| self.counts(tx, &window))
            .map(|tx| i128::from(tx.amount.amount_minor))
            .sum();
        // Spend past i64::MAX is reported saturated; the status stays exact.
        let reported = i64::try_from(spent).unwrap_or(i64::MAX);

        let budgeted = self.amount.amount_minor;
        let spent_percent = (spent.saturating_mul(100) / i128::from(budgeted.max(1)))
            .clamp(0, i128::from(u32::MAX)) as u32;

        BudgetEvaluation {
            window,
            amount_spent: Money::new(reported, self.amount.currency),
            status: BudgetStatus::classify_exact(spent, i128::from(budgeted), self.warning_percent),
            spent_percent,
        }
    }
}

impl Entity for Budget {
    type Id = BudgetId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use fundhub_core::{AccountId, Currency, TransactionId};

    use crate::transaction::TransactionDraft;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn usd(amount: i64) -> Money {
        Money::new(amount, Currency::USD)
    }

    fn budget(category: Option<CategoryId>, period: BudgetPeriod, anchor: NaiveDate) -> Budget {
        let req = NewBudget {
            name: "Groceries".to_string(),
            category_id: category,
            period,
            anchor,
            amount: usd(1_000),
            warning_percent: None,
        };
        Budget::create(BudgetId::new(), &req, 80, Utc::now()).unwrap()
    }

    fn expense_on(day: NaiveDate, amount: i64, category: Option<CategoryId>) -> Transaction {
        let at = Utc.from_utc_datetime(&day.and_hms_opt(12, 0, 0).unwrap());
        let draft = TransactionDraft::expense(AccountId::new(), usd(amount))
            .with_category(category)
            .occurred_at(at);
        Transaction::from_draft(TransactionId::new(), 1, draft, Utc::now())
    }

    #[test]
    fn classification_thresholds() {
        assert_eq!(BudgetStatus::classify(799, 1_000, 80), BudgetStatus::OnTrack);
        assert_eq!(BudgetStatus::classify(800, 1_000, 80), BudgetStatus::Warning);
        assert_eq!(BudgetStatus::classify(850, 1_000, 80), BudgetStatus::Warning);
        assert_eq!(BudgetStatus::classify(1_000, 1_000, 80), BudgetStatus::Warning);
        assert_eq!(BudgetStatus::classify(1_001, 1_000, 80), BudgetStatus::OverBudget);
    }

    #[test]
    fn monthly_window_follows_anchor_day() {
        let w = BudgetPeriod::Monthly.window_containing(date(2026, 1, 15), date(2026, 3, 20));
        assert_eq!(w, PeriodWindow { start: date(2026, 3, 15), end: date(2026, 4, 15) });

        let w = BudgetPeriod::Monthly.window_containing(date(2026, 1, 15), date(2026, 3, 14));
        assert_eq!(w, PeriodWindow { start: date(2026, 2, 15), end: date(2026, 3, 15) });
    }

    #[test]
    fn month_end_anchor_clamps_without_drift() {
        let anchor = date(2026, 1, 31);
        let w = BudgetPeriod::Monthly.window_containing(anchor, date(2026, 3, 1));
        assert_eq!(w, PeriodWindow { start: date(2026, 2, 28), end: date(2026, 3, 31) });
        assert!(w.contains(date(2026, 3, 30)));
    }

    #[test]
    fn windows_extend_before_the_anchor() {
        let w = BudgetPeriod::Quarterly.window_containing(date(2026, 4, 1), date(2026, 2, 10));
        assert_eq!(w, PeriodWindow { start: date(2026, 1, 1), end: date(2026, 4, 1) });

        let w = BudgetPeriod::Weekly.window_containing(date(2026, 10, 5), date(2026, 10, 4));
        assert_eq!(w, PeriodWindow { start: date(2026, 9, 28), end: date(2026, 10, 5) });
    }

    #[test]
    fn yearly_window() {
        let w = BudgetPeriod::Yearly.window_containing(date(2024, 7, 1), date(2026, 6, 30));
        assert_eq!(w, PeriodWindow { start: date(2025, 7, 1), end: date(2026, 7, 1) });
    }

    #[test]
    fn evaluation_counts_only_matching_expenses_in_window() {
        let groceries = CategoryId::new();
        let b = budget(Some(groceries), BudgetPeriod::Monthly, date(2026, 10, 1));

        let txs = vec![
            expense_on(date(2026, 10, 2), 500, Some(groceries)),
            expense_on(date(2026, 10, 9), 350, Some(groceries)),
            expense_on(date(2026, 10, 9), 400, Some(CategoryId::new())),
            expense_on(date(2026, 9, 30), 400, Some(groceries)),
        ];

        let eval = b.evaluate(date(2026, 10, 16), &txs);
        assert_eq!(eval.amount_spent, usd(850));
        assert_eq!(eval.status, BudgetStatus::Warning);
        assert_eq!(eval.spent_percent, 85);
    }

    #[test]
    fn global_budget_sums_every_category() {
        let b = budget(None, BudgetPeriod::Monthly, date(2026, 10, 1));
        let txs = vec![
            expense_on(date(2026, 10, 2), 600, Some(CategoryId::new())),
            expense_on(date(2026, 10, 3), 401, None),
        ];
        let eval = b.evaluate(date(2026, 10, 16), &txs);
        assert_eq!(eval.amount_spent, usd(1_001));
        assert_eq!(eval.status, BudgetStatus::OverBudget);
    }

    #[test]
    fn spend_beyond_i64_saturates_instead_of_wrapping() {
        let b = budget(None, BudgetPeriod::Monthly, date(2026, 10, 1));
        let big = 5_000_000_000_000_000_000;
        let txs = vec![
            expense_on(date(2026, 10, 2), big, None),
            expense_on(date(2026, 10, 3), big, None),
        ];
        let eval = b.evaluate(date(2026, 10, 16), &txs);
        assert_eq!(eval.amount_spent, usd(i64::MAX));
        assert_eq!(eval.status, BudgetStatus::OverBudget);
        assert_eq!(eval.spent_percent, u32::MAX);
    }

    #[test]
    fn warning_threshold_must_be_a_percentage() {
        let req = NewBudget {
            name: "x".to_string(),
            category_id: None,
            period: BudgetPeriod::Monthly,
            anchor: date(2026, 1, 1),
            amount: usd(10),
            warning_percent: Some(0),
        };
        assert!(Budget::create(BudgetId::new(), &req, 80, Utc::now()).is_err());
    }
}
