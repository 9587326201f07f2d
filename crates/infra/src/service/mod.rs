//! Engine facade: one `EngineConfig`, every component wired together.
//!
//! Exposed operations mirror what the presentation layer calls: account
//! creation, deposit/withdraw/transfer, reversals, transaction listing,
//! invest, budget status, spending reports and project reads. Transient
//! failures are retried here with the configured policy before they reach
//! the caller.

pub mod dto;

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::info;

use fundhub_core::{
    AccountId, BudgetId, Currency, DomainError, ExpectedVersion, ProjectId, TransactionId,
};
use fundhub_ledger::{Budget, LedgerEvent, NewBudget, NewProject, OpenAccount, Transaction};

use crate::analytics::{CashFlow, CategoryExpense, LedgerAnalytics, MonthlyTrend};
use crate::budget::BudgetAggregator;
use crate::category::CategoryStore;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::funding::{FundingCoordinator, InvestRequest};
use crate::guard::ConsistencyGuard;
use crate::journal::{InMemoryJournal, Page, PageRequest, TransactionFilter, TransactionJournal};
use crate::ledger_store::{BalanceCheck, LedgerStore, Posting};
use crate::notify::NotificationEmitter;
use crate::retry::{retry_transient, retry_when};

pub use dto::{
    AccountResponse, BudgetStatusResponse, CreateAccountRequest, CreateProjectRequest,
    ErrorResponse, InvestmentRequest, InvestmentResponse, MoneyMovementRequest, MovementResponse,
    ProjectResponse, ReportQuery, ReversalResponse, ReverseTransactionRequest,
    SetProjectStatusRequest, TransactionQuery, TransactionResponse, TransferRequest,
    TransferResponse,
};

type Journal = Arc<InMemoryJournal>;

fn expected(version: Option<u64>) -> ExpectedVersion {
    version.map_or(ExpectedVersion::Any, ExpectedVersion::Exact)
}

/// A stale exact version stays stale, so only lock timeouts are worth
/// another attempt.
fn worth_retrying(expected: ExpectedVersion) -> impl Fn(&EngineError) -> bool {
    move |err| match expected {
        ExpectedVersion::Exact(_) => matches!(err, EngineError::LockTimeout { .. }),
        ExpectedVersion::Any => err.is_transient(),
    }
}

/// In-process finance engine.
pub struct FinanceService<N> {
    config: EngineConfig,
    ledger: Arc<LedgerStore<Journal>>,
    funding: FundingCoordinator<Journal, Arc<N>>,
    budgets: BudgetAggregator<Journal, Arc<dyn CategoryStore>>,
    analytics: LedgerAnalytics<Journal>,
    notifier: Arc<N>,
}

impl<N> core::fmt::Debug for FinanceService<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FinanceService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<N> FinanceService<N>
where
    N: NotificationEmitter,
{
    pub fn new(config: EngineConfig, categories: Arc<dyn CategoryStore>, notifier: N) -> Self {
        let journal: Journal = Arc::new(InMemoryJournal::new());
        let guard = Arc::new(ConsistencyGuard::new(config.lock_timeout));
        let ledger = Arc::new(
            LedgerStore::new(guard, journal.clone(), config.default_credit_limit)
                .with_categories(categories.clone()),
        );
        let notifier = Arc::new(notifier);
        let funding = FundingCoordinator::new(ledger.clone(), notifier.clone());
        let budgets =
            BudgetAggregator::new(journal.clone(), categories, config.budget_warning_percent);
        let analytics = LedgerAnalytics::new(journal);

        info!(
            lock_timeout_ms = config.lock_timeout.as_millis() as u64,
            retry_attempts = config.retry.max_attempts,
            "finance service ready"
        );

        Self {
            config,
            ledger,
            funding,
            budgets,
            analytics,
            notifier,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<LedgerStore<Journal>> {
        &self.ledger
    }

    pub fn funding(&self) -> &FundingCoordinator<Journal, Arc<N>> {
        &self.funding
    }

    pub fn budgets(&self) -> &BudgetAggregator<Journal, Arc<dyn CategoryStore>> {
        &self.budgets
    }

    fn committed(&self, tx: &Transaction) {
        self.notifier.emit(&LedgerEvent::TransactionCommitted {
            transaction_id: tx.id,
            sequence: tx.sequence,
            kind: tx.kind,
            account_id: tx.account_id,
            counterparty_id: tx.counterparty_id,
            amount: tx.amount,
            occurred_at: tx.occurred_at,
        });
    }

    // -------------------------
    // Accounts and movements
    // -------------------------

    pub fn create_account(&self, req: CreateAccountRequest) -> EngineResult<AccountResponse> {
        let currency: Currency = req.currency.parse()?;
        let account = self.ledger.open_account(OpenAccount {
            owner: req.owner_id,
            name: req.name,
            kind: req.kind,
            currency,
            opening_balance: req.opening_balance,
            credit_limit: req.credit_limit,
        })?;
        Ok(AccountResponse::from(&account))
    }

    pub fn get_account(&self, id: AccountId) -> EngineResult<AccountResponse> {
        Ok(AccountResponse::from(&self.ledger.account(id)?))
    }

    fn posting(req: &MoneyMovementRequest) -> EngineResult<Posting> {
        Ok(Posting {
            category_id: req.category_id,
            idempotency_key: dto::parse_key(req.idempotency_key.clone())?,
            description: req.description.clone(),
            occurred_at: req.occurred_at,
        })
    }

    pub fn deposit(&self, req: MoneyMovementRequest) -> EngineResult<MovementResponse> {
        let posting = Self::posting(&req)?;
        let version = expected(req.expected_version);
        let posted = retry_when(&self.config.retry, worth_retrying(version), || {
            self.ledger
                .credit(req.account_id, req.amount, version, posting.clone())
        })?;
        if !posted.replayed {
            self.committed(&posted.transaction);
        }
        Ok(MovementResponse {
            transaction: posted.transaction.into(),
            balance: posted.balance,
            version: posted.version,
            replayed: posted.replayed,
        })
    }

    pub fn withdraw(&self, req: MoneyMovementRequest) -> EngineResult<MovementResponse> {
        let posting = Self::posting(&req)?;
        let version = expected(req.expected_version);
        let posted = retry_when(&self.config.retry, worth_retrying(version), || {
            self.ledger
                .debit(req.account_id, req.amount, version, posting.clone())
        })?;
        if !posted.replayed {
            self.committed(&posted.transaction);
        }
        Ok(MovementResponse {
            transaction: posted.transaction.into(),
            balance: posted.balance,
            version: posted.version,
            replayed: posted.replayed,
        })
    }

    pub fn transfer(&self, req: TransferRequest) -> EngineResult<TransferResponse> {
        let posting = Posting {
            idempotency_key: dto::parse_key(req.idempotency_key.clone())?,
            description: req.description.clone(),
            ..Posting::default()
        };
        let done = retry_transient(&self.config.retry, || {
            self.ledger.transfer(
                req.from_account_id,
                req.to_account_id,
                req.amount,
                posting.clone(),
            )
        })?;
        if !done.replayed {
            self.committed(&done.transaction);
        }
        Ok(TransferResponse {
            transaction: done.transaction.into(),
            from_balance: done.from_balance,
            to_balance: done.to_balance,
            replayed: done.replayed,
        })
    }

    /// Undo a completed income, expense or transfer with an opposite row.
    pub fn reverse_transaction(
        &self,
        id: TransactionId,
        req: ReverseTransactionRequest,
    ) -> EngineResult<ReversalResponse> {
        let posting = Posting {
            idempotency_key: dto::parse_key(req.idempotency_key)?,
            description: req.description,
            ..Posting::default()
        };
        let done = retry_transient(&self.config.retry, || self.ledger.reverse(id, posting.clone()))?;
        if !done.replayed {
            self.committed(&done.reversal);
        }
        Ok(ReversalResponse {
            original: done.original.id,
            reversal: done.reversal.into(),
            replayed: done.replayed,
        })
    }

    /// Newest-first page of journal rows for an account and/or kind.
    pub fn list_transactions(&self, query: TransactionQuery) -> EngineResult<Page<TransactionResponse>> {
        let filter = TransactionFilter {
            account: query.account_id,
            kind: query.kind,
            ..TransactionFilter::default()
        };
        let request = PageRequest::new(query.page, query.size.unwrap_or(PageRequest::default().size));
        let page = self.ledger.journal().page(&filter, request)?;
        Ok(page.map(TransactionResponse::from))
    }

    /// Accounts whose cached balance disagrees with the journal.
    pub fn verify_ledger(&self) -> EngineResult<Vec<BalanceCheck>> {
        self.ledger.verify_all()
    }

    // -------------------------
    // Funding
    // -------------------------

    pub fn create_project(&self, req: CreateProjectRequest) -> EngineResult<ProjectResponse> {
        let project = self.funding.create_project(
            NewProject {
                owner: req.owner_id,
                title: req.title,
                description: req.description,
                target: req.target,
            },
            req.auto_activate,
        )?;
        Ok(ProjectResponse::from(&project))
    }

    pub fn invest(&self, req: InvestmentRequest) -> EngineResult<InvestmentResponse> {
        let request = InvestRequest {
            project: req.project_id,
            investor_account: req.account_id,
            amount: req.amount,
            idempotency_key: dto::parse_key(req.idempotency_key)?,
        };
        let outcome = retry_transient(&self.config.retry, || self.funding.invest(request.clone()))?;
        Ok(InvestmentResponse::from(outcome))
    }

    pub fn get_project(&self, id: ProjectId) -> EngineResult<ProjectResponse> {
        Ok(ProjectResponse::from(&self.funding.project(id)?))
    }

    pub fn set_project_status(
        &self,
        id: ProjectId,
        req: SetProjectStatusRequest,
    ) -> EngineResult<ProjectResponse> {
        let project = retry_transient(&self.config.retry, || {
            self.funding.set_status(id, req.status, req.expected_status)
        })?;
        Ok(ProjectResponse::from(&project))
    }

    // -------------------------
    // Budgets
    // -------------------------

    pub fn create_budget(&self, req: NewBudget) -> EngineResult<Budget> {
        self.budgets.create_budget(req)
    }

    // -------------------------
    // Reports
    // -------------------------

    fn report_currency(&self, query: &ReportQuery) -> EngineResult<Currency> {
        match &query.currency {
            Some(code) => Ok(code.parse()?),
            None => Ok(self.config.default_currency),
        }
    }

    pub fn expenses_by_category(&self, query: ReportQuery) -> EngineResult<Vec<CategoryExpense>> {
        let currency = self.report_currency(&query)?;
        self.analytics
            .expenses_by_category(query.from, query.until, currency, query.account_id)
    }

    pub fn monthly_trends(&self, query: ReportQuery) -> EngineResult<Vec<MonthlyTrend>> {
        let currency = self.report_currency(&query)?;
        self.analytics
            .monthly_trends(query.from, query.until, currency, query.account_id)
    }

    /// Cash flow of one account; the query must name it.
    pub fn cash_flow(&self, query: ReportQuery) -> EngineResult<CashFlow> {
        let currency = self.report_currency(&query)?;
        let account = query
            .account_id
            .ok_or_else(|| DomainError::validation("cash flow needs an account"))?;
        self.ledger.account(account)?;
        self.analytics
            .cash_flow(account, currency, query.from, query.until)
    }

    /// Budget status for the window containing `as_of` (today when omitted).
    pub fn get_budget_status(
        &self,
        id: BudgetId,
        as_of: Option<NaiveDate>,
    ) -> EngineResult<BudgetStatusResponse> {
        let as_of = as_of.unwrap_or_else(|| Utc::now().date_naive());
        Ok(BudgetStatusResponse::from(self.budgets.status(id, as_of)?))
    }
}
