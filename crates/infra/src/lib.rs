//! Ledger & funding consistency engine: locking, journaling, balances,
//! funding orchestration, budget rollups and their collaborators.

pub mod analytics;
pub mod budget;
pub mod category;
pub mod config;
pub mod error;
pub mod funding;
pub mod guard;
pub mod journal;
pub mod ledger_store;
pub mod notify;
pub mod retry;
pub mod service;


pub use analytics::{CashFlow, CategoryExpense, LedgerAnalytics, MonthlyTrend};
pub use budget::{BudgetAggregator, BudgetStatusReport, PeriodSummary};
pub use category::{CategoryStore, InMemoryCategoryStore};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use funding::{FundingCoordinator, InvestOutcome, InvestRequest, ProjectAudit};
pub use guard::{ConsistencyGuard, LockKey, LockSet};
pub use journal::{
    Appended, InMemoryJournal, JournalError, Page, PageRequest, TransactionFilter,
    TransactionJournal,
};
pub use ledger_store::{BalanceCheck, LedgerStore, Posted, Posting, Reversed, Transferred};
pub use notify::{
    BusNotificationEmitter, NoopEmitter, NotificationEmitter, NotificationWorker, WorkerHandle,
};
pub use retry::{BackoffStrategy, RetryPolicy, retry_transient, retry_when};
pub use service::FinanceService;
