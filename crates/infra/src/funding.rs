//! Investor → project money movement and the project funding state machine.
//!
//! ## Invest pipeline
//!
//! ```text
//! validate amount, load project
//!   ↓
//! idempotent replay? → return the recorded Investment
//!   ↓
//! fast status/room check (no locks)
//!   ↓
//! acquire {investor account, pool account, project} in one ordered batch
//!   ↓
//! replay check + re-read project under lock, decide (reject-on-exceed)
//!   ↓
//! LedgerStore::transfer_held (journal append = commit point)
//!   ↓
//! record Investment, current += amount, ACTIVE → FUNDED at equality
//!   ↓
//! release locks, emit notifications
//! ```
//!
//! Anything that fails before the transfer commits leaves every balance,
//! project total and journal row exactly as it was.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use fundhub_core::{AccountId, DomainError, InvestmentId, Money, OwnerId, ProjectId, TransactionId};
use fundhub_ledger::{
    AccountKind, IdempotencyKey, Investment, LedgerEvent, NewProject, OpenAccount, Project,
    ProjectStatus, Transaction, TransactionDraft, TransactionKind,
};

use crate::error::{EngineError, EngineResult};
use crate::guard::LockKey;
use crate::journal::{TransactionFilter, TransactionJournal};
use crate::ledger_store::{LedgerStore, Posting};
use crate::notify::NotificationEmitter;

/// Request to move money from an investor account into a project's pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvestRequest {
    pub project: ProjectId,
    pub investor_account: AccountId,
    pub amount: Money,
    pub idempotency_key: Option<IdempotencyKey>,
}

/// Result of `invest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvestOutcome {
    pub investment: Investment,
    /// Project state right after this call.
    pub project: Project,
    /// The idempotency key was already recorded; no money moved.
    pub replayed: bool,
}

/// Project total next to the journal's view of it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectAudit {
    pub project: ProjectId,
    pub current_amount: i64,
    /// Sum of COMPLETED INVESTMENT transactions crediting the pool.
    pub journaled: i64,
    /// Sum of recorded Investment rows.
    pub recorded: i64,
}

impl ProjectAudit {
    pub fn is_consistent(&self) -> bool {
        self.current_amount == self.journaled && self.journaled == self.recorded
    }
}

#[derive(Debug, Default)]
struct Investments {
    rows: Vec<Investment>,
    by_transaction: HashMap<TransactionId, usize>,
}

/// Orchestrates investments and owns `Project` and `Investment` state.
///
/// Holds no balance state of its own; every money movement goes through the
/// ledger store.
pub struct FundingCoordinator<J, N> {
    ledger: Arc<LedgerStore<J>>,
    notifier: N,
    projects: RwLock<HashMap<ProjectId, Project>>,
    investments: RwLock<Investments>,
}

impl<J, N> core::fmt::Debug for FundingCoordinator<J, N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FundingCoordinator").finish_non_exhaustive()
    }
}

impl<J, N> FundingCoordinator<J, N>
where
    J: TransactionJournal,
    N: NotificationEmitter,
{
    pub fn new(ledger: Arc<LedgerStore<J>>, notifier: N) -> Self {
        Self {
            ledger,
            notifier,
            projects: RwLock::new(HashMap::new()),
            investments: RwLock::new(Investments::default()),
        }
    }

    pub fn ledger(&self) -> &Arc<LedgerStore<J>> {
        &self.ledger
    }

    fn load(&self, id: ProjectId) -> EngineResult<Project> {
        let projects = self
            .projects
            .read()
            .map_err(|_| EngineError::poisoned("project table"))?;
        projects
            .get(&id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("project").into())
    }

    fn store(&self, project: Project) -> EngineResult<()> {
        let mut projects = self
            .projects
            .write()
            .map_err(|_| EngineError::poisoned("project table"))?;
        projects.insert(project.id_typed(), project);
        Ok(())
    }

    fn investment_for(&self, transaction: TransactionId) -> EngineResult<Option<Investment>> {
        let investments = self
            .investments
            .read()
            .map_err(|_| EngineError::poisoned("investment table"))?;
        Ok(investments
            .by_transaction
            .get(&transaction)
            .map(|&i| investments.rows[i].clone()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a project with its own BUSINESS funding pool account.
    ///
    /// Projects start PENDING; `auto_activate` opens them for investment
    /// immediately.
    pub fn create_project(&self, req: NewProject, auto_activate: bool) -> EngineResult<Project> {
        req.validate()?;

        let pool = self.ledger.open_account(OpenAccount {
            owner: req.owner,
            name: format!("{} funding pool", req.title.trim()),
            kind: AccountKind::Business,
            currency: req.target.currency,
            opening_balance: 0,
            credit_limit: None,
        })?;

        let status = if auto_activate {
            ProjectStatus::Active
        } else {
            ProjectStatus::Pending
        };
        let project = Project::create(ProjectId::new(), pool.id_typed(), &req, status, Utc::now())?;
        self.store(project.clone())?;

        info!(
            project = %project.id_typed(),
            pool = %pool.id_typed(),
            target = project.target().amount_minor,
            status = %status,
            "project created"
        );
        Ok(project)
    }

    /// Invest in a project. Amounts larger than the remaining room are
    /// rejected with `ProjectOverfunded`, never partially filled.
    pub fn invest(&self, req: InvestRequest) -> EngineResult<InvestOutcome> {
        req.amount.ensure_positive()?;
        let project = self.load(req.project)?;
        let pool = project.pool_account_id();
        let draft = TransactionDraft::investment(req.investor_account, pool, req.amount)
            .with_idempotency_key(req.idempotency_key.clone());

        if let Some(outcome) = self.replay(&draft)? {
            return Ok(outcome);
        }
        project.check_investment(req.amount)?;

        let locks = self.ledger.guard().acquire([
            LockKey::Account(req.investor_account),
            LockKey::Account(pool),
            LockKey::Project(req.project),
        ])?;

        if let Some(outcome) = self.replay(&draft)? {
            return Ok(outcome);
        }
        let mut project = self.load(req.project)?;
        project.check_investment(req.amount)?;

        let posting = Posting {
            idempotency_key: req.idempotency_key.clone(),
            description: Some(format!("investment in {}", project.title())),
            ..Posting::default()
        };
        let transferred = self.ledger.transfer_held(
            &locks,
            TransactionKind::Investment,
            req.investor_account,
            pool,
            req.amount,
            posting,
        )?;
        if transferred.replayed {
            drop(locks);
            return self
                .replay(&draft)?
                .ok_or_else(|| EngineError::Storage("investment journaled without a record".into()));
        }

        let now = Utc::now();
        let investment = Investment {
            id: InvestmentId::new(),
            project_id: req.project,
            investor_account_id: req.investor_account,
            transaction_id: transferred.transaction.id,
            amount: req.amount,
            created_at: now,
        };
        let funded = project.record_investment(req.amount, now)?;
        {
            let mut investments = self
                .investments
                .write()
                .map_err(|_| EngineError::poisoned("investment table"))?;
            let idx = investments.rows.len();
            investments.by_transaction.insert(investment.transaction_id, idx);
            investments.rows.push(investment.clone());
        }
        self.store(project.clone())?;
        drop(locks);

        info!(
            project = %req.project,
            investor = %req.investor_account,
            amount = req.amount.amount_minor,
            current = project.current().amount_minor,
            funded,
            "investment completed"
        );

        self.notify_committed(&transferred.transaction);
        self.notifier.emit(&LedgerEvent::InvestmentCompleted {
            investment_id: investment.id,
            project_id: req.project,
            investor_account_id: req.investor_account,
            transaction_id: investment.transaction_id,
            amount: req.amount,
            occurred_at: now,
        });
        if funded {
            self.notifier.emit(&LedgerEvent::ProjectFunded {
                project_id: req.project,
                target: project.target(),
                occurred_at: now,
            });
            self.notifier.emit(&LedgerEvent::ProjectStatusChanged {
                project_id: req.project,
                from: ProjectStatus::Active,
                to: ProjectStatus::Funded,
                occurred_at: now,
            });
        }

        Ok(InvestOutcome {
            investment,
            project,
            replayed: false,
        })
    }

    /// Recorded outcome for a draft whose idempotency key is already journaled.
    fn replay(&self, draft: &TransactionDraft) -> EngineResult<Option<InvestOutcome>> {
        let Some(key) = &draft.idempotency_key else {
            return Ok(None);
        };
        let Some(tx) = self.ledger.journal().find_by_idempotency_key(key)? else {
            return Ok(None);
        };
        if !draft.same_request_as(&tx) {
            return Err(DomainError::validation(format!(
                "idempotency key '{key}' was already used for a different request"
            ))
            .into());
        }
        let Some(investment) = self.investment_for(tx.id)? else {
            // Journaled but the record is not written yet: the first call
            // still holds the locks.
            return Err(EngineError::LockTimeout { timeout_ms: 0 });
        };
        let project = self.load(investment.project_id)?;
        debug!(project = %investment.project_id, key = %key, "replayed idempotent investment");
        Ok(Some(InvestOutcome {
            investment,
            project,
            replayed: true,
        }))
    }

    /// Administrative guarded transition. Applies only while the project is
    /// still in `expected`; ACTIVE → FUNDED is never available here.
    pub fn set_status(
        &self,
        id: ProjectId,
        to: ProjectStatus,
        expected: ProjectStatus,
    ) -> EngineResult<Project> {
        let locks = self.ledger.guard().acquire([LockKey::Project(id)])?;
        let mut project = self.load(id)?;
        let from = project.admin_transition(to, expected)?;
        self.store(project.clone())?;
        drop(locks);

        info!(project = %id, from = %from, to = %to, "project status changed");
        self.notifier.emit(&LedgerEvent::ProjectStatusChanged {
            project_id: id,
            from,
            to,
            occurred_at: Utc::now(),
        });
        Ok(project)
    }

    /// Announce a committed transaction.
    fn notify_committed(&self, tx: &Transaction) {
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

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub fn project(&self, id: ProjectId) -> EngineResult<Project> {
        self.load(id)
    }

    fn projects_where(&self, pred: impl Fn(&Project) -> bool) -> EngineResult<Vec<Project>> {
        let projects = self
            .projects
            .read()
            .map_err(|_| EngineError::poisoned("project table"))?;
        let mut rows: Vec<Project> = projects.values().filter(|p| pred(p)).cloned().collect();
        rows.sort_by_key(|p| (p.created_at(), p.id_typed()));
        Ok(rows)
    }

    pub fn projects_with_status(&self, status: ProjectStatus) -> EngineResult<Vec<Project>> {
        self.projects_where(|p| p.status() == status)
    }

    pub fn projects_for_owner(&self, owner: OwnerId) -> EngineResult<Vec<Project>> {
        self.projects_where(|p| p.owner() == owner)
    }

    fn investments_where(&self, pred: impl Fn(&Investment) -> bool) -> EngineResult<Vec<Investment>> {
        let investments = self
            .investments
            .read()
            .map_err(|_| EngineError::poisoned("investment table"))?;
        Ok(investments.rows.iter().filter(|i| pred(i)).cloned().collect())
    }

    pub fn investments_for_project(&self, id: ProjectId) -> EngineResult<Vec<Investment>> {
        self.investments_where(|i| i.project_id == id)
    }

    pub fn investments_for_investor(&self, account: AccountId) -> EngineResult<Vec<Investment>> {
        self.investments_where(|i| i.investor_account_id == account)
    }

    /// Total an account has invested across all projects.
    pub fn total_invested(&self, account: AccountId) -> EngineResult<Money> {
        let currency = self.ledger.account(account)?.currency();
        let investments = self.investments_for_investor(account)?;
        Ok(Money::total(currency, investments.iter().map(|i| i.amount.amount_minor))?)
    }

    /// Cross-check `current_amount` against the journal and the Investment rows.
    pub fn audit_project(&self, id: ProjectId) -> EngineResult<ProjectAudit> {
        let pool = self.load(id)?.pool_account_id();
        let _locks = self
            .ledger
            .guard()
            .acquire([LockKey::Account(pool), LockKey::Project(id)])?;

        let project = self.load(id)?;
        let filter = TransactionFilter {
            account: Some(pool),
            kind: Some(TransactionKind::Investment),
            ..TransactionFilter::default()
        }
        .completed();
        let currency = project.current().currency;
        let rows = self.ledger.journal().select(&filter)?;
        let journaled = Money::total(
            currency,
            rows.iter()
                .filter(|tx| tx.counterparty_id == Some(pool))
                .map(|tx| tx.amount.amount_minor),
        )?;
        let investments = self.investments_for_project(id)?;
        let recorded = Money::total(currency, investments.iter().map(|i| i.amount.amount_minor))?;

        Ok(ProjectAudit {
            project: id,
            current_amount: project.current().amount_minor,
            journaled: journaled.amount_minor,
            recorded: recorded.amount_minor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::ConsistencyGuard;
    use crate::journal::InMemoryJournal;
    use crate::notify::NoopEmitter;
    use fundhub_core::Currency;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct Recorder(Mutex<Vec<&'static str>>);

    impl NotificationEmitter for Recorder {
        fn emit(&self, event: &LedgerEvent) {
            use fundhub_events::Event;
            self.0.lock().unwrap().push(event.event_type());
        }
    }

    fn usd(amount: i64) -> Money {
        Money::new(amount, Currency::USD)
    }

    fn ledger() -> Arc<LedgerStore<InMemoryJournal>> {
        let guard = Arc::new(ConsistencyGuard::new(Duration::from_millis(100)));
        Arc::new(LedgerStore::new(guard, InMemoryJournal::new(), 0))
    }

    fn investor(ledger: &LedgerStore<InMemoryJournal>, balance: i64) -> AccountId {
        ledger
            .open_account(OpenAccount {
                owner: OwnerId::new(),
                name: "investor".to_string(),
                kind: AccountKind::Investment,
                currency: Currency::USD,
                opening_balance: balance,
                credit_limit: None,
            })
            .unwrap()
            .id_typed()
    }

    fn new_project(target: i64) -> NewProject {
        NewProject {
            owner: OwnerId::new(),
            title: "Community garden".to_string(),
            description: None,
            target: usd(target),
        }
    }

    fn request(project: ProjectId, account: AccountId, amount: i64) -> InvestRequest {
        InvestRequest {
            project,
            investor_account: account,
            amount: usd(amount),
            idempotency_key: None,
        }
    }

    #[test]
    fn new_projects_start_pending_with_a_business_pool() {
        let coordinator = FundingCoordinator::new(ledger(), NoopEmitter);
        let project = coordinator.create_project(new_project(100), false).unwrap();

        assert_eq!(project.status(), ProjectStatus::Pending);
        let pool = coordinator.ledger().account(project.pool_account_id()).unwrap();
        assert_eq!(pool.kind(), AccountKind::Business);
        assert_eq!(pool.balance(), 0);
    }

    #[test]
    fn invalid_project_opens_no_pool() {
        let ledger = ledger();
        let coordinator = FundingCoordinator::new(ledger.clone(), NoopEmitter);
        let mut req = new_project(100);
        req.title = "  ".to_string();

        assert!(coordinator.create_project(req.clone(), true).is_err());
        assert!(ledger.accounts_for_owner(req.owner).unwrap().is_empty());
    }

    #[test]
    fn pending_project_refuses_investment() {
        let ledger = ledger();
        let coordinator = FundingCoordinator::new(ledger.clone(), NoopEmitter);
        let project = coordinator.create_project(new_project(100), false).unwrap();
        let a = investor(&ledger, 100);

        let err = coordinator.invest(request(project.id_typed(), a, 10)).unwrap_err();
        assert!(matches!(err, EngineError::Domain(DomainError::ProjectNotActive { .. })));
        assert_eq!(ledger.account(a).unwrap().balance(), 100);
    }

    #[test]
    fn funding_emits_completion_and_funded_notifications() {
        let ledger = ledger();
        let recorder = Arc::new(Recorder::default());
        let coordinator = FundingCoordinator::new(ledger.clone(), recorder.clone());
        let project = coordinator.create_project(new_project(300), true).unwrap();
        let a = investor(&ledger, 1_000);

        coordinator.invest(request(project.id_typed(), a, 100)).unwrap();
        let outcome = coordinator.invest(request(project.id_typed(), a, 200)).unwrap();

        assert_eq!(outcome.project.status(), ProjectStatus::Funded);
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![
                "ledger.transaction.committed",
                "funding.investment.completed",
                "ledger.transaction.committed",
                "funding.investment.completed",
                "funding.project.funded",
                "funding.project.status_changed",
            ]
        );
        assert_eq!(coordinator.total_invested(a).unwrap().amount_minor, 300);
        assert!(coordinator.audit_project(project.id_typed()).unwrap().is_consistent());
    }

    #[test]
    fn replay_after_funding_returns_recorded_investment() {
        let ledger = ledger();
        let coordinator = FundingCoordinator::new(ledger.clone(), NoopEmitter);
        let project = coordinator.create_project(new_project(500), true).unwrap();
        let a = investor(&ledger, 1_000);

        let mut req = request(project.id_typed(), a, 500);
        req.idempotency_key = Some(IdempotencyKey::new("inv-1").unwrap());

        let first = coordinator.invest(req.clone()).unwrap();
        let again = coordinator.invest(req.clone()).unwrap();

        assert!(!first.replayed);
        assert!(again.replayed);
        assert_eq!(again.investment, first.investment);
        assert_eq!(ledger.account(a).unwrap().balance(), 500);
        assert_eq!(coordinator.investments_for_project(project.id_typed()).unwrap().len(), 1);

        req.amount = usd(400);
        assert!(matches!(
            coordinator.invest(req),
            Err(EngineError::Domain(DomainError::Validation(_)))
        ));
    }

    #[test]
    fn admin_transitions_follow_the_workflow() {
        let recorder = Arc::new(Recorder::default());
        let coordinator = FundingCoordinator::new(ledger(), recorder.clone());
        let project = coordinator.create_project(new_project(100), false).unwrap();
        let id = project.id_typed();

        let err = coordinator
            .set_status(id, ProjectStatus::Active, ProjectStatus::Active)
            .unwrap_err();
        assert!(matches!(err, EngineError::Domain(DomainError::InvalidTransition { .. })));

        coordinator
            .set_status(id, ProjectStatus::Active, ProjectStatus::Pending)
            .unwrap();
        assert!(coordinator
            .set_status(id, ProjectStatus::Funded, ProjectStatus::Active)
            .is_err());
        let done = coordinator
            .set_status(id, ProjectStatus::Completed, ProjectStatus::Active)
            .unwrap();

        assert_eq!(done.status(), ProjectStatus::Completed);
        assert_eq!(coordinator.projects_with_status(ProjectStatus::Completed).unwrap().len(), 1);
        assert_eq!(recorder.0.lock().unwrap().len(), 2);
    }
}
