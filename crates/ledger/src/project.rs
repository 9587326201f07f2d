use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fundhub_core::{
    AccountId, AggregateRoot, Currency, DomainError, DomainResult, Money, OwnerId, ProjectId,
};

/// Funding lifecycle of a project.
///
/// ```text
/// PENDING ──admin──▶ ACTIVE ──invest (current == target)──▶ FUNDED
///    │                  │                                      │
///    └─admin─▶ REJECTED └──────────admin──▶ COMPLETED ◀──admin─┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
    Pending,
    Active,
    Funded,
    Rejected,
    Completed,
}

impl ProjectStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProjectStatus::Rejected | ProjectStatus::Completed)
    }

    /// Transitions the administrative workflow may request.
    ///
    /// ACTIVE → FUNDED is reserved for the funding coordinator.
    pub fn admin_may_transition(self, to: ProjectStatus) -> bool {
        matches!(
            (self, to),
            (ProjectStatus::Pending, ProjectStatus::Active)
                | (ProjectStatus::Pending, ProjectStatus::Rejected)
                | (ProjectStatus::Active, ProjectStatus::Completed)
                | (ProjectStatus::Funded, ProjectStatus::Completed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProjectStatus::Pending => "PENDING",
            ProjectStatus::Active => "ACTIVE",
            ProjectStatus::Funded => "FUNDED",
            ProjectStatus::Rejected => "REJECTED",
            ProjectStatus::Completed => "COMPLETED",
        }
    }
}

impl core::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to register a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProject {
    pub owner: OwnerId,
    pub title: String,
    pub description: Option<String>,
    pub target: Money,
}

impl NewProject {
    pub fn validate(&self) -> DomainResult<()> {
        if self.title.trim().is_empty() {
            return Err(DomainError::validation("project title must not be empty"));
        }
        self.target.ensure_positive()
    }
}

/// Aggregate root: Project.
///
/// `current_amount` is a cache of the COMPLETED INVESTMENT transactions
/// crediting `pool_account_id`; it never exceeds the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    id: ProjectId,
    owner: OwnerId,
    title: String,
    description: Option<String>,
    target_amount: i64,
    current_amount: i64,
    currency: Currency,
    pool_account_id: AccountId,
    status: ProjectStatus,
    version: u64,
    created_at: DateTime<Utc>,
    funded_at: Option<DateTime<Utc>>,
}

impl Project {
    pub fn create(
        id: ProjectId,
        pool_account_id: AccountId,
        req: &NewProject,
        status: ProjectStatus,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        req.validate()?;
        if !matches!(status, ProjectStatus::Pending | ProjectStatus::Active) {
            return Err(DomainError::InvalidTransition {
                from: "NEW".to_string(),
                to: status.to_string(),
            });
        }

        Ok(Self {
            id,
            owner: req.owner,
            title: req.title.trim().to_string(),
            description: req.description.clone(),
            target_amount: req.target.amount_minor,
            current_amount: 0,
            currency: req.target.currency,
            pool_account_id,
            status,
            version: 0,
            created_at: now,
            funded_at: None,
        })
    }

    pub fn id_typed(&self) -> ProjectId {
        self.id
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn target(&self) -> Money {
        Money::new(self.target_amount, self.currency)
    }

    pub fn current(&self) -> Money {
        Money::new(self.current_amount, self.currency)
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn pool_account_id(&self) -> AccountId {
        self.pool_account_id
    }

    pub fn status(&self) -> ProjectStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn funded_at(&self) -> Option<DateTime<Utc>> {
        self.funded_at
    }

    /// Amount still needed to reach the target.
    pub fn room(&self) -> i64 {
        self.target_amount - self.current_amount
    }

    pub fn ensure_accepting(&self) -> DomainResult<()> {
        if self.status == ProjectStatus::Active {
            Ok(())
        } else {
            Err(DomainError::ProjectNotActive {
                project: self.id,
                status: self.status.to_string(),
            })
        }
    }

    /// Decide whether an investment can be accepted in full.
    ///
    /// Amounts above the remaining room are rejected, never capped.
    pub fn check_investment(&self, amount: Money) -> DomainResult<()> {
        amount.ensure_positive()?;
        amount.ensure_same_currency(self.currency)?;
        self.ensure_accepting()?;
        let room = self.room();
        if amount.amount_minor > room {
            return Err(DomainError::ProjectOverfunded {
                project: self.id,
                room,
                requested: amount.amount_minor,
            });
        }
        Ok(())
    }

    /// Add a committed investment; returns `true` when this one completed the target.
    pub fn record_investment(&mut self, amount: Money, now: DateTime<Utc>) -> DomainResult<bool> {
        self.check_investment(amount)?;
        self.current_amount += amount.amount_minor;
        self.version += 1;

        if self.current_amount == self.target_amount {
            self.status = ProjectStatus::Funded;
            self.funded_at = Some(now);
            return Ok(true);
        }
        Ok(false)
    }

    /// Guarded administrative transition: applies only if the project is still
    /// in `expected`. Returns the previous status.
    pub fn admin_transition(
        &mut self,
        to: ProjectStatus,
        expected: ProjectStatus,
    ) -> DomainResult<ProjectStatus> {
        if self.status != expected {
            return Err(DomainError::InvalidTransition {
                from: format!("{} (caller expected {expected})", self.status),
                to: to.to_string(),
            });
        }
        if !self.status.admin_may_transition(to) {
            return Err(DomainError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        let previous = self.status;
        self.status = to;
        self.version += 1;
        Ok(previous)
    }
}

impl AggregateRoot for Project {
    type Id = ProjectId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}
