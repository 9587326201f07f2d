use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fundhub_core::{AccountId, InvestmentId, Money, ProjectId, TransactionId};
use fundhub_events::Event;

use crate::project::ProjectStatus;
use crate::transaction::TransactionKind;

/// Facts the engine announces after they have committed.
///
/// Consumers (notification delivery, dashboards) receive these through the
/// notification emitter; the journal stays the source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    TransactionCommitted {
        transaction_id: TransactionId,
        sequence: u64,
        kind: TransactionKind,
        account_id: AccountId,
        counterparty_id: Option<AccountId>,
        amount: Money,
        occurred_at: DateTime<Utc>,
    },
    InvestmentCompleted {
        investment_id: InvestmentId,
        project_id: ProjectId,
        investor_account_id: AccountId,
        transaction_id: TransactionId,
        amount: Money,
        occurred_at: DateTime<Utc>,
    },
    ProjectFunded {
        project_id: ProjectId,
        target: Money,
        occurred_at: DateTime<Utc>,
    },
    ProjectStatusChanged {
        project_id: ProjectId,
        from: ProjectStatus,
        to: ProjectStatus,
        occurred_at: DateTime<Utc>,
    },
}

impl LedgerEvent {
    /// The aggregate this event is about.
    pub fn subject_id(&self) -> Uuid {
        match self {
            LedgerEvent::TransactionCommitted { account_id, .. } => *account_id.as_uuid(),
            LedgerEvent::InvestmentCompleted { project_id, .. }
            | LedgerEvent::ProjectFunded { project_id, .. }
            | LedgerEvent::ProjectStatusChanged { project_id, .. } => *project_id.as_uuid(),
        }
    }
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::TransactionCommitted { .. } => "ledger.transaction.committed",
            LedgerEvent::InvestmentCompleted { .. } => "funding.investment.completed",
            LedgerEvent::ProjectFunded { .. } => "funding.project.funded",
            LedgerEvent::ProjectStatusChanged { .. } => "funding.project.status_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::TransactionCommitted { occurred_at, .. }
            | LedgerEvent::InvestmentCompleted { occurred_at, .. }
            | LedgerEvent::ProjectFunded { occurred_at, .. }
            | LedgerEvent::ProjectStatusChanged { occurred_at, .. } => *occurred_at,
        }
    }
}
